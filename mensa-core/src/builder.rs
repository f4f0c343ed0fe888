//! Accumulator that collects meals per day and category and renders the `OpenMensa` feed.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::NaiveDate;
use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use regex::Regex;
use tracing::debug;

use crate::model::Meal;
use crate::ports::PortError;
use crate::text::{truncate_chars, wrap, xml_escape};

/// Stylesheets linked from every feed unless the caller passes its own.
pub const DEFAULT_STYLESHEETS: [&str; 2] = [
    "https://cdn.jsdelivr.net/npm/om-style@1.0.0/basic.css",
    "https://cdn.jsdelivr.net/npm/om-style@1.0.0/lightgreen.css",
];

/// Longest name or note `OpenMensa` accepts.
pub const MAX_TEXT_LEN: usize = 250;

pub(crate) const OPENMENSA_NS: &str = "http://openmensa.org/open-mensa-v2";
pub(crate) const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";
pub(crate) const SCHEMA_LOCATION: &str =
    "http://openmensa.org/open-mensa-v2 http://openmensa.org/open-mensa-v2.xsd";
pub(crate) const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";

#[derive(Debug, Clone)]
enum Day {
    Open(Vec<Category>),
    Closed,
}

#[derive(Debug, Clone)]
struct Category {
    name: String,
    meals: Vec<Meal>,
}

/// Collects the meals of one canteen and serializes them as an `OpenMensa` v2 feed.
///
/// Days are kept in date order; categories and meals keep insertion order.
/// A day is either closed or has meals: closing a day drops its meals, and
/// adding a meal to a closed day opens it again.
#[derive(Debug, Clone)]
pub struct FeedBuilder {
    days: BTreeMap<NaiveDate, Day>,
    legend: Option<BTreeMap<String, String>>,
    version: Option<String>,
    comments: Vec<String>,
}

impl Default for FeedBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedBuilder {
    /// Create an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            days: BTreeMap::new(),
            legend: None,
            version: None,
            comments: Vec::new(),
        }
    }

    /// Create an empty builder that writes a `<version>` element.
    #[must_use]
    pub fn with_version<S: Into<String>>(version: S) -> Self {
        Self {
            version: Some(version.into()),
            ..Self::new()
        }
    }

    /// Add a meal to `category` on `date`.
    ///
    /// Names longer than [`MAX_TEXT_LEN`] are split into several meals; notes and
    /// prices stay with the first part. Blank names or categories are skipped.
    pub fn add_meal(&mut self, date: NaiveDate, category: &str, meal: Meal) {
        let category = category.trim();
        let Meal {
            name,
            notes,
            prices,
        } = meal;

        let (name, legend_notes) = self.expand_legend(name.trim());
        let name = name.trim();

        if name.is_empty() || category.is_empty() {
            debug!(%date, category, "skipping meal without name or category");
            return;
        }

        let mut all_notes: Vec<String> = Vec::new();
        for note in notes.into_iter().chain(legend_notes) {
            let note = truncate_chars(note.trim(), MAX_TEXT_LEN);
            if !note.is_empty() && !all_notes.contains(&note) {
                all_notes.push(note);
            }
        }

        let day = self
            .days
            .entry(date)
            .and_modify(|day| {
                if matches!(day, Day::Closed) {
                    *day = Day::Open(Vec::new());
                }
            })
            .or_insert_with(|| Day::Open(Vec::new()));
        let Day::Open(categories) = day else {
            return;
        };

        let category = truncate_chars(category, MAX_TEXT_LEN);
        let index = if let Some(index) = categories.iter().position(|cat| cat.name == category) {
            index
        } else {
            categories.push(Category {
                name: category,
                meals: Vec::new(),
            });
            categories.len() - 1
        };
        let Some(target) = categories.get_mut(index) else {
            return;
        };

        let mut first = true;
        for part in wrap(name, MAX_TEXT_LEN) {
            if first {
                first = false;
                target.meals.push(Meal {
                    name: part,
                    notes: all_notes.clone(),
                    prices: prices.clone(),
                });
            } else {
                target.meals.push(Meal::new(part));
            }
        }
    }

    /// Mark `date` as closed, dropping any meals added for it.
    pub fn set_day_closed(&mut self, date: NaiveDate) {
        self.days.insert(date, Day::Closed);
    }

    /// Whether at least one meal exists for `date`.
    #[must_use]
    pub fn has_meals_for(&self, date: NaiveDate) -> bool {
        match self.days.get(&date) {
            Some(Day::Open(categories)) => categories.iter().any(|cat| !cat.meals.is_empty()),
            _ => false,
        }
    }

    /// Whether `date` was marked closed.
    #[must_use]
    pub fn is_closed(&self, date: NaiveDate) -> bool {
        matches!(self.days.get(&date), Some(Day::Closed))
    }

    /// Whether neither meals nor closed days were recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    /// Number of meals across all days.
    #[must_use]
    pub fn meal_count(&self) -> usize {
        self.days
            .values()
            .map(|day| match day {
                Day::Open(categories) => categories.iter().map(|cat| cat.meals.len()).sum(),
                Day::Closed => 0,
            })
            .sum()
    }

    /// Install a legend mapping note codes to descriptions. Only the first call has an effect.
    pub fn set_legend(&mut self, legend: BTreeMap<String, String>) {
        if self.legend.is_none() {
            self.legend = Some(legend);
        }
    }

    /// Build the legend from free text with a pattern that has `name` and `value` groups.
    pub fn set_legend_from_text(&mut self, text: &str, pattern: &Regex) {
        if self.legend.is_some() {
            return;
        }
        let legend: BTreeMap<String, String> = pattern
            .captures_iter(text)
            .filter_map(|caps| {
                let key = caps.name("name")?.as_str().trim();
                let value = caps.name("value")?.as_str().trim().trim_matches(',').trim();
                (!key.is_empty() && !value.is_empty()).then(|| (key.to_owned(), value.to_owned()))
            })
            .collect();
        debug!(entries = legend.len(), "legend parsed");
        self.legend = Some(legend);
    }

    /// The installed legend, if any.
    #[must_use]
    pub fn legend(&self) -> Option<&BTreeMap<String, String>> {
        self.legend.as_ref()
    }

    /// Attach a comment that is written after the document.
    pub fn append_comment<S: Into<String>>(&mut self, comment: S) {
        self.comments.push(comment.into());
    }

    /// Render the feed without stylesheet links.
    ///
    /// # Errors
    ///
    /// Returns a [`PortError`] if the XML writer fails.
    pub fn to_xml(&self) -> Result<String, PortError> {
        self.render(&[])
    }

    /// Render the feed with the default stylesheets.
    ///
    /// # Errors
    ///
    /// Returns a [`PortError`] if the XML writer fails.
    pub fn to_xml_feed(&self) -> Result<String, PortError> {
        self.render(&DEFAULT_STYLESHEETS)
    }

    /// Render the feed linking the given stylesheets.
    ///
    /// # Errors
    ///
    /// Returns a [`PortError`] if the XML writer fails.
    pub fn to_xml_feed_with_styles(&self, styles: &[&str]) -> Result<String, PortError> {
        self.render(styles)
    }

    fn render(&self, styles: &[&str]) -> Result<String, PortError> {
        let mut out = String::from(XML_DECLARATION);
        for style in styles {
            writeln!(
                out,
                "<?xml-stylesheet href=\"{}\" type=\"text/css\"?>",
                xml_escape(style)
            )
            .map_err(|err| PortError::Internal(err.to_string()))?;
        }

        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer.write_event(Event::Start(openmensa_root()))?;
        if let Some(version) = &self.version {
            write_text_element(&mut writer, "version", version)?;
        }
        writer.write_event(Event::Start(BytesStart::new("canteen")))?;

        for (date, day) in &self.days {
            let date_text = date.format("%Y-%m-%d").to_string();
            let mut day_start = BytesStart::new("day");
            day_start.push_attribute(("date", date_text.as_str()));
            writer.write_event(Event::Start(day_start))?;

            match day {
                Day::Closed => writer.write_event(Event::Empty(BytesStart::new("closed")))?,
                Day::Open(categories) => {
                    for category in categories {
                        write_category(&mut writer, category)?;
                    }
                }
            }

            writer.write_event(Event::End(BytesEnd::new("day")))?;
        }

        writer.write_event(Event::End(BytesEnd::new("canteen")))?;
        writer.write_event(Event::End(BytesEnd::new("openmensa")))?;

        let body = String::from_utf8(writer.into_inner())
            .map_err(|err| PortError::Internal(err.to_string()))?;
        out.push_str(&body);
        out.push('\n');

        for comment in &self.comments {
            write!(out, "\n<!-- {} -->\n", comment_text(comment))
                .map_err(|err| PortError::Internal(err.to_string()))?;
        }

        Ok(out)
    }

    /// Strip parenthesized legend codes such as `(1,a)` from a name and return their descriptions.
    fn expand_legend(&self, name: &str) -> (String, Vec<String>) {
        let Some(legend) = self.legend.as_ref().filter(|legend| !legend.is_empty()) else {
            return (name.to_owned(), Vec::new());
        };

        let mut notes = Vec::new();
        let mut cleaned = String::with_capacity(name.len());
        let mut rest = name;

        while let Some(open) = rest.find('(') {
            let (before, after_open) = rest.split_at(open);
            let Some(close) = after_open.find(')') else {
                break;
            };
            let (group, after_close) = after_open.split_at(close + 1);
            let inner = group.trim_start_matches('(').trim_end_matches(')');
            let codes: Vec<&str> = inner
                .split(',')
                .map(str::trim)
                .filter(|code| !code.is_empty())
                .collect();

            cleaned.push_str(before);
            if !codes.is_empty() && codes.iter().all(|code| legend.contains_key(*code)) {
                notes.extend(codes.iter().filter_map(|code| legend.get(*code).cloned()));
            } else {
                cleaned.push_str(group);
            }
            rest = after_close;
        }
        cleaned.push_str(rest);

        (crate::text::squash_whitespace(&cleaned).replace(" ,", ","), notes)
    }
}

pub(crate) fn openmensa_root() -> BytesStart<'static> {
    let mut root = BytesStart::new("openmensa");
    root.push_attribute(("version", "2.1"));
    root.push_attribute(("xmlns", OPENMENSA_NS));
    root.push_attribute(("xmlns:xsi", XSI_NS));
    root.push_attribute(("xsi:schemaLocation", SCHEMA_LOCATION));
    root
}

pub(crate) fn write_text_element(
    writer: &mut Writer<Vec<u8>>,
    name: &str,
    text: &str,
) -> Result<(), PortError> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn write_category(writer: &mut Writer<Vec<u8>>, category: &Category) -> Result<(), PortError> {
    let mut start = BytesStart::new("category");
    start.push_attribute(("name", category.name.as_str()));
    writer.write_event(Event::Start(start))?;

    for meal in &category.meals {
        writer.write_event(Event::Start(BytesStart::new("meal")))?;
        write_text_element(writer, "name", &meal.name)?;
        for note in &meal.notes {
            write_text_element(writer, "note", note)?;
        }
        for price in &meal.prices {
            let mut price_start = BytesStart::new("price");
            price_start.push_attribute(("role", price.role.as_str()));
            writer.write_event(Event::Start(price_start))?;
            writer.write_event(Event::Text(BytesText::new(&price.to_string())))?;
            writer.write_event(Event::End(BytesEnd::new("price")))?;
        }
        writer.write_event(Event::End(BytesEnd::new("meal")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("category")))?;
    Ok(())
}

/// Comment bodies must not contain `--`; longer runs of dashes need several passes.
fn comment_text(comment: &str) -> String {
    let mut text = comment.to_owned();
    while text.contains("--") {
        text = text.replace("--", "- -");
    }
    text
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::model::{Price, Role};

    fn day(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, day).expect("valid test date")
    }

    #[test]
    fn renders_meals_and_closed_days_in_date_order() {
        let mut builder = FeedBuilder::new();
        builder.set_day_closed(day(7));
        builder.add_meal(
            day(6),
            "Hauptgericht",
            Meal::new("Linsen & Spätzle")
                .with_notes(["vegan"])
                .with_price(Price::new(Role::Student, 250))
                .with_price(Price::new(Role::Other, 480)),
        );

        let xml = builder.to_xml().expect("feed renders");
        let expected = concat!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n",
            "<openmensa version=\"2.1\" xmlns=\"http://openmensa.org/open-mensa-v2\" ",
            "xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\" ",
            "xsi:schemaLocation=\"http://openmensa.org/open-mensa-v2 http://openmensa.org/open-mensa-v2.xsd\">\n",
            "  <canteen>\n",
            "    <day date=\"2024-05-06\">\n",
            "      <category name=\"Hauptgericht\">\n",
            "        <meal>\n",
            "          <name>Linsen &amp; Spätzle</name>\n",
            "          <note>vegan</note>\n",
            "          <price role=\"student\">2.50</price>\n",
            "          <price role=\"other\">4.80</price>\n",
            "        </meal>\n",
            "      </category>\n",
            "    </day>\n",
            "    <day date=\"2024-05-07\">\n",
            "      <closed/>\n",
            "    </day>\n",
            "  </canteen>\n",
            "</openmensa>\n",
        );
        assert_eq!(xml, expected);
    }

    #[test]
    fn rendering_twice_is_identical() {
        let mut builder = FeedBuilder::with_version("0.1.0");
        builder.add_meal(day(6), "Suppe", Meal::new("Tomatensuppe"));
        let first = builder.to_xml_feed().expect("feed renders");
        let second = builder.to_xml_feed().expect("feed renders");
        assert_eq!(first, second);
        assert!(first.contains("<?xml-stylesheet href=\"https://cdn.jsdelivr.net/npm/om-style@1.0.0/basic.css\" type=\"text/css\"?>"));
        assert!(first.contains("<version>0.1.0</version>"));
    }

    #[test]
    fn closing_a_day_drops_meals_and_adding_reopens_it() {
        let mut builder = FeedBuilder::new();
        builder.add_meal(day(6), "Suppe", Meal::new("Tomatensuppe"));
        builder.set_day_closed(day(6));
        assert!(builder.is_closed(day(6)));
        assert!(!builder.has_meals_for(day(6)));

        builder.add_meal(day(6), "Suppe", Meal::new("Erbsensuppe"));
        assert!(!builder.is_closed(day(6)));
        assert!(builder.has_meals_for(day(6)));
        assert_eq!(builder.meal_count(), 1);
    }

    #[test]
    fn long_names_are_split_and_keep_notes_on_first_part() {
        let mut builder = FeedBuilder::new();
        let name = "Gemüse ".repeat(60);
        builder.add_meal(day(6), "Buffet", Meal::new(name).with_notes(["vegetarisch"]));
        assert_eq!(builder.meal_count(), 2);

        let xml = builder.to_xml().expect("feed renders");
        assert_eq!(xml.matches("<note>vegetarisch</note>").count(), 1);
    }

    #[test]
    fn blank_names_are_ignored() {
        let mut builder = FeedBuilder::new();
        builder.add_meal(day(6), "Suppe", Meal::new("   "));
        assert!(builder.is_empty());
    }

    #[test]
    fn legend_codes_move_from_name_to_notes() {
        let mut builder = FeedBuilder::new();
        let pattern = Regex::new(r"(?P<name>\w+)\)\s*(?P<value>[^,]+)").expect("valid pattern");
        builder.set_legend_from_text("1) Farbstoff, a) Gluten", &pattern);
        builder.add_meal(day(6), "Essen", Meal::new("Schnitzel (1,a) mit Pommes (Beilage)"));

        let xml = builder.to_xml().expect("feed renders");
        assert!(xml.contains("<name>Schnitzel mit Pommes (Beilage)</name>"));
        assert!(xml.contains("<note>Farbstoff</note>"));
        assert!(xml.contains("<note>Gluten</note>"));
    }

    #[test]
    fn comments_are_appended_and_sanitized() {
        let mut builder = FeedBuilder::new();
        builder.append_comment("odd -- markup");
        let xml = builder.to_xml().expect("feed renders");
        assert!(xml.ends_with("<!-- odd - - markup -->\n"));

        for raw in ["menu --- closed", "a---b", "----"] {
            let mut builder = FeedBuilder::new();
            builder.append_comment(raw);
            let xml = builder.to_xml().expect("feed renders");
            let start = xml.rfind("<!--").expect("comment rendered") + "<!--".len();
            let end = xml.rfind("-->").expect("comment closed");
            let body = xml.get(start..end).expect("comment body");
            assert!(!body.contains("--"), "{raw:?} rendered as {body:?}");
            assert!(!body.ends_with('-'), "{raw:?} rendered as {body:?}");
        }
    }

    #[test]
    fn long_categories_are_merged() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 4).expect("valid date");
        let category = "Tagesangebot ".repeat(25);
        let mut builder = FeedBuilder::new();
        builder.add_meal(date, &category, Meal::new("Suppe"));
        builder.add_meal(date, &category, Meal::new("Salat"));
        let xml = builder.to_xml().expect("feed renders");
        assert_eq!(xml.matches("<category ").count(), 1);
        assert_eq!(builder.meal_count(), 2);
    }
}
