//! Parser for the winEsel menu plans hosted on login.mampf1a.de.
//!
//! A reference has the form `customer[.typ][~suffix]`. The part after the dot
//! selects the plan, the `~suffix` only keeps references unique.
//!
//! Plans come in two layouts: dates as columns of a `thead` (horizontal) or
//! dates as rows with nested tables per category (vertical).

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, warn};

use mensa_core::html::{child_elements, first_text, has_class, lines, selector, text, text_without};
use mensa_core::{
    CachedFetcher, CanteenRegistry, FeedBuilder, FeedKind, Meal, MenuPort, MetaDocument, ParserId,
    ParserMeta, ParserPlugin, Parsers, PortError, Price, Role, UrlTemplate, now_berlin,
};

const CANTEENS: &str = include_str!("../canteens.json");
const CACHE_SIZE: usize = 30;
const FEED_URL: &str = "https://login.mampf1a.de/{reference}/winEsel5/speiseplan.php?no_cache=1{params}";
const SOURCE_URL: &str = "https://login.mampf1a.de/{reference}/winEsel5/speiseplan.php?{params}";

static DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,2})\.(\d{1,2})\.(\d{0,4})").expect("valid date pattern"));
static LEGEND_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([-+\w]+)\s+-\s+(.+)$").expect("valid legend pattern"));
static PRICE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d+(?:,\d\d)?)\s+(?:€|eur)").expect("valid price pattern"));

static LEGEND: Lazy<Selector> = Lazy::new(|| selector(r#"div[style="padding-bottom: 8px;"]"#));
static THEAD: Lazy<Selector> = Lazy::new(|| selector("table.std thead"));
static CELL: Lazy<Selector> = Lazy::new(|| selector("td"));
static CONTENT_CELL: Lazy<Selector> = Lazy::new(|| selector("td.zelle_inhalt"));
static LINK: Lazy<Selector> = Lazy::new(|| selector("a"));
static ADDITIVE_IMAGE: Lazy<Selector> = Lazy::new(|| selector(".additive img[alt]"));
static SMALL_ADDITIVE: Lazy<Selector> = Lazy::new(|| selector(r#"div[style*="font-size:10px"] span"#));
static PLAN_ROW: Lazy<Selector> = Lazy::new(|| selector("table.std > tbody > tr, table.std > tr"));
static CATEGORY_HEADER: Lazy<Selector> = Lazy::new(|| selector("td.zelleF"));
static NESTED_CELL: Lazy<Selector> = Lazy::new(|| selector("table td"));
static TITLE: Lazy<Selector> = Lazy::new(|| selector(".speiseplan__titel"));
static ADDITIVE_SPAN: Lazy<Selector> = Lazy::new(|| selector(".speiseplan__zusatzstoffe span"));
static PRICE_CELL: Lazy<Selector> = Lazy::new(|| selector(".speiseplan__preis"));

/// Menu parser for mampf1a.de.
pub struct Mampf1aPort {
    fetcher: CachedFetcher,
    meta: ParserMeta,
    canteens: CanteenRegistry,
}

impl Mampf1aPort {
    /// Create the parser with its embedded canteen registry.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::Json`] if the embedded registry is malformed.
    pub fn new(client: Client) -> Result<Self, PortError> {
        Ok(Self {
            fetcher: CachedFetcher::new(client, CACHE_SIZE),
            meta: parser_meta(),
            canteens: CanteenRegistry::from_json(CANTEENS)?,
        })
    }
}

#[async_trait]
impl MenuPort for Mampf1aPort {
    fn parser(&self) -> &ParserMeta {
        &self.meta
    }

    fn references(&self) -> Vec<String> {
        self.canteens.references()
    }

    fn feed_kinds(&self) -> &'static [FeedKind] {
        &[FeedKind::Week]
    }

    fn json(&self, urls: &UrlTemplate) -> Result<String, PortError> {
        self.canteens.json(urls)
    }

    async fn meta(&self, reference: &str, urls: &UrlTemplate) -> Result<String, PortError> {
        let canteen = self.canteens.get(reference)?;
        MetaDocument::for_canteen(canteen)
            .with_feeds(self.feed_kinds(), urls, reference, Some(&build_url(reference, SOURCE_URL)))
            .render()
    }

    async fn feed(&self, reference: &str, kind: FeedKind) -> Result<String, PortError> {
        self.canteens.get(reference)?;
        if kind != FeedKind::Week {
            return Err(PortError::UnsupportedFeed);
        }

        let html = self.fetcher.get_text(&build_url(reference, FEED_URL)).await?;
        let mut builder = FeedBuilder::new();
        parse_plan(&html, now_berlin().date_naive(), &mut builder);
        info!(reference, meals = builder.meal_count(), "mampf1a feed ready");
        builder.to_xml_feed()
    }
}

/// Build the plugin bundle for the mampf1a parser.
///
/// # Errors
///
/// Returns [`PortError::Json`] if the embedded registry is malformed.
pub fn plugin(client: Client) -> Result<ParserPlugin, PortError> {
    Ok(ParserPlugin::new(Mampf1aPort::new(client)?))
}

fn parser_meta() -> ParserMeta {
    ParserMeta {
        id: ParserId::from(Parsers::Mampf1a),
        name: String::from("mampf1a"),
    }
}

fn build_url(reference: &str, template: &str) -> String {
    let reference = reference.rsplit_once('~').map_or(reference, |(head, _)| head);
    let (customer, params) = match reference.split_once('.') {
        Some((customer, typ)) => (
            customer,
            format!("&typ={}", typ.trim_matches(|c: char| c == '?' || c == '&' || c == ' ')),
        ),
        None => (reference, String::new()),
    };
    template
        .replace("{reference}", customer)
        .replace("{params}", &params)
}

/// Find a `dd.mm.[yyyy]` date. Without a year, months before the current one are next year's.
fn resolve_date(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    let caps = DATE.captures(text)?;
    let day = caps.get(1)?.as_str().parse().ok()?;
    let month: u32 = caps.get(2)?.as_str().parse().ok()?;
    let year_text = caps.get(3).map_or("", |year| year.as_str());
    let year = match year_text.len() {
        0 if month < today.month() => today.year() + 1,
        0 => today.year(),
        2 => 2000 + year_text.parse::<i32>().ok()?,
        _ => year_text.parse().ok()?,
    };
    NaiveDate::from_ymd_opt(year, month, day)
}

fn parse_legend(document: &Html) -> BTreeMap<String, String> {
    let mut legend = BTreeMap::new();
    for div in document.select(&LEGEND) {
        let line = text(&div);
        match LEGEND_LINE.captures(&line) {
            Some(caps) => {
                if let (Some(code), Some(description)) = (caps.get(1), caps.get(2)) {
                    legend.insert(code.as_str().to_owned(), description.as_str().trim().to_owned());
                }
            }
            None => warn!(line, "could not parse legend line"),
        }
    }
    legend
}

fn describe(codes: Vec<String>, legend: &BTreeMap<String, String>) -> Vec<String> {
    codes
        .into_iter()
        .map(|code| legend.get(&code).cloned().unwrap_or(code))
        .collect()
}

/// Parse either plan layout into `builder`.
fn parse_plan(html: &str, today: NaiveDate, builder: &mut FeedBuilder) {
    let document = Html::parse_document(html);
    let legend = parse_legend(&document);

    if document.select(&THEAD).next().is_some() {
        builder.set_legend(legend.clone());
        for thead in document.select(&THEAD) {
            parse_horizontal(&thead, &legend, today, builder);
        }
    } else {
        parse_vertical(&document, &legend, today, builder);
    }
}

fn parse_horizontal(
    thead: &ElementRef<'_>,
    legend: &BTreeMap<String, String>,
    today: NaiveDate,
    builder: &mut FeedBuilder,
) {
    let mut rows = child_elements(thead).filter(|row| row.value().name() == "tr");
    let Some(header) = rows.next() else {
        return;
    };
    let dates: Vec<NaiveDate> = header
        .select(&CELL)
        .filter_map(|cell| resolve_date(&text(&cell), today))
        .collect();

    for row in rows {
        let category = first_text(&row, &CELL).unwrap_or_default();
        for (index, cell) in row.select(&CONTENT_CELL).enumerate() {
            let (Some(date), Some(link)) = (dates.get(index), cell.select(&LINK).next()) else {
                continue;
            };

            let mut notes = Vec::new();
            if has_class(&link, "gruen") {
                notes.push(String::from("fleischlos"));
            }

            let mut codes: Vec<String> = link
                .select(&ADDITIVE_IMAGE)
                .filter_map(|image| image.value().attr("alt"))
                .map(str::trim)
                .filter(|alt| !alt.is_empty())
                .map(str::to_owned)
                .collect();
            for span in cell.select(&SMALL_ADDITIVE) {
                let code = text(&span);
                if !code.is_empty() && !codes.contains(&code) {
                    codes.push(code);
                }
            }
            notes.extend(describe(codes, legend));

            let name = text_without(&link, &SMALL_ADDITIVE)
                .iter()
                .map(|part| part.trim_matches(|c: char| c == ' ' || c == ',').trim())
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            if name.is_empty() {
                continue;
            }

            let cents: u32 = PRICE
                .captures_iter(&name)
                .filter_map(|caps| Price::parse(Role::Student, caps.get(1)?.as_str()))
                .map(|price| price.cents)
                .sum();

            let mut meal = Meal::new(name).with_notes(notes);
            if cents > 0 {
                meal = meal.with_price(Price::new(Role::Student, cents));
            }
            builder.add_meal(*date, &category, meal);
        }
    }
}

fn parse_vertical(
    document: &Html,
    legend: &BTreeMap<String, String>,
    today: NaiveDate,
    builder: &mut FeedBuilder,
) {
    let mut rows = document.select(&PLAN_ROW);
    let Some(header) = rows.next() else {
        warn!("no plan rows found");
        return;
    };
    let categories: Vec<String> = header
        .select(&CATEGORY_HEADER)
        .skip(1)
        .map(|cell| text(&cell))
        .collect();

    for row in rows {
        let mut cells = child_elements(&row);
        let Some(date) = cells.next().and_then(|cell| resolve_date(&text(&cell), today)) else {
            debug!("plan row without date");
            continue;
        };

        for (index, cell) in cells.enumerate() {
            let category = categories
                .get(index)
                .filter(|category| !category.is_empty())
                .cloned()
                .unwrap_or_else(|| format!("Menü {}", index + 1));

            for dish in cell.select(&NESTED_CELL) {
                let mut notes = Vec::new();
                if dish.select(&LINK).next().is_some_and(|link| has_class(&link, "gruen")) {
                    notes.push(String::from("fleischlos"));
                }
                let Some(title) = dish.select(&TITLE).next() else {
                    continue;
                };
                let codes: Vec<String> = dish
                    .select(&ADDITIVE_SPAN)
                    .map(|span| text(&span))
                    .filter(|code| !code.is_empty())
                    .collect();
                notes.extend(describe(codes, legend));

                let mut meal = Meal::new(lines(&title).join(" ")).with_notes(notes);
                if let Some(price) = first_text(&dish, &PRICE_CELL)
                    .and_then(|price| Price::parse(Role::Student, &price))
                {
                    meal = meal.with_price(price);
                }
                builder.add_meal(date, &category, meal);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HORIZONTAL: &str = r#"<html><body>
        <div style="padding-bottom: 8px;">V - vegetarisch</div>
        <div style="padding-bottom: 8px;">1 - mit Farbstoff</div>
        <div style="padding-bottom: 8px;">ohne Trenner</div>
        <table class="std"><thead>
          <tr><td></td><td>Mo 04.03.</td><td>Di 05.03.2024</td></tr>
          <tr>
            <td>Menü 1</td>
            <td class="zelle_inhalt"><a class="gruen">Gemüselasagne, <span class="additive"><img alt="V"></span><div style="font-size:10px"><span>1</span></div> 3,50 €</a></td>
            <td class="zelle_inhalt"></td>
          </tr>
        </thead></table>
        </body></html>"#;

    const VERTICAL: &str = r#"<html><body>
        <div style="padding-bottom: 8px;">V - vegetarisch</div>
        <table class="std">
          <tr><td class="zelleF">Datum</td><td class="zelleF">Mittagessen</td><td class="zelleF"></td></tr>
          <tr>
            <td>Mo, 04.03.</td>
            <td><table><tr><td><a class="gruen"></a><div class="speiseplan__titel">Kartoffelsuppe</div><div class="speiseplan__zusatzstoffe"><span>V</span></div><div class="speiseplan__preis">2,80 €</div></td></tr></table></td>
            <td><table><tr><td><a></a><div class="speiseplan__titel">Schnitzel<br>mit Pommes</div></td></tr></table></td>
          </tr>
        </table>
        </body></html>"#;

    fn day(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
    }

    #[test]
    fn registry_is_not_empty() {
        let port = Mampf1aPort::new(Client::new()).expect("registry loads");
        assert!(!port.references().is_empty());
    }

    #[test]
    fn builds_urls_from_reference() {
        assert_eq!(
            build_url("Kreuzschwestern.Kita-St-Elisabeth~2", FEED_URL),
            "https://login.mampf1a.de/Kreuzschwestern/winEsel5/speiseplan.php?no_cache=1&typ=Kita-St-Elisabeth"
        );
        assert_eq!(
            build_url("esslingen-betriebsrestaurant", SOURCE_URL),
            "https://login.mampf1a.de/esslingen-betriebsrestaurant/winEsel5/speiseplan.php?"
        );
    }

    #[test]
    fn infers_missing_year() {
        assert_eq!(resolve_date("Mo 04.03.", day(2024, 3, 1)), Some(day(2024, 3, 4)));
        assert_eq!(resolve_date("Do 02.01.", day(2024, 12, 30)), Some(day(2025, 1, 2)));
        assert_eq!(resolve_date("02.01.25", day(2024, 12, 30)), Some(day(2025, 1, 2)));
    }

    #[test]
    fn reads_horizontal_plan() {
        let mut builder = FeedBuilder::new();
        parse_plan(HORIZONTAL, day(2024, 3, 1), &mut builder);
        assert_eq!(builder.meal_count(), 1);
        assert!(builder.has_meals_for(day(2024, 3, 4)));

        let xml = builder.to_xml().expect("feed renders");
        assert!(xml.contains("<name>Gemüselasagne 3,50 €</name>"));
        assert!(xml.contains("<note>fleischlos</note>"));
        assert!(xml.contains("<note>vegetarisch</note>"));
        assert!(xml.contains("<note>mit Farbstoff</note>"));
        assert!(xml.contains("<price role=\"student\">3.50</price>"));
    }

    #[test]
    fn reads_vertical_plan() {
        let mut builder = FeedBuilder::new();
        parse_plan(VERTICAL, day(2024, 3, 1), &mut builder);
        assert_eq!(builder.meal_count(), 2);

        let xml = builder.to_xml().expect("feed renders");
        assert!(xml.contains("<category name=\"Mittagessen\">"));
        assert!(xml.contains("<category name=\"Menü 2\">"));
        assert!(xml.contains("<name>Schnitzel mit Pommes</name>"));
        assert!(xml.contains("<note>vegetarisch</note>"));
        assert!(xml.contains("<price role=\"student\">2.80</price>"));
    }

    #[tokio::test]
    async fn unknown_reference_is_reported() {
        let port = Mampf1aPort::new(Client::new()).expect("registry loads");
        assert!(matches!(
            port.feed("nope", FeedKind::Week).await,
            Err(PortError::UnknownCanteen(_))
        ));
    }
}
