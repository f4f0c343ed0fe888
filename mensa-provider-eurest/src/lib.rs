//! Parser for the weekly menu plans published by Eurest Austria.
//!
//! Each canteen has one XML document per week:
//!
//! ```xml
//! <menuplan>
//!   <day date="2024-03-04">
//!     <menu category="Menü 1">
//!       <name>Wiener Schnitzel</name>
//!       <description>mit Erdäpfelsalat</description>
//!       <allergens>A, C, G</allergens>
//!       <price>7,90</price>
//!     </menu>
//!   </day>
//! </menuplan>
//! ```

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use quick_xml::Reader;
use quick_xml::events::Event;
use reqwest::Client;
use tracing::{debug, info};

use mensa_core::reader::{attribute, element_name, text_content};
use mensa_core::{
    CachedFetcher, CanteenRegistry, FeedBuilder, FeedKind, Meal, MenuPort, MetaDocument, ParserId,
    ParserMeta, ParserPlugin, Parsers, PortError, Price, Role, UrlTemplate, extract_date,
    now_berlin,
};

const CANTEENS: &str = include_str!("../canteens.json");
const CURRENT_WEEK_URL: &str = "https://menuplan.eurest.at/CurrentWeek/";
const NEXT_WEEK_URL: &str = "https://menuplan.eurest.at/NextWeek/";
const SOURCE_URL: &str = "https://menuplan.eurest.at/menu.html?current_url=%2FCurrentWeek%2F";
const CACHE_SIZE: usize = 20;

/// A `<menu>` element while it is being read.
#[derive(Debug, Default)]
struct PendingMenu {
    category: String,
    name: String,
    description: String,
    allergens: String,
    price: String,
}

impl PendingMenu {
    fn set(&mut self, field: &str, value: String) {
        match field {
            "name" => self.name = value,
            "description" => self.description = value,
            "allergens" => self.allergens = value,
            "price" => self.price = value,
            _ => {}
        }
    }

    fn into_meal(self) -> (String, Meal) {
        let name = if self.description.is_empty() {
            self.name
        } else {
            format!("{} {}", self.name, self.description)
        };
        let notes: Vec<String> = self
            .allergens
            .split(',')
            .map(|code| code.trim().to_owned())
            .collect();
        let mut meal = Meal::new(name).with_notes(notes);
        if let Some(price) = Price::parse(Role::Other, &self.price) {
            meal = meal.with_price(price);
        }
        (self.category, meal)
    }
}

/// Menu parser for Eurest canteens.
pub struct EurestPort {
    fetcher: CachedFetcher,
    meta: ParserMeta,
    canteens: CanteenRegistry,
}

impl EurestPort {
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
impl MenuPort for EurestPort {
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
        let source = format!("{SOURCE_URL}{}.xml", urlencoding::encode(&canteen.id));
        MetaDocument::for_canteen(canteen)
            .with_feeds(self.feed_kinds(), urls, reference, Some(&source))
            .render()
    }

    async fn feed(&self, reference: &str, kind: FeedKind) -> Result<String, PortError> {
        let canteen = self.canteens.get(reference)?;
        if kind != FeedKind::Week {
            return Err(PortError::UnsupportedFeed);
        }

        let url = week_url(now_berlin().date_naive(), &canteen.id);
        let xml = self.fetcher.get_text(&url).await?;

        let mut builder = FeedBuilder::new();
        parse_week(&xml, &mut builder)?;
        info!(reference, meals = builder.meal_count(), "eurest feed ready");
        builder.to_xml_feed()
    }
}

/// Build the plugin bundle for the Eurest parser.
///
/// # Errors
///
/// Returns [`PortError::Json`] if the embedded registry is malformed.
pub fn plugin(client: Client) -> Result<ParserPlugin, PortError> {
    Ok(ParserPlugin::new(EurestPort::new(client)?))
}

fn parser_meta() -> ParserMeta {
    ParserMeta {
        id: ParserId::from(Parsers::Eurest),
        name: String::from("Eurest"),
    }
}

/// The site switches `CurrentWeek` over to the coming week at weekends.
fn week_url(today: NaiveDate, id: &str) -> String {
    let base = if today.weekday().num_days_from_monday() > 4 {
        CURRENT_WEEK_URL
    } else {
        NEXT_WEEK_URL
    };
    format!("{base}{}.xml", urlencoding::encode(id))
}

fn parse_week(xml: &str, builder: &mut FeedBuilder) -> Result<(), PortError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut date: Option<NaiveDate> = None;
    let mut day_meals = 0_usize;
    let mut menu: Option<PendingMenu> = None;
    let mut field: Option<String> = None;

    loop {
        match reader.read_event()? {
            Event::Start(start) => match element_name(&start).as_str() {
                "day" => {
                    date = attribute(&start, "date")?.as_deref().and_then(extract_date);
                    day_meals = 0;
                }
                "menu" => {
                    menu = Some(PendingMenu {
                        category: attribute(&start, "category")?.unwrap_or_default(),
                        ..PendingMenu::default()
                    });
                }
                other => field = Some(other.to_owned()),
            },
            Event::Empty(empty) => {
                if element_name(&empty) == "day" {
                    if let Some(closed) = attribute(&empty, "date")?.as_deref().and_then(extract_date) {
                        builder.set_day_closed(closed);
                    }
                }
            }
            Event::Text(text) => {
                if let (Some(pending), Some(name)) = (menu.as_mut(), field.as_deref()) {
                    pending.set(name, text_content(&text)?);
                }
            }
            Event::End(end) => match String::from_utf8_lossy(end.local_name().as_ref()).as_ref() {
                "menu" => {
                    if let (Some(day), Some(pending)) = (date, menu.take()) {
                        let (category, meal) = pending.into_meal();
                        builder.add_meal(day, &category, meal);
                        day_meals += 1;
                    }
                }
                "day" => {
                    if let Some(day) = date.take() {
                        if day_meals == 0 {
                            debug!(%day, "no menus, marking closed");
                            builder.set_day_closed(day);
                        }
                    }
                }
                _ => field = None,
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const WEEK: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
        <menuplan>
          <day date="2024-03-04">
            <menu category="Menü 1">
              <name>Wiener Schnitzel</name>
              <description>mit Erdäpfelsalat</description>
              <allergens>A, C, G</allergens>
              <price>7,90</price>
            </menu>
            <menu category="Suppe">
              <name>Frittatensuppe &amp; Brot</name>
            </menu>
          </day>
          <day date="2024-03-05"></day>
          <day date="2024-03-06"/>
        </menuplan>"#;

    fn day(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).expect("valid date")
    }

    #[test]
    fn registry_is_not_empty() {
        let port = EurestPort::new(Client::new()).expect("registry loads");
        assert!(!port.references().is_empty());
    }

    #[test]
    fn picks_week_document_by_weekday() {
        assert_eq!(
            week_url(day(4), "WU Mensa"),
            "https://menuplan.eurest.at/NextWeek/WU%20Mensa.xml"
        );
        assert_eq!(
            week_url(day(9), "WU_Mensa"),
            "https://menuplan.eurest.at/CurrentWeek/WU_Mensa.xml"
        );
    }

    #[test]
    fn reads_menus_and_closed_days() {
        let mut builder = FeedBuilder::new();
        parse_week(WEEK, &mut builder).expect("week parses");

        assert_eq!(builder.meal_count(), 2);
        assert!(builder.has_meals_for(day(4)));
        assert!(builder.is_closed(day(5)));
        assert!(builder.is_closed(day(6)));

        let xml = builder.to_xml().expect("feed renders");
        assert!(xml.contains("<name>Wiener Schnitzel mit Erdäpfelsalat</name>"));
        assert!(xml.contains("<note>C</note>"));
        assert!(xml.contains("<price role=\"other\">7.90</price>"));
        assert!(xml.contains("<name>Frittatensuppe &amp; Brot</name>"));
    }

    #[tokio::test]
    async fn unknown_reference_is_reported() {
        let port = EurestPort::new(Client::new()).expect("registry loads");
        let urls = UrlTemplate::new("https://example.org", "eurest");
        assert!(matches!(
            port.meta("nope", &urls).await,
            Err(PortError::UnknownCanteen(_))
        ));
    }
}
