//! Parser for the day plan of the WU Wien mensa.
//!
//! The plan is a single XML document whose dates carry no year:
//!
//! ```xml
//! <tagesplan>
//!   <tag datum="04.03.">
//!     <menue>
//!       <kategorie>Classic</kategorie>
//!       <bezeichnung>Gemüselaibchen</bezeichnung>
//!       <allergene>A, C</allergene>
//!       <preis>4,90</preis>
//!       <preis_extern>6,40</preis_extern>
//!     </menue>
//!   </tag>
//! </tagesplan>
//! ```

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use quick_xml::Reader;
use quick_xml::events::Event;
use regex::Regex;
use reqwest::Client;
use tracing::{info, warn};

use mensa_core::reader::{attribute, element_name, text_content};
use mensa_core::{
    CachedFetcher, CanteenRegistry, FeedBuilder, FeedKind, Meal, MenuPort, MetaDocument, ParserId,
    ParserMeta, ParserPlugin, Parsers, PortError, Price, Role, UrlTemplate, now_berlin,
};

const CANTEENS: &str = include_str!("../canteens.json");
const MEALS_URL: &str = "http://www.eurest.at/wumensa/app/app_tagesplan.xml";
const SOURCE_URL: &str = "http://wumensa.at/";
const CACHE_SIZE: usize = 20;

static DAY_MONTH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,2})\.\s*(\d{1,2})\.?").expect("valid day pattern"));

#[derive(Debug, Default)]
struct PendingMenu {
    category: String,
    name: String,
    allergens: String,
    student: String,
    other: String,
}

impl PendingMenu {
    fn set(&mut self, field: &str, value: String) {
        match field {
            "kategorie" => self.category = value,
            "bezeichnung" => self.name = value,
            "allergene" => self.allergens = value,
            "preis" => self.student = value,
            "preis_extern" => self.other = value,
            _ => {}
        }
    }

    fn into_meal(self) -> (String, Meal) {
        let notes: Vec<String> = self
            .allergens
            .split(',')
            .map(|code| code.trim().to_owned())
            .collect();
        let prices = [
            Price::parse(Role::Student, &self.student),
            Price::parse(Role::Other, &self.other),
        ];
        let category = if self.category.is_empty() {
            String::from("Menü")
        } else {
            self.category
        };
        (
            category,
            Meal::new(self.name)
                .with_notes(notes)
                .with_prices(prices.into_iter().flatten()),
        )
    }
}

/// Menu parser for the WU Wien mensa.
pub struct WuWienPort {
    fetcher: CachedFetcher,
    meta: ParserMeta,
    canteens: CanteenRegistry,
}

impl WuWienPort {
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
impl MenuPort for WuWienPort {
    fn parser(&self) -> &ParserMeta {
        &self.meta
    }

    fn references(&self) -> Vec<String> {
        self.canteens.references()
    }

    fn feed_kinds(&self) -> &'static [FeedKind] {
        &[FeedKind::Today]
    }

    fn json(&self, urls: &UrlTemplate) -> Result<String, PortError> {
        self.canteens.json(urls)
    }

    async fn meta(&self, reference: &str, urls: &UrlTemplate) -> Result<String, PortError> {
        let canteen = self.canteens.get(reference)?;
        MetaDocument::for_canteen(canteen)
            .with_feeds(self.feed_kinds(), urls, reference, Some(SOURCE_URL))
            .render()
    }

    async fn feed(&self, reference: &str, kind: FeedKind) -> Result<String, PortError> {
        self.canteens.get(reference)?;
        if kind != FeedKind::Today {
            return Err(PortError::UnsupportedFeed);
        }

        let xml = self.fetcher.get_text(MEALS_URL).await?;
        let mut builder = FeedBuilder::new();
        parse_plan(&xml, plan_year(now_berlin().date_naive()), &mut builder)?;
        info!(reference, meals = builder.meal_count(), "wuwien feed ready");
        builder.to_xml_feed()
    }
}

/// Build the plugin bundle for the WU Wien parser.
///
/// # Errors
///
/// Returns [`PortError::Json`] if the embedded registry is malformed.
pub fn plugin(client: Client) -> Result<ParserPlugin, PortError> {
    Ok(ParserPlugin::new(WuWienPort::new(client)?))
}

fn parser_meta() -> ParserMeta {
    ParserMeta {
        id: ParserId::from(Parsers::Wuwien),
        name: String::from("WU Wien"),
    }
}

/// On New Year's Eve the plan already shows the coming year's days.
fn plan_year(today: NaiveDate) -> i32 {
    if today.month() == 12 && today.day() == 31 {
        today.year() + 1
    } else {
        today.year()
    }
}

fn day_in_year(text: &str, year: i32) -> Option<NaiveDate> {
    let caps = DAY_MONTH.captures(text)?;
    let day = caps.get(1)?.as_str().parse().ok()?;
    let month = caps.get(2)?.as_str().parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

fn parse_plan(xml: &str, year: i32, builder: &mut FeedBuilder) -> Result<(), PortError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut date: Option<NaiveDate> = None;
    let mut menu: Option<PendingMenu> = None;
    let mut field: Option<String> = None;

    loop {
        match reader.read_event()? {
            Event::Start(start) => match element_name(&start).as_str() {
                "tag" => {
                    let datum = attribute(&start, "datum")?.unwrap_or_default();
                    date = day_in_year(&datum, year);
                    if date.is_none() {
                        warn!(datum, "unreadable day");
                    }
                }
                "menue" => menu = Some(PendingMenu::default()),
                other => field = Some(other.to_owned()),
            },
            Event::Text(text) => {
                if let (Some(pending), Some(name)) = (menu.as_mut(), field.as_deref()) {
                    pending.set(name, text_content(&text)?);
                }
            }
            Event::End(end) => match String::from_utf8_lossy(end.local_name().as_ref()).as_ref() {
                "menue" => {
                    if let (Some(day), Some(pending)) = (date, menu.take()) {
                        let (category, meal) = pending.into_meal();
                        builder.add_meal(day, &category, meal);
                    }
                }
                "tag" => date = None,
                _ => field = None,
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(())
}
