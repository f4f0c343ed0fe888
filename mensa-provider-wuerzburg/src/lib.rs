//! Parser for the Studierendenwerk Würzburg menu pages.

use async_trait::async_trait;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector};
use tracing::{debug, error, info};

use mensa_core::html::{first_text, selector, text};
use mensa_core::{
    CachedFetcher, CanteenRegistry, FeedBuilder, FeedKind, Meal, MenuPort, MetaDocument,
    OpeningHours, ParserId, ParserMeta, ParserPlugin, Parsers, PortError, STUDENT_EMPLOYEE_OTHER,
    UrlTemplate, role_prices,
};

const CANTEENS: &str = include_str!("../canteens.json");
const BASE_URL: &str = "https://www.swerk-wue.de/wuerzburg/essen-trinken/mensen-speiseplaene";
const CACHE_SIZE: usize = 20;

const MONTHS: [&str; 12] = [
    "Januar",
    "Februar",
    "März",
    "April",
    "Mai",
    "Juni",
    "Juli",
    "August",
    "September",
    "Oktober",
    "November",
    "Dezember",
];

const DAY_NAMES: [(&str, &str); 7] = [
    ("Montag", "Mo"),
    ("Dienstag", "Di"),
    ("Mittwoch", "Mi"),
    ("Donnerstag", "Do"),
    ("Freitag", "Fr"),
    ("Samstag", "Sa"),
    ("Sonntag", "So"),
];

static LONG_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,2})\.\s*(\p{L}+)\s+(\d{4})").expect("valid date pattern"));

static DAY_MENU: Lazy<Selector> = Lazy::new(|| selector("div.day-menu"));
static DAY_TITLE: Lazy<Selector> = Lazy::new(|| selector("h3"));
static ENTRY: Lazy<Selector> = Lazy::new(|| selector(".day-menu-entries article"));
static MEAL_NAME: Lazy<Selector> = Lazy::new(|| selector("h5"));
static FOOD_ICON: Lazy<Selector> = Lazy::new(|| selector("span.food-icon"));
static ADDITIVE: Lazy<Selector> = Lazy::new(|| selector("div.additive-list li"));
static PRICE: Lazy<Selector> = Lazy::new(|| selector("div.price"));
static OPENING_DAYS: Lazy<Selector> =
    Lazy::new(|| selector("div.opening-time_listing-all div.opening-time_days"));
static DAY_RANGE: Lazy<Selector> = Lazy::new(|| selector("div.opening-time-day-range"));
static TIME_RANGE: Lazy<Selector> = Lazy::new(|| selector("div.opening-times__time"));

/// Menu parser for the Studierendenwerk Würzburg.
pub struct WuerzburgPort {
    fetcher: CachedFetcher,
    meta: ParserMeta,
    canteens: CanteenRegistry,
}

impl WuerzburgPort {
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

    async fn menu_page(&self, reference: &str) -> Result<String, PortError> {
        self.fetcher
            .get_text(&format!("{BASE_URL}/{reference}/menu"))
            .await
    }
}

#[async_trait]
impl MenuPort for WuerzburgPort {
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
        let html = self.menu_page(reference).await?;
        let scraped = opening_times(&html);
        debug!(reference, times = scraped.as_str(), "opening times from page");

        let mut meta = MetaDocument::for_canteen(canteen)
            .with_feeds(self.feed_kinds(), urls, reference, Some(BASE_URL));
        if let Some(hours) = OpeningHours::parse(&scraped) {
            meta = meta.with_times(Some(hours));
        }
        meta.render()
    }

    async fn feed(&self, reference: &str, kind: FeedKind) -> Result<String, PortError> {
        self.canteens.get(reference)?;
        if kind != FeedKind::Week {
            return Err(PortError::UnsupportedFeed);
        }

        let html = self.menu_page(reference).await?;
        let mut builder = FeedBuilder::new();
        for (date, category, meal) in parse_menu(&html) {
            builder.add_meal(date, &category, meal);
        }
        info!(reference, meals = builder.meal_count(), "wuerzburg feed ready");
        builder.to_xml_feed()
    }
}

/// Build the plugin bundle for the Würzburg parser.
///
/// # Errors
///
/// Returns [`PortError::Json`] if the embedded registry is malformed.
pub fn plugin(client: Client) -> Result<ParserPlugin, PortError> {
    Ok(ParserPlugin::new(WuerzburgPort::new(client)?))
}

fn parser_meta() -> ParserMeta {
    ParserMeta {
        id: ParserId::from(Parsers::Wuerzburg),
        name: String::from("Studierendenwerk Würzburg"),
    }
}

/// Parse `Montag, 15. Januar 2024`.
fn parse_long_date(text: &str) -> Option<NaiveDate> {
    let caps = LONG_DATE.captures(text)?;
    let day = caps.get(1)?.as_str().parse().ok()?;
    let month_name = caps.get(2)?.as_str();
    let month = MONTHS.iter().position(|name| *name == month_name)?;
    let year = caps.get(3)?.as_str().parse().ok()?;
    NaiveDate::from_ymd_opt(year, u32::try_from(month).ok()? + 1, day)
}

fn parse_menu(html: &str) -> Vec<(NaiveDate, String, Meal)> {
    let document = Html::parse_document(html);
    let mut meals = Vec::new();

    for day in document.select(&DAY_MENU) {
        let title = first_text(&day, &DAY_TITLE).unwrap_or_default();
        let Some(date) = parse_long_date(&title) else {
            error!(title, "error parsing date");
            continue;
        };

        for entry in day.select(&ENTRY) {
            let name = first_text(&entry, &MEAL_NAME).unwrap_or_default();
            let category = entry
                .select(&FOOD_ICON)
                .next()
                .and_then(|icon| icon.value().attr("title"))
                .unwrap_or_default()
                .trim()
                .to_owned();
            if name.is_empty() || category.is_empty() {
                error!(%date, name, "meal without name or category");
                continue;
            }

            let notes: Vec<String> = entry.select(&ADDITIVE).map(|note| text(&note)).collect();
            let prices = entry
                .select(&PRICE)
                .next()
                .map(|price| {
                    let attrs = ["data-price-student", "data-price-servant", "data-price-guest"]
                        .map(|attr| price.value().attr(attr).unwrap_or_default());
                    role_prices(&attrs, &STUDENT_EMPLOYEE_OTHER)
                })
                .unwrap_or_default();

            debug!(%date, name, category, "meal");
            meals.push((date, category, Meal::new(name).with_notes(notes).with_prices(prices)));
        }
    }
    meals
}

/// Opening times as `Mo - Fr 11:00 - 14:00 Uhr` fragments.
fn opening_times(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut times = String::new();
    for block in document.select(&OPENING_DAYS) {
        let (Some(mut days), Some(range)) = (
            first_text(&block, &DAY_RANGE),
            first_text(&block, &TIME_RANGE),
        ) else {
            continue;
        };
        for (long, short) in DAY_NAMES {
            days = days.replace(long, short);
        }
        times.push(' ');
        times.push_str(&days);
        times.push(' ');
        times.push_str(&range);
    }
    times
}

#[cfg(test)]
mod tests {
    use chrono::Weekday;
    use mensa_core::{Price, Role};

    use super::*;

    const PAGE: &str = r#"<html><body>
        <div class="opening-time_listing-all">
          <div class="opening-time_days">
            <div class="opening-time-day-range">Montag - Donnerstag</div>
            <div class="opening-times__time">11:00 - 14:00 Uhr</div>
          </div>
          <div class="opening-time_days">
            <div class="opening-time-day-range">Freitag</div>
            <div class="opening-times__time">11:00 - 13:30 Uhr</div>
          </div>
        </div>
        <div class="day-menu">
          <h3>Montag, 15. Januar 2024</h3>
          <div class="day-menu-entries">
            <article>
              <h5>Rinderroulade mit Rotkohl</h5>
              <span class="food-icon" title="Rind"></span>
              <div class="additive-list"><ul><li>Sellerie</li><li> </li><li>Senf</li></ul></div>
              <div class="price" data-price-student="3,90 €" data-price-servant="5,40 €" data-price-guest="6,90 €"></div>
            </article>
            <article><h5>Ohne Kategorie</h5></article>
          </div>
        </div>
        <div class="day-menu"><h3>Irgendwann</h3></div>
        </body></html>"#;

    #[test]
    fn registry_is_not_empty() {
        let port = WuerzburgPort::new(Client::new()).expect("registry loads");
        assert!(!port.references().is_empty());
    }

    #[test]
    fn parses_german_long_dates() {
        assert_eq!(
            parse_long_date("Donnerstag, 7. März 2024"),
            NaiveDate::from_ymd_opt(2024, 3, 7)
        );
        assert_eq!(parse_long_date("Montag"), None);
    }

    #[test]
    fn parses_articles() {
        let meals = parse_menu(PAGE);
        assert_eq!(meals.len(), 1);
        let (date, category, meal) = meals.first().expect("one meal");
        assert_eq!(*date, NaiveDate::from_ymd_opt(2024, 1, 15).expect("valid date"));
        assert_eq!(category, "Rind");
        assert_eq!(meal.notes, vec!["Sellerie", "Senf"]);
        assert_eq!(
            meal.prices,
            vec![
                Price::new(Role::Student, 390),
                Price::new(Role::Employee, 540),
                Price::new(Role::Other, 690)
            ]
        );
    }

    #[test]
    fn scrapes_opening_times() {
        let hours = OpeningHours::parse(&opening_times(PAGE)).expect("times parse");
        assert_eq!(hours.on(Weekday::Wed), Some("11:00-14:00"));
        assert_eq!(hours.on(Weekday::Fri), Some("11:00-13:30"));
        assert_eq!(hours.on(Weekday::Sat), None);
    }

    #[tokio::test]
    async fn unknown_reference_is_reported() {
        let port = WuerzburgPort::new(Client::new()).expect("registry loads");
        assert!(matches!(
            port.feed("nope", FeedKind::Week).await,
            Err(PortError::UnknownCanteen(_))
        ));
    }
}
