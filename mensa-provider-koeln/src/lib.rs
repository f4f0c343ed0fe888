//! Parser for the Kölner Studierendenwerk menu pages.
//!
//! One page per day lists every canteen; each canteen is a
//! `tx-epwerkmenu-menu-location-wrapper` div with its site id in `data-location`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, Days, NaiveDate};
use futures::future::join_all;
use once_cell::sync::Lazy;
use reqwest::Client;
use scraper::{Html, Selector};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use mensa_core::html::{first_text, selector, text, text_without};
use mensa_core::{
    Canteen, CanteenEntry, CanteenRegistry, CachedFetcher, FeedBuilder, FeedKind, Meal, MenuPort,
    MetaDocument, ParserId, ParserMeta, ParserPlugin, Parsers, PortError, Price,
    STUDENT_EMPLOYEE_OTHER, UrlTemplate, now_berlin,
};

const CANTEENS: &str = include_str!("../canteens.json");
const MEALS_URL: &str = "https://www.kstw.de/speiseplan";
const SOURCE_URL: &str = "https://www.kstw.de/speiseplan?l=";
const CACHE_SIZE: usize = 30;
const CACHE_MAX_AGE: Duration = Duration::from_secs(30 * 60);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const MAX_DAYS: usize = 5;

static LOCATION: Lazy<Selector> = Lazy::new(|| selector("div.tx-epwerkmenu-menu-location-wrapper"));
static WITH_ID: Lazy<Selector> = Lazy::new(|| selector("[id]"));
static TILE: Lazy<Selector> = Lazy::new(|| selector("div.menue-tile"));
static TITLE: Lazy<Selector> = Lazy::new(|| selector(".tx-epwerkmenu-menu-meal-title"));
static DESCRIPTION: Lazy<Selector> = Lazy::new(|| selector(".tx-epwerkmenu-menu-meal-description"));
static ADDITIVES: Lazy<Selector> = Lazy::new(|| selector(".tx-epwerkmenu-menu-meal-additives"));
static PRICES: Lazy<Selector> = Lazy::new(|| selector(".tx-epwerkmenu-menu-meal-prices-values"));
static SUP: Lazy<Selector> = Lazy::new(|| selector("sup"));

#[derive(Debug, Deserialize)]
struct KoelnCanteen {
    #[serde(flatten)]
    canteen: Canteen,
    strasse: String,
    plz: String,
    ort: String,
    #[serde(default)]
    infokurz: String,
}

impl CanteenEntry for KoelnCanteen {
    fn canteen(&self) -> &Canteen {
        &self.canteen
    }

    fn canteen_mut(&mut self) -> &mut Canteen {
        &mut self.canteen
    }
}

/// What one day page says about a canteen.
#[derive(Debug, Clone, PartialEq)]
enum DayMenu {
    /// Meals keyed by category, in page order.
    Meals(Vec<(String, Meal)>),
    /// Listed on the site but nothing served.
    Closed,
    /// Not on the page at all.
    Missing,
}

/// Menu parser for the Kölner Studierendenwerk.
pub struct KoelnPort {
    fetcher: CachedFetcher,
    meta: ParserMeta,
    canteens: CanteenRegistry<KoelnCanteen>,
    location_ids: String,
}

impl KoelnPort {
    /// Create the parser with its embedded canteen registry.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::Json`] if the embedded registry is malformed.
    pub fn new(client: Client) -> Result<Self, PortError> {
        let canteens = CanteenRegistry::<KoelnCanteen>::from_json_keyed_by_id(CANTEENS)?;
        let location_ids = canteens
            .iter()
            .map(|(_, entry)| entry.canteen.id.as_str())
            .collect::<Vec<_>>()
            .join(",");
        Ok(Self {
            fetcher: CachedFetcher::new(client, CACHE_SIZE)
                .with_max_age(CACHE_MAX_AGE)
                .with_timeout(REQUEST_TIMEOUT),
            meta: parser_meta(),
            canteens,
            location_ids,
        })
    }

    async fn fetch_day(&self, location: &str, date: NaiveDate) -> Result<DayMenu, PortError> {
        let url = format!("{MEALS_URL}?l={}&t={}", self.location_ids, date.format("%Y-%m-%d"));
        let html = self.fetcher.get_text(&url).await?;
        Ok(parse_day(&html, location))
    }
}

#[async_trait]
impl MenuPort for KoelnPort {
    fn parser(&self) -> &ParserMeta {
        &self.meta
    }

    fn references(&self) -> Vec<String> {
        self.canteens.references()
    }

    fn feed_kinds(&self) -> &'static [FeedKind] {
        &[FeedKind::Today, FeedKind::Full]
    }

    fn json(&self, urls: &UrlTemplate) -> Result<String, PortError> {
        self.canteens.json(urls)
    }

    async fn meta(&self, reference: &str, urls: &UrlTemplate) -> Result<String, PortError> {
        let entry = self.canteens.get(reference)?;
        let canteen = Canteen {
            address: format!(
                "{} {} {} {}",
                entry.canteen.name, entry.strasse, entry.plz, entry.ort
            ),
            city: entry.ort.clone(),
            times: Some(entry.infokurz.clone()),
            ..entry.canteen.clone()
        };
        let source = format!("{SOURCE_URL}{}", entry.canteen.id);
        MetaDocument::for_canteen(&canteen)
            .with_feeds(self.feed_kinds(), urls, reference, Some(&source))
            .render()
    }

    async fn feed(&self, reference: &str, kind: FeedKind) -> Result<String, PortError> {
        let location = self.canteens.get(reference)?.canteen.id.clone();
        if kind == FeedKind::Week {
            return Err(PortError::UnsupportedFeed);
        }

        let today = now_berlin().date_naive();
        let mut builder = FeedBuilder::new();
        let found = apply_day(&mut builder, today, self.fetch_day(&location, today).await?);

        if kind == FeedKind::Full && found {
            let dates = following_days(today);
            let results = join_all(dates.iter().map(|date| self.fetch_day(&location, *date))).await;
            for (date, result) in dates.into_iter().zip(results) {
                match result {
                    Ok(day) => {
                        apply_day(&mut builder, date, day);
                    }
                    Err(err) => warn!(%date, reference, "failed to fetch day: {err}"),
                }
            }
        }

        info!(reference, meals = builder.meal_count(), "koeln feed ready");
        builder.to_xml_feed()
    }
}

/// Build the plugin bundle for the Köln parser.
///
/// # Errors
///
/// Returns [`PortError::Json`] if the embedded registry is malformed.
pub fn plugin(client: Client) -> Result<ParserPlugin, PortError> {
    Ok(ParserPlugin::new(KoelnPort::new(client)?))
}

fn parser_meta() -> ParserMeta {
    ParserMeta {
        id: ParserId::from(Parsers::Koeln),
        name: String::from("Kölner Studierendenwerk"),
    }
}

/// Days after `today` to fetch: the rest of this week, then next week, at most
/// [`MAX_DAYS`] days counting today.
fn following_days(today: NaiveDate) -> Vec<NaiveDate> {
    let mut dates = Vec::new();
    let mut date = today + Days::new(1);
    let mut count = 1;

    while date.weekday().num_days_from_monday() < 5 {
        dates.push(date);
        date = date + Days::new(1);
        count += 1;
    }

    date = date + Days::new(u64::from(7 - date.weekday().num_days_from_monday()));

    while date.weekday().num_days_from_monday() < 5 && count < MAX_DAYS {
        dates.push(date);
        date = date + Days::new(1);
        count += 1;
    }
    dates
}

/// Feed one day into the builder; returns whether any meal was found.
fn apply_day(builder: &mut FeedBuilder, date: NaiveDate, day: DayMenu) -> bool {
    match day {
        DayMenu::Meals(meals) if !meals.is_empty() => {
            for (category, meal) in meals {
                builder.add_meal(date, &category, meal);
            }
            true
        }
        DayMenu::Meals(_) | DayMenu::Closed => {
            builder.set_day_closed(date);
            false
        }
        DayMenu::Missing => false,
    }
}

fn parse_day(html: &str, location: &str) -> DayMenu {
    let document = Html::parse_document(html);
    let wrappers: Vec<_> = document
        .select(&LOCATION)
        .filter(|wrapper| wrapper.value().attr("data-location") == Some(location))
        .collect();

    let [wrapper] = wrappers.as_slice() else {
        let checkbox = format!("building-id-{location}");
        if document
            .select(&WITH_ID)
            .any(|element| element.value().id() == Some(checkbox.as_str()))
        {
            debug!(location, "no meals found");
            return DayMenu::Closed;
        }
        error!(location, "mensa not found");
        return DayMenu::Missing;
    };

    let mut meals = Vec::new();
    for tile in wrapper.select(&TILE) {
        let category = capwords(tile.value().attr("data-category").unwrap_or_default());
        let mut name = first_text(&tile, &TITLE).unwrap_or_default();
        if let Some(description) = first_text(&tile, &DESCRIPTION).filter(|desc| !desc.is_empty()) {
            name = format!("{name} {description}");
        }

        let notes = tile
            .select(&ADDITIVES)
            .next()
            .map(|additives| text_without(&additives, &SUP))
            .unwrap_or_default();

        let prices = tile
            .select(&PRICES)
            .next()
            .map(|prices| {
                text(&prices)
                    .split('/')
                    .zip(STUDENT_EMPLOYEE_OTHER)
                    .filter_map(|(amount, role)| Price::parse(role, amount))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        meals.push((category, Meal::new(name).with_notes(notes).with_prices(prices)));
    }

    if meals.is_empty() {
        DayMenu::Closed
    } else {
        DayMenu::Meals(meals)
    }
}

/// Upper-case the first letter of every word and lower-case the rest.
fn capwords(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect()
            })
        })
        .collect::<Vec<_>>()
        .join(" ")
}
