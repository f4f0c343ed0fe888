//! Parser for the Studierendenwerk Greifswald, one page per canteen and day.

use async_trait::async_trait;
use chrono::{Datelike, Days, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector};
use tracing::{debug, info};

use mensa_core::html::{selector, text};
use mensa_core::{
    CachedFetcher, CanteenRegistry, FeedBuilder, FeedKind, Meal, MenuPort, MetaDocument, ParserId,
    ParserMeta, ParserPlugin, Parsers, PortError, STUDENT_EMPLOYEE_OTHER, UrlTemplate, now_berlin,
    role_prices,
};

const CANTEENS: &str = include_str!("../canteens.json");
const BASE_URL: &str = "https://www.stw-greifswald.de/essen/speiseplaene/";
const CACHE_SIZE: usize = 20;
/// Upper bound for the full feed, which otherwise walks forward until a weekday has no meals.
const MAX_FULL_DAYS: u64 = 42;
const LEGEND_MARKER: &str = "KENNZEICHNUNGSPFLICHTIGE ZUSATZSTOFFE";

static LEGEND_BOX: Lazy<Selector> = Lazy::new(|| selector("div.csc-textpic-text"));
static FOOD_TABLE: Lazy<Selector> = Lazy::new(|| selector("table.table.module-food-table"));
static HEADER: Lazy<Selector> = Lazy::new(|| selector("th"));
static ROW: Lazy<Selector> = Lazy::new(|| selector("tbody tr"));
static CELL: Lazy<Selector> = Lazy::new(|| selector("td"));
static LEGEND_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?P<name>(\d|[a-zA-Z])+)\)\s*(?P<value>([\w/]+)((\s+\w+)*[^0-9)]))")
        .expect("valid legend pattern")
});

/// Everything one day page contributes to a feed.
#[derive(Debug, Default)]
struct DayPage {
    legend: Option<String>,
    meals: Vec<(String, Meal)>,
}

/// Menu parser for the Studierendenwerk Greifswald.
pub struct GreifswaldPort {
    fetcher: CachedFetcher,
    meta: ParserMeta,
    canteens: CanteenRegistry,
}

impl GreifswaldPort {
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

    /// Add one day to the builder; returns whether the walk should continue.
    async fn load_day(
        &self,
        builder: &mut FeedBuilder,
        reference: &str,
        date: NaiveDate,
    ) -> Result<bool, PortError> {
        if date.weekday().num_days_from_monday() > 4 {
            builder.set_day_closed(date);
            return Ok(true);
        }

        let url = format!("{BASE_URL}{reference}/?datum={}", date.format("%Y-%m-%d"));
        let html = self.fetcher.get_text(&url).await?;
        let page = parse_page(&html);

        if builder.legend().is_none() {
            if let Some(legend) = &page.legend {
                builder.set_legend_from_text(legend, &LEGEND_PATTERN);
            }
        }
        for (category, meal) in page.meals {
            builder.add_meal(date, &category, meal);
        }
        Ok(builder.has_meals_for(date))
    }
}

#[async_trait]
impl MenuPort for GreifswaldPort {
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
        let canteen = self.canteens.get(reference)?;
        let source = format!("{BASE_URL}{reference}");
        MetaDocument::for_canteen(canteen)
            .with_feeds(self.feed_kinds(), urls, reference, Some(&source))
            .render()
    }

    async fn feed(&self, reference: &str, kind: FeedKind) -> Result<String, PortError> {
        self.canteens.get(reference)?;
        let today = now_berlin().date_naive();
        let mut builder = FeedBuilder::new();

        match kind {
            FeedKind::Today => {
                self.load_day(&mut builder, reference, today).await?;
            }
            FeedKind::Full => {
                let mut date = today;
                while self.load_day(&mut builder, reference, date).await? {
                    date = date + Days::new(1);
                    if date > today + Days::new(MAX_FULL_DAYS) {
                        debug!(reference, "stopping full feed at day limit");
                        break;
                    }
                }
            }
            FeedKind::Week => return Err(PortError::UnsupportedFeed),
        }

        info!(reference, meals = builder.meal_count(), "greifswald feed ready");
        builder.to_xml_feed()
    }
}

/// Build the plugin bundle for the Greifswald parser.
///
/// # Errors
///
/// Returns [`PortError::Json`] if the embedded registry is malformed.
pub fn plugin(client: Client) -> Result<ParserPlugin, PortError> {
    Ok(ParserPlugin::new(GreifswaldPort::new(client)?))
}

fn parser_meta() -> ParserMeta {
    ParserMeta {
        id: ParserId::from(Parsers::Greifswald),
        name: String::from("Studierendenwerk Greifswald"),
    }
}

fn parse_page(html: &str) -> DayPage {
    let document = Html::parse_document(html);
    let mut page = DayPage::default();

    page.legend = document
        .select(&LEGEND_BOX)
        .map(|legend_box| legend_box.text().collect::<String>())
        .find(|content| content.contains(LEGEND_MARKER))
        .map(|content| {
            content
                .replace("KENNZEICHNUNGSPFLICHTIGE ALLERGENE:", "")
                .replace("KENNZEICHNUNGSPFLICHTIGE ZUSATZSTOFFE:", "")
                .replace("SONSTIGE KENNZEICHNUNGEN:", "")
        });

    for table in document.select(&FOOD_TABLE) {
        let category = table
            .select(&HEADER)
            .next()
            .map(|header| text(&header))
            .unwrap_or_default();

        for row in table.select(&ROW) {
            let Some(cell) = row.select(&CELL).next() else {
                continue;
            };
            let content = cell.text().collect::<String>();
            let mut name = String::new();
            let mut prices = Vec::new();

            for line in content.trim().split('\n') {
                if line.contains('€') {
                    let parts: Vec<&str> = line.trim().split("\u{a0}€").take(3).collect();
                    prices = role_prices(&parts, &STUDENT_EMPLOYEE_OTHER);
                } else if line.chars().count() > 1 {
                    name.push_str(line.trim());
                    name.push(' ');
                }
            }

            page.meals
                .push((category.clone(), Meal::new(name).with_prices(prices)));
        }
    }

    page
}
