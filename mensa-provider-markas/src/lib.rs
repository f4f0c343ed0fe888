//! Parser for the weekly menus of Markas school and university canteens.
//!
//! The week table only shows day-of-month numbers; months are inferred from today.

use async_trait::async_trait;
use chrono::{Datelike, Months, NaiveDate};
use once_cell::sync::Lazy;
use reqwest::Client;
use reqwest::header::REFERER;
use scraper::{Html, Selector};
use serde::Deserialize;
use tracing::{info, warn};

use mensa_core::html::{first_text, selector, text};
use mensa_core::{
    CachedFetcher, Canteen, CanteenEntry, CanteenRegistry, FeedBuilder, FeedKind, Meal, MenuPort,
    MetaDocument, ParserId, ParserMeta, ParserPlugin, Parsers, PortError, UrlTemplate, fetch_text,
    now_berlin,
};

const CANTEENS: &str = include_str!("../canteens.json");
const CACHE_SIZE: usize = 20;

static DAY_NUMBER: Lazy<Selector> = Lazy::new(|| selector(".days_container .day"));
static WEEK_TABLE: Lazy<Selector> =
    Lazy::new(|| selector("#settimana table.tabella_menu_settimanale"));
static ROW: Lazy<Selector> = Lazy::new(|| selector("tr"));
static HEADER: Lazy<Selector> = Lazy::new(|| selector("th"));
static DAY_CELL: Lazy<Selector> = Lazy::new(|| selector("td[data-giorno]"));
static DISH: Lazy<Selector> = Lazy::new(|| selector("p.piatto_inline"));

#[derive(Debug, Deserialize)]
struct MarkasCanteen {
    #[serde(flatten)]
    canteen: Canteen,
    domain: String,
    #[serde(default)]
    change_language: Option<String>,
}

impl MarkasCanteen {
    fn page_url(&self) -> String {
        format!(
            "https://{}{}",
            self.domain,
            self.canteen.source.as_deref().unwrap_or_default()
        )
    }
}

impl CanteenEntry for MarkasCanteen {
    fn canteen(&self) -> &Canteen {
        &self.canteen
    }

    fn canteen_mut(&mut self) -> &mut Canteen {
        &mut self.canteen
    }
}

/// Menu parser for Markas canteens.
pub struct MarkasPort {
    fetcher: CachedFetcher,
    meta: ParserMeta,
    canteens: CanteenRegistry<MarkasCanteen>,
}

impl MarkasPort {
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
impl MenuPort for MarkasPort {
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
        let entry = self.canteens.get(reference)?;
        MetaDocument::for_canteen(&entry.canteen)
            .with_feeds(self.feed_kinds(), urls, reference, Some(&entry.page_url()))
            .render()
    }

    async fn feed(&self, reference: &str, kind: FeedKind) -> Result<String, PortError> {
        let entry = self.canteens.get(reference)?;
        if kind != FeedKind::Week {
            return Err(PortError::UnsupportedFeed);
        }

        let page_url = entry.page_url();
        let html = match &entry.change_language {
            Some(lang) => {
                let url = format!("https://{}/change_language/{lang}", entry.domain);
                let request = self.fetcher.client().get(url).header(REFERER, page_url.as_str());
                fetch_text(request).await?
            }
            None => self.fetcher.get_text(&page_url).await?,
        };

        let mut builder = FeedBuilder::new();
        for (date, category, meal) in parse_week(&html, now_berlin().date_naive())? {
            builder.add_meal(date, &category, meal);
        }
        info!(reference, meals = builder.meal_count(), "markas feed ready");
        builder.to_xml_feed()
    }
}

/// Build the plugin bundle for the Markas parser.
///
/// # Errors
///
/// Returns [`PortError::Json`] if the embedded registry is malformed.
pub fn plugin(client: Client) -> Result<ParserPlugin, PortError> {
    Ok(ParserPlugin::new(MarkasPort::new(client)?))
}

fn parser_meta() -> ParserMeta {
    ParserMeta {
        id: ParserId::from(Parsers::Markas),
        name: String::from("Markas"),
    }
}

/// Turn day-of-month numbers into dates around `today`.
///
/// Numbers above today's day belong to the previous month, unless that would make
/// the sequence go backwards, in which case they belong to the current month.
fn resolve_days(today: NaiveDate, numbers: &[u32]) -> Vec<NaiveDate> {
    let this_month = today.with_day(1).unwrap_or(today);
    let mut dates: Vec<NaiveDate> = Vec::new();

    for &number in numbers {
        let month = if number > today.day() {
            this_month.checked_sub_months(Months::new(1))
        } else {
            Some(this_month)
        };
        let Some(mut date) = month.and_then(|month| month.with_day(number)) else {
            warn!(number, "day number outside month");
            continue;
        };
        if dates.last().is_some_and(|last| date < *last) {
            if let Some(next) = date.checked_add_months(Months::new(1)) {
                date = next;
            }
        }
        dates.push(date);
    }
    dates
}

fn dish_name(raw: &str) -> String {
    raw.replace(" *", "").replace("* ", "").replace('*', "").trim().to_owned()
}

fn parse_week(html: &str, today: NaiveDate) -> Result<Vec<(NaiveDate, String, Meal)>, PortError> {
    let document = Html::parse_document(html);

    let numbers: Vec<u32> = document
        .select(&DAY_NUMBER)
        .filter_map(|day| text(&day).parse().ok())
        .collect();
    let dates = resolve_days(today, &numbers);

    let table = document
        .select(&WEEK_TABLE)
        .next()
        .ok_or_else(|| PortError::Layout("no weekly menu table".to_owned()))?;

    let mut meals = Vec::new();
    for row in table.select(&ROW) {
        let Some(category) = first_text(&row, &HEADER) else {
            continue;
        };
        for cell in row.select(&DAY_CELL) {
            let Some(date) = cell
                .value()
                .attr("data-giorno")
                .and_then(|day| day.trim().parse::<usize>().ok())
                .and_then(|day| day.checked_sub(1))
                .and_then(|index| dates.get(index))
            else {
                continue;
            };
            for dish in cell.select(&DISH) {
                let name = dish_name(&dish.text().collect::<String>());
                meals.push((*date, category.clone(), Meal::new(name)));
            }
        }
    }
    Ok(meals)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
    }

    const PAGE: &str = r#"<html><body>
        <div class="days_container">
          <span class="day">26</span><span class="day">27</span><span class="day">28</span>
          <span class="day">1</span><span class="day">2</span><span class="day">oggi</span>
        </div>
        <div id="settimana">
          <table class="tabella_menu_settimanale">
            <tr><td>intestazione</td></tr>
            <tr>
              <th> Primo piatto </th>
              <td data-giorno="1"><p class="piatto_inline">Pasta al pomodoro *</p></td>
              <td data-giorno="4"><p class="piatto_inline">* Risotto</p><p class="piatto_inline">Minestrone</p></td>
              <td data-giorno="9"><p class="piatto_inline">Fuori settimana</p></td>
            </tr>
          </table>
        </div>
        </body></html>"#;

    #[test]
    fn registry_is_not_empty() {
        let port = MarkasPort::new(Client::new()).expect("registry loads");
        assert!(!port.references().is_empty());
    }

    #[test]
    fn resolves_days_across_month_boundary() {
        let today = day(2024, 3, 1);
        assert_eq!(
            resolve_days(today, &[26, 27, 28, 29, 1]),
            vec![day(2024, 2, 26), day(2024, 2, 27), day(2024, 2, 28), day(2024, 2, 29), day(2024, 3, 1)]
        );
        let today = day(2024, 3, 4);
        assert_eq!(
            resolve_days(today, &[4, 5, 6]),
            vec![day(2024, 3, 4), day(2024, 3, 5), day(2024, 3, 6)]
        );
    }

    #[test]
    fn parses_week_table() {
        let meals = parse_week(PAGE, day(2024, 3, 2)).expect("table found");
        let names: Vec<_> = meals
            .iter()
            .map(|(date, category, meal)| (*date, category.as_str(), meal.name.as_str()))
            .collect();
        assert_eq!(
            names,
            vec![
                (day(2024, 2, 26), "Primo piatto", "Pasta al pomodoro"),
                (day(2024, 3, 1), "Primo piatto", "Risotto"),
                (day(2024, 3, 1), "Primo piatto", "Minestrone"),
            ]
        );
    }

    #[test]
    fn missing_table_is_a_layout_error() {
        assert!(matches!(
            parse_week("<html></html>", day(2024, 3, 2)),
            Err(PortError::Layout(_))
        ));
    }

    #[tokio::test]
    async fn unknown_reference_is_reported() {
        let port = MarkasPort::new(Client::new()).expect("registry loads");
        assert!(matches!(
            port.feed("nope", FeedKind::Week).await,
            Err(PortError::UnknownCanteen(_))
        ));
    }
}
