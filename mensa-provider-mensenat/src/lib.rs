//! Parser for mensen.at, backed by the site's GraphQL API.
//!
//! The API returns each week plan as a JSON string. Dishes are keyed by the
//! number of the weekday relative to `first_day`, not by date.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{Days, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use mensa_core::{
    CanteenRegistry, FeedBuilder, FeedKind, Meal, MenuPort, MetaDocument, ParserId, ParserMeta,
    ParserPlugin, Parsers, PortError, Price, Role, UrlTemplate, fetch_json,
};

const CANTEENS: &str = include_str!("../canteens.json");
const API_URL: &str = "https://backend.mensen.at/api";
const LOCATION_QUERY: &str = r"query Location($locationUri: String!) {
  nodeByUri(uri: $locationUri) {
    ... on Location {
      menuplanCurrentWeek
      menuplanNextWeek
    }
  }
}";

static LOCATION_URI: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https://www\.mensen\.at/standort/(.*?)(?:/|$)").expect("valid location pattern")
});

/// Allergen letters used across Austria.
const ALLERGENS: [(&str, &str); 14] = [
    ("A", "Gluten"),
    ("B", "Krebstiere"),
    ("C", "Eier"),
    ("D", "Fisch"),
    ("E", "Erdnüsse"),
    ("F", "Sojabohnen"),
    ("G", "Milch"),
    ("H", "Schalenfrüchte"),
    ("L", "Sellerie"),
    ("M", "Senf"),
    ("N", "Sesam"),
    ("O", "Schwefeldioxid/Sulfite"),
    ("P", "Lupinen"),
    ("R", "Weichtiere/Schnecken/Muscheln/Tintenfische"),
];

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<GraphQlData>,
}

#[derive(Debug, Deserialize)]
struct GraphQlData {
    #[serde(rename = "nodeByUri")]
    node_by_uri: Option<LocationNode>,
}

#[derive(Debug, Deserialize)]
struct LocationNode {
    #[serde(rename = "menuplanCurrentWeek")]
    current_week: Option<String>,
    #[serde(rename = "menuplanNextWeek")]
    next_week: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WeekPlan {
    #[serde(default)]
    available: bool,
    #[serde(default)]
    first_day: String,
    #[serde(default)]
    menus: Vec<MenuLine>,
}

#[derive(Debug, Deserialize)]
struct MenuLine {
    #[serde(default)]
    name: String,
    menus: Option<BTreeMap<String, Vec<Dish>>>,
}

#[derive(Debug, Deserialize)]
struct Dish {
    #[serde(default)]
    title_de: String,
    #[serde(default)]
    price: Value,
    #[serde(default)]
    allergens: Allergens,
}

#[derive(Debug, Default, Deserialize)]
#[serde(untagged)]
enum Allergens {
    #[default]
    None,
    List(Vec<String>),
    Map(BTreeMap<String, Value>),
}

impl Allergens {
    fn codes(&self) -> Vec<String> {
        match self {
            Allergens::None => Vec::new(),
            Allergens::List(codes) => codes.clone(),
            Allergens::Map(codes) => codes.keys().cloned().collect(),
        }
    }
}

/// Menu parser for mensen.at.
pub struct MensenAtPort {
    client: Client,
    meta: ParserMeta,
    canteens: CanteenRegistry,
}

impl MensenAtPort {
    /// Create the parser with its embedded canteen registry.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::Json`] if the embedded registry is malformed.
    pub fn new(client: Client) -> Result<Self, PortError> {
        Ok(Self {
            client,
            meta: parser_meta(),
            canteens: CanteenRegistry::from_json_keyed_by_id(CANTEENS)?,
        })
    }

    async fn week_plans(&self, location: &str) -> Result<(Option<String>, Option<String>), PortError> {
        let body = json!({
            "query": LOCATION_QUERY,
            "variables": { "locationUri": format!("standort/{location}") },
        });
        let response: GraphQlResponse = fetch_json(self.client.post(API_URL).json(&body)).await?;
        let node = response
            .data
            .and_then(|data| data.node_by_uri)
            .ok_or_else(|| PortError::Layout(format!("no location 'standort/{location}'")))?;
        Ok((node.current_week, node.next_week))
    }
}

#[async_trait]
impl MenuPort for MensenAtPort {
    fn parser(&self) -> &ParserMeta {
        &self.meta
    }

    fn references(&self) -> Vec<String> {
        self.canteens.references()
    }

    fn feed_kinds(&self) -> &'static [FeedKind] {
        &[FeedKind::Week, FeedKind::Today, FeedKind::Full]
    }

    fn json(&self, urls: &UrlTemplate) -> Result<String, PortError> {
        self.canteens.json(urls)
    }

    async fn meta(&self, reference: &str, urls: &UrlTemplate) -> Result<String, PortError> {
        let canteen = self.canteens.get(reference)?;
        MetaDocument::for_canteen(canteen)
            .with_feeds(self.feed_kinds(), urls, reference, canteen.source.as_deref())
            .render()
    }

    async fn feed(&self, reference: &str, kind: FeedKind) -> Result<String, PortError> {
        let canteen = self.canteens.get(reference)?;
        let source = canteen.source.as_deref().unwrap_or_default();
        let location = location_from_uri(source)
            .ok_or_else(|| PortError::Layout(format!("no location in '{source}'")))?;

        let (current, next) = self.week_plans(&location).await?;
        let mut builder = FeedBuilder::new();
        if let Some(plan) = current {
            add_week(&mut builder, &plan)?;
        }
        if kind != FeedKind::Today {
            if let Some(plan) = next {
                add_week(&mut builder, &plan)?;
            }
        }

        info!(reference, meals = builder.meal_count(), "mensenat feed ready");
        builder.to_xml_feed()
    }
}

/// Build the plugin bundle for the mensen.at parser.
///
/// # Errors
///
/// Returns [`PortError::Json`] if the embedded registry is malformed.
pub fn plugin(client: Client) -> Result<ParserPlugin, PortError> {
    Ok(ParserPlugin::new(MensenAtPort::new(client)?))
}

fn parser_meta() -> ParserMeta {
    ParserMeta {
        id: ParserId::from(Parsers::Mensenat),
        name: String::from("mensen.at"),
    }
}

fn location_from_uri(uri: &str) -> Option<String> {
    LOCATION_URI
        .captures(uri)
        .and_then(|caps| caps.get(1))
        .map(|location| location.as_str().to_owned())
        .filter(|location| !location.is_empty())
}

fn allergen_name(code: &str) -> String {
    ALLERGENS
        .iter()
        .find(|(letter, _)| *letter == code.trim())
        .map_or_else(|| code.trim().to_owned(), |(_, name)| (*name).to_owned())
}

fn dish_price(price: &Value) -> Option<Price> {
    match price {
        Value::String(text) => Price::parse(Role::Other, text),
        Value::Number(number) => Price::parse(Role::Other, &format!("{:.2}", number.as_f64()?)),
        _ => None,
    }
}

fn add_week(builder: &mut FeedBuilder, plan: &str) -> Result<(), PortError> {
    let plan: WeekPlan = serde_json::from_str(plan)?;
    if !plan.available {
        debug!("week plan not available");
        return Ok(());
    }
    let first_day = NaiveDate::parse_from_str(&plan.first_day, "%Y-%m-%d")?;

    for line in &plan.menus {
        let Some(days) = line.menus.as_ref().filter(|_| !line.name.is_empty()) else {
            continue;
        };
        for (weekday, dishes) in days {
            let offset = weekday
                .trim()
                .parse::<u64>()
                .ok()
                .and_then(|number| number.checked_sub(1))
                .ok_or_else(|| PortError::Layout(format!("bad weekday number '{weekday}'")))?;
            let date = first_day + Days::new(offset);

            for dish in dishes {
                let notes: Vec<String> = dish.allergens.codes().iter().map(|code| allergen_name(code)).collect();
                let mut meal = Meal::new(dish.title_de.clone()).with_notes(notes);
                if let Some(price) = dish_price(&dish.price) {
                    meal = meal.with_price(price);
                }
                builder.add_meal(date, &line.name, meal);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const WEEK: &str = r#"{
        "available": true,
        "first_day": "2024-03-04",
        "menus": [
            {"name": "Menü Classic", "menus": {
                "1": [{"title_de": "Wiener Schnitzel", "price": "7,90", "allergens": ["A", "C", "G"]}],
                "3": [{"title_de": "Gemüsecurry", "price": 6.5, "allergens": {"F": true, "X": true}}]
            }},
            {"name": "", "menus": {"1": [{"title_de": "Ohne Linie", "price": 1}]}},
            {"name": "Suppe"}
        ]
    }"#;

    #[test]
    fn registry_is_not_empty() {
        let port = MensenAtPort::new(Client::new()).expect("registry loads");
        assert!(port.references().contains(&"EisenstadtFH".to_owned()));
    }

    #[test]
    fn extracts_location_from_source() {
        assert_eq!(
            location_from_uri("https://www.mensen.at/standort/mensa-tu-graz"),
            Some("mensa-tu-graz".to_owned())
        );
        assert_eq!(
            location_from_uri("https://www.mensen.at/standort/mensa-fh-eisenstadt/"),
            Some("mensa-fh-eisenstadt".to_owned())
        );
        assert_eq!(location_from_uri("https://example.org/"), None);
    }

    #[test]
    fn dates_follow_weekday_numbers() {
        let mut builder = FeedBuilder::new();
        add_week(&mut builder, WEEK).expect("week parses");
        assert_eq!(builder.meal_count(), 2);

        let monday = NaiveDate::from_ymd_opt(2024, 3, 4).expect("valid date");
        let wednesday = NaiveDate::from_ymd_opt(2024, 3, 6).expect("valid date");
        assert!(builder.has_meals_for(monday));
        assert!(builder.has_meals_for(wednesday));

        let xml = builder.to_xml().expect("feed renders");
        assert!(xml.contains("<note>Gluten</note>"));
        assert!(xml.contains("<note>Sojabohnen</note>"));
        assert!(xml.contains("<note>X</note>"));
        assert!(xml.contains("<price role=\"other\">7.90</price>"));
        assert!(xml.contains("<price role=\"other\">6.50</price>"));
        assert!(!xml.contains("Ohne Linie"));
    }

    #[test]
    fn unavailable_week_adds_nothing() {
        let mut builder = FeedBuilder::new();
        add_week(&mut builder, r#"{"available": false}"#).expect("week parses");
        assert!(builder.is_empty());
    }

    #[tokio::test]
    async fn unknown_reference_is_reported() {
        let port = MensenAtPort::new(Client::new()).expect("registry loads");
        assert!(matches!(
            port.feed("nope", FeedKind::Full).await,
            Err(PortError::UnknownCanteen(_))
        ));
    }
}
