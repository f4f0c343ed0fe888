//! Parser for the Studierendenwerk Kaiserslautern.
//!
//! Meals come from a JSON endpoint covering all canteens for 30 days. Prices are
//! not part of that data; they live in a `priceRelations` object inside one of
//! the JavaScript files linked from the menu page.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use mensa_core::{
    CachedFetcher, Canteen, CanteenEntry, CanteenRegistry, FeedBuilder, FeedKind, Meal, MenuPort,
    MetaDocument, ParserId, ParserMeta, ParserPlugin, Parsers, PortError, STUDENT_EMPLOYEE_OTHER,
    UrlTemplate, extract_date, role_prices,
};

const CANTEENS: &str = include_str!("../canteens.json");
const SITE: &str = "https://www.studierendenwerk-kaiserslautern.de";
const MENU_PAGE: &str = "https://www.studierendenwerk-kaiserslautern.de/de/essen/speiseplaene";
const MEALS_URL: &str = "https://www.studierendenwerk-kaiserslautern.de/fileadmin/templates/stw-kl/loadcsv/load_db_speiseplan.php?canteens=1&days=30";
const CACHE_SIZE: usize = 20;
const DEFAULT_PRICE: &str = "5,55 €";
const PRICE_MARKER: &str = "priceRelations =";

static SCRIPT_SRC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<script src="/([^"]+)"></script>"#).expect("valid script pattern"));

type PriceRelations = BTreeMap<String, Value>;

#[derive(Debug, Deserialize)]
struct KaiserslauternCanteen {
    #[serde(flatten)]
    canteen: Canteen,
    dportname: String,
}

impl CanteenEntry for KaiserslauternCanteen {
    fn canteen(&self) -> &Canteen {
        &self.canteen
    }

    fn canteen_mut(&mut self) -> &mut Canteen {
        &mut self.canteen
    }
}

/// Menu parser for the Studierendenwerk Kaiserslautern.
pub struct KaiserslauternPort {
    fetcher: CachedFetcher,
    meta: ParserMeta,
    canteens: CanteenRegistry<KaiserslauternCanteen>,
    price_relations: Mutex<Option<PriceRelations>>,
}

impl KaiserslauternPort {
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
            price_relations: Mutex::new(None),
        })
    }

    /// Load the price table once; a missing or broken table is remembered as empty.
    async fn price_relations(&self) -> Result<PriceRelations, PortError> {
        let cached = self.lock_prices()?.clone();
        if let Some(relations) = cached {
            return Ok(relations);
        }

        let html = self.fetcher.get_text(MENU_PAGE).await?;
        let mut relations = PriceRelations::new();
        for path in script_sources(&html).iter().rev() {
            let js = self.fetcher.get_text(&format!("{SITE}/{path}")).await?;
            if js.contains(PRICE_MARKER) {
                match parse_price_relations(&js) {
                    Ok(found) => relations = found,
                    Err(err) => warn!(path, "failed to parse priceRelations: {err}"),
                }
                break;
            }
        }
        debug!(entries = relations.len(), "price relations loaded");

        *self.lock_prices()? = Some(relations.clone());
        Ok(relations)
    }

    fn lock_prices(&self) -> Result<std::sync::MutexGuard<'_, Option<PriceRelations>>, PortError> {
        self.price_relations
            .lock()
            .map_err(|_err| PortError::Internal("price table lock poisoned".to_owned()))
    }
}

#[async_trait]
impl MenuPort for KaiserslauternPort {
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
            .with_feeds(self.feed_kinds(), urls, reference, Some(MENU_PAGE))
            .render()
    }

    async fn feed(&self, reference: &str, kind: FeedKind) -> Result<String, PortError> {
        let entry = self.canteens.get(reference)?;
        if kind != FeedKind::Week {
            return Err(PortError::UnsupportedFeed);
        }

        let meals: Vec<Map<String, Value>> = self.fetcher.get_json(MEALS_URL).await?;
        let relations = self.price_relations().await?;

        let mut builder = FeedBuilder::new();
        for (date, category, meal) in parse_meals(&meals, &entry.dportname, &relations) {
            builder.add_meal(date, &category, meal);
        }

        info!(reference, meals = builder.meal_count(), "kaiserslautern feed ready");
        builder.to_xml_feed()
    }
}

/// Build the plugin bundle for the Kaiserslautern parser.
///
/// # Errors
///
/// Returns [`PortError::Json`] if the embedded registry is malformed.
pub fn plugin(client: Client) -> Result<ParserPlugin, PortError> {
    Ok(ParserPlugin::new(KaiserslauternPort::new(client)?))
}

fn parser_meta() -> ParserMeta {
    ParserMeta {
        id: ParserId::from(Parsers::Kaiserslautern),
        name: String::from("Studierendenwerk Kaiserslautern"),
    }
}

/// Site-relative paths of all `<script src="/...">` tags, in page order.
fn script_sources(html: &str) -> Vec<String> {
    SCRIPT_SRC
        .captures_iter(html)
        .filter_map(|caps| caps.get(1).map(|path| path.as_str().to_owned()))
        .collect()
}

/// Extract the object literal assigned to `priceRelations`.
fn parse_price_relations(js: &str) -> Result<PriceRelations, json5::Error> {
    let after = js.split_once(PRICE_MARKER).map_or("", |(_, after)| after);
    let object = after.split("};").next().unwrap_or_default();
    json5::from_str(&format!("{object}}}"))
}

/// Price texts for student, employee and guest.
fn price_texts(relations: &PriceRelations, dpartname: &str, artgebname: &str) -> [String; 3] {
    let key = format!("{dpartname} {artgebname}");
    let field = |price: &Value, name: &str| {
        price
            .get(name)
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_PRICE)
            .to_owned()
    };

    match relations.get(&key) {
        Some(price) if key.contains("Mittagsmen") => {
            let all = field(price, "price");
            [all.clone(), all.clone(), all]
        }
        Some(price) => [field(price, "stu"), field(price, "bed"), field(price, "gas")],
        None => [DEFAULT_PRICE.to_owned(), DEFAULT_PRICE.to_owned(), DEFAULT_PRICE.to_owned()],
    }
}

fn string_field<'a>(meal: &'a Map<String, Value>, key: &str) -> &'a str {
    meal.get(key).and_then(Value::as_str).unwrap_or_default()
}

/// Meals of one canteen as `(date, category, meal)`.
fn parse_meals(
    meals: &[Map<String, Value>],
    dportname: &str,
    relations: &PriceRelations,
) -> Vec<(NaiveDate, String, Meal)> {
    let mut out = Vec::new();

    for meal in meals.iter().filter(|meal| string_field(meal, "dportname") == dportname) {
        let Some(date) = extract_date(string_field(meal, "proddatum")) else {
            debug!(proddatum = string_field(meal, "proddatum"), "skipping meal without date");
            continue;
        };

        let category = match string_field(meal, "artname1") {
            "" => string_field(meal, "dpartname"),
            name => name,
        };

        let mut name = String::new();
        for index in 1.. {
            let Some(part) = meal.get(&format!("atextohnezsz{index}")) else {
                break;
            };
            name.push(' ');
            name.push_str(part.as_str().unwrap_or_default().trim());
        }
        let name = name.replace(" ,", ",").trim().to_owned();

        let notes = string_field(meal, "zsnamen")
            .split(',')
            .map(str::trim)
            .chain(["frei1", "frei2", "frei3"].map(|key| string_field(meal, key)))
            .map(str::to_owned);

        let prices = price_texts(
            relations,
            string_field(meal, "dpartname"),
            string_field(meal, "artgebname"),
        );

        out.push((
            date,
            category.to_owned(),
            Meal::new(name)
                .with_notes(notes)
                .with_prices(role_prices(&prices, &STUDENT_EMPLOYEE_OTHER)),
        ));
    }

    out
}

#[cfg(test)]
mod tests {
    use mensa_core::{Price, Role};

    use super::*;

    const SCRIPT: &str = r#"
        var foo = 1;
        var priceRelations = {
            'Ausgabe 1 Mittagsmenü': { price: '3,90 €' },
            "Ausgabe 2 Tagesgericht": { stu: '2,80 €', bed: '4,10 €', gas: '5,30 €', },
        };
        function bar() {}
    "#;

    fn meals() -> Vec<Map<String, Value>> {
        serde_json::from_str(
            r#"[
                {"dportname": "Mensa", "proddatum": "2024-03-04", "artname1": "", "dpartname": "Ausgabe 2",
                 "artgebname": "Tagesgericht", "atextohnezsz1": "Käsespätzle ", "atextohnezsz2": ", Salat",
                 "zsnamen": "Milch, Ei", "frei1": "vegetarisch", "frei2": "", "frei3": null},
                {"dportname": "Atrium", "proddatum": "2024-03-04", "artname1": "Pasta", "dpartname": "Theke",
                 "artgebname": "", "atextohnezsz1": "Penne"},
                {"dportname": "Mensa", "proddatum": "05.03.2024", "artname1": "Menü", "dpartname": "Ausgabe 1",
                 "artgebname": "Mittagsmenü", "atextohnezsz1": "Gulasch", "zsnamen": ""}
            ]"#,
        )
        .expect("fixture parses")
    }

    #[test]
    fn registry_is_not_empty() {
        let port = KaiserslauternPort::new(Client::new()).expect("registry loads");
        assert!(!port.references().is_empty());
    }

    #[test]
    fn finds_script_sources() {
        let html = r#"<script src="/a.js"></script><script src="/typo3temp/b.js"></script>"#;
        assert_eq!(script_sources(html), vec!["a.js", "typo3temp/b.js"]);
    }

    #[test]
    fn parses_price_relations_from_javascript() {
        let relations = parse_price_relations(SCRIPT).expect("object parses");
        assert_eq!(relations.len(), 2);

        assert_eq!(
            price_texts(&relations, "Ausgabe 1", "Mittagsmenü"),
            ["3,90 €", "3,90 €", "3,90 €"].map(str::to_owned)
        );
        assert_eq!(
            price_texts(&relations, "Ausgabe 2", "Tagesgericht"),
            ["2,80 €", "4,10 €", "5,30 €"].map(str::to_owned)
        );
        assert_eq!(
            price_texts(&relations, "Ausgabe 9", "Unbekannt"),
            ["5,55 €", "5,55 €", "5,55 €"].map(str::to_owned)
        );
    }

    #[test]
    fn parses_meals_of_one_canteen() {
        let relations = parse_price_relations(SCRIPT).expect("object parses");
        let parsed = parse_meals(&meals(), "Mensa", &relations);
        assert_eq!(parsed.len(), 2);

        let (date, category, meal) = parsed.first().expect("first meal");
        assert_eq!(*date, NaiveDate::from_ymd_opt(2024, 3, 4).expect("valid date"));
        assert_eq!(category, "Ausgabe 2");
        assert_eq!(meal.name, "Käsespätzle, Salat");
        assert_eq!(meal.notes, vec!["Milch", "Ei", "vegetarisch"]);
        assert_eq!(
            meal.prices,
            vec![
                Price::new(Role::Student, 280),
                Price::new(Role::Employee, 410),
                Price::new(Role::Other, 530)
            ]
        );

        let (date, category, meal) = parsed.get(1).expect("second meal");
        assert_eq!(*date, NaiveDate::from_ymd_opt(2024, 3, 5).expect("valid date"));
        assert_eq!(category, "Menü");
        assert!(meal.prices.iter().all(|price| price.cents == 390));
    }

    #[tokio::test]
    async fn unknown_reference_is_reported() {
        let port = KaiserslauternPort::new(Client::new()).expect("registry loads");
        assert!(matches!(
            port.feed("nope", FeedKind::Week).await,
            Err(PortError::UnknownCanteen(_))
        ));
    }
}
