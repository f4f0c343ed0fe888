//! Parser for the Restopolis restaurants of the Luxembourg school system.
//!
//! Restopolis renders one week per request. The restaurant, service and day are
//! selected with cookies, not with the URL.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Days, NaiveDate};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use reqwest::Client;
use reqwest::header::{ACCEPT_LANGUAGE, COOKIE};
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use tracing::{debug, info, warn};

use mensa_core::html::{child_elements, has_class, selector, text};
use mensa_core::{
    Canteen, CanteenEntry, CanteenRegistry, FeedBuilder, FeedKind, MAX_TEXT_LEN, Meal, MenuPort,
    MetaDocument, OpeningHours, ParserId, ParserMeta, ParserPlugin, Parsers, PortError,
    UrlTemplate, format_range, fetch_text, now_berlin, truncate_chars, weekday_from_short, wrap,
};

const CANTEENS: &str = include_str!("../canteens.json");
const MENU_URL: &str = "https://ssl.education.lu/eRestauration/CustomerServices/Menu";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_REPEATS: usize = 3;
/// Two service windows closer than this many minutes count as one opening.
const MERGE_GAP_MINUTES: i64 = 32;

static DATE_BUTTON: Lazy<Selector> = Lazy::new(|| selector("div.date-selector-desktop button.day"));
static DATE_SELECTOR: Lazy<Selector> = Lazy::new(|| selector("div.date-selector-desktop"));
static DAY_MENU: Lazy<Selector> = Lazy::new(|| selector(".daily-menu > div"));
static EMPTY_FORMULAE: Lazy<Selector> = Lazy::new(|| selector(".formulaeContainer.no-products"));
static BUTTON: Lazy<Selector> = Lazy::new(|| selector("button"));
static LIST_ITEM: Lazy<Selector> = Lazy::new(|| selector("li"));

static NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("valid number pattern"));
static SERVICE_TIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{1,2}):(\d{2}) - (\d{1,2}):(\d{2})").expect("valid service time pattern")
});

const ALLERGENS: [&str; 14] = [
    "Céréales contenant du gluten et produits à base de ces céréales",
    "Crustacés et produits à base de crustacés",
    "Oeufs et produits à base d‘oeufs",
    "Poissons et produits à base de poissons",
    "Arachides et produits à base d‘arachides",
    "Soja et produits à base de soja",
    "Lait et produits à base de lait (y compris le lactose)",
    "Fruits à coque et produits à base de ces fruits",
    "Céleri et produits à base de céleri",
    "Moutarde et produits à base de moutarde",
    "Graines de sésame et produits à base de graines de sésame",
    "Anhydride sulfureux et sulfites en concentrations de plus de 10mg/kg ou 10mg/litre",
    "Lupin et produits à base de lupin",
    "Mollusques et produits à base de mollusques",
];

const FLAGS: [(&str, &str); 5] = [
    ("/terroir.png", "produit du Luxembourg"),
    ("/bio.png", "produit biologique"),
    ("/transfair.png", "produit Transfair"),
    ("/vegetarian.png", "produit végétarien"),
    ("/vegan.png", "produit végétalien"),
];

/// Classes that end the product currently being collected.
const PRODUCT_BOUNDARIES: [&str; 5] = [
    "product-name",
    "course-name",
    "product-section",
    "formulaeContainer",
    "constantProductContainer",
];

/// A Restopolis service: numeric id and its opening window text.
type Service = (u32, String);

#[derive(Debug, Clone, Deserialize)]
struct Alternative {
    id: u32,
    services: Vec<Service>,
}

#[derive(Debug, Deserialize)]
struct LuxembourgCanteen {
    #[serde(flatten)]
    canteen: Canteen,
    #[serde(default)]
    region: String,
    #[serde(default)]
    street: String,
    #[serde(default)]
    zip: String,
    #[serde(default)]
    days: Option<String>,
    services: Vec<Service>,
    #[serde(default)]
    alternative: Option<Alternative>,
}

impl LuxembourgCanteen {
    fn display_name(&self) -> String {
        if self.region.is_empty() {
            self.canteen.name.clone()
        } else {
            format!("{} ({})", self.canteen.name, self.region)
        }
    }

    fn full_address(&self) -> String {
        let mut address = self.street.clone();
        if !self.zip.is_empty() {
            if !address.is_empty() {
                address.push_str(", ");
            }
            address.push_str(&self.zip);
        }
        if !self.canteen.city.is_empty() {
            if !address.is_empty() {
                address.push_str(if self.zip.is_empty() { ", " } else { " " });
            }
            address.push_str(&self.canteen.city);
        }
        address
    }

    fn source_url(&self) -> String {
        if let Some(source) = self.canteen.source.as_deref().filter(|source| !source.is_empty()) {
            return source.to_owned();
        }
        let service = self.services.first().map_or(0, |(id, _)| *id);
        format!(
            "https://portal.education.lu/restopolis/Language/fr/MENUS/MENU-DU-JOUR/RestaurantId/{}/ServiceId/{service}#12691",
            self.canteen.id
        )
    }
}

impl CanteenEntry for LuxembourgCanteen {
    fn canteen(&self) -> &Canteen {
        &self.canteen
    }

    fn canteen_mut(&mut self) -> &mut Canteen {
        &mut self.canteen
    }
}

/// Menu parser for Restopolis.
pub struct LuxembourgPort {
    client: Client,
    meta: ParserMeta,
    canteens: CanteenRegistry<LuxembourgCanteen>,
}

impl LuxembourgPort {
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

    async fn menu_page(&self, restaurant: &str, service: u32, date: NaiveDate) -> Result<String, PortError> {
        let cookies = format!(
            "CustomerServices.Restopolis.SelectedRestaurant={restaurant}; \
             CustomerServices.Restopolis.SelectedService={service}; \
             CustomerServices.Restopolis.SelectedDate={}; \
             .AspNetCore.Culture=c=fr|uic=fr; \
             CustomerServices.Restopolis.DisplayAllergens=True",
            date.format("%d.%m.%Y")
        );
        let request = self
            .client
            .get(MENU_URL)
            .header(COOKIE, cookies)
            .header(ACCEPT_LANGUAGE, "fr-LU,fr,lb-LU,lb,de-LU,de,en")
            .timeout(REQUEST_TIMEOUT);
        fetch_text(request).await
    }

    /// Collect all services of one restaurant, starting with the week of `start`.
    ///
    /// Restaurants with a single service are followed up to three more weeks as
    /// long as each week adds meals.
    async fn collect(
        &self,
        restaurant: &str,
        services: &[Service],
        start: NaiveDate,
    ) -> Result<(FeedBuilder, usize), PortError> {
        let mut builder = FeedBuilder::new();
        let single = services.len() == 1;
        let mut pending: VecDeque<&Service> = services.iter().collect();
        let mut date = start;
        let mut repeats = 0;
        let mut total = 0;

        while let Some(service) = pending.pop_front() {
            let (id, label) = service;
            let suffix = if label.is_empty() || single {
                String::new()
            } else {
                format!("({label})")
            };

            let html = self.menu_page(restaurant, *id, date).await?;
            if !html.contains('<') {
                builder.append_comment(format!(
                    "Restaurant [id={restaurant}, service={id}]: No HTML in response body: `{html}`"
                ));
                break;
            }

            let added = match parse_page(&html, &suffix, &mut builder) {
                Ok(added) => added,
                Err(PortError::Layout(message)) => {
                    warn!(restaurant, service = id, message, "restaurant not found");
                    builder.append_comment(format!("Restaurant [id={restaurant}, service={id}] not found"));
                    break;
                }
                Err(err) => return Err(err),
            };
            total += added;

            if single && repeats < MAX_REPEATS && added > 0 {
                if let Some(next_week) = date.checked_add_days(Days::new(7)) {
                    repeats += 1;
                    date = next_week;
                    pending.push_back(service);
                }
            }
        }
        Ok((builder, total))
    }
}

#[async_trait]
impl MenuPort for LuxembourgPort {
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
        let mut meta = MetaDocument::for_canteen(&entry.canteen)
            .with_feeds(self.feed_kinds(), urls, reference, Some(&entry.source_url()))
            .with_times(service_hours(&entry.services, entry.days.as_deref()));
        meta.name = entry.display_name();
        meta.address = entry.full_address();
        meta.render()
    }

    async fn feed(&self, reference: &str, kind: FeedKind) -> Result<String, PortError> {
        let entry = self.canteens.get(reference)?;
        if kind != FeedKind::Week {
            return Err(PortError::UnsupportedFeed);
        }

        let today = now_berlin().date_naive();
        let (mut builder, mut meals) = self.collect(&entry.canteen.id, &entry.services, today).await?;
        if meals == 0 {
            if let Some(alternative) = &entry.alternative {
                debug!(reference, alternative = alternative.id, "no meals, trying alternative restaurant");
                (builder, meals) = self
                    .collect(&alternative.id.to_string(), &alternative.services, today)
                    .await?;
            }
        }

        info!(reference, meals, "luxembourg feed ready");
        builder.to_xml_feed()
    }
}

/// Build the plugin bundle for the Restopolis parser.
///
/// # Errors
///
/// Returns [`PortError::Json`] if the embedded registry is malformed.
pub fn plugin(client: Client) -> Result<ParserPlugin, PortError> {
    Ok(ParserPlugin::new(LuxembourgPort::new(client)?))
}

fn parser_meta() -> ParserMeta {
    ParserMeta {
        id: ParserId::from(Parsers::Luxembourg),
        name: String::from("Restopolis Luxembourg"),
    }
}

fn allergen_name(code: &str) -> String {
    code.parse::<usize>()
        .ok()
        .and_then(|number| number.checked_sub(1))
        .and_then(|index| ALLERGENS.get(index))
        .map_or_else(|| code.to_owned(), |name| (*name).to_owned())
}

fn allergen_notes(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(|code| {
            NUMBER
                .replace_all(code, |caps: &Captures<'_>| {
                    caps.get(0).map_or_else(String::new, |number| allergen_name(number.as_str()))
                })
                .into_owned()
        })
        .collect()
}

fn product_name(raw: &str) -> String {
    raw.replace("''", "\"").replace("1/2 ", "½ ")
}

/// Opening hours from the service windows and the `days` range.
fn service_hours(services: &[Service], days: Option<&str>) -> Option<OpeningHours> {
    let windows: Vec<[i64; 4]> = services
        .iter()
        .flat_map(|(_, window)| SERVICE_TIME.captures_iter(window))
        .filter_map(|caps| {
            let number = |group: usize| caps.get(group)?.as_str().parse::<i64>().ok();
            Some([number(1)?, number(2)?, number(3)?, number(4)?])
        })
        .collect();

    let [from_h, from_m, mut to_h, mut to_m] = *windows.first()?;
    if let [_, [second_from_h, second_from_m, second_to_h, second_to_m]] = windows.as_slice() {
        if (second_from_h - to_h) * 60 + second_from_m - to_m < MERGE_GAP_MINUTES {
            to_h = *second_to_h;
            to_m = *second_to_m;
        }
    }

    let clock = |value: i64| u32::try_from(value).ok();
    let range = format_range(clock(from_h)?, clock(from_m)?, clock(to_h)?, clock(to_m)?);

    let (from_day, to_day) = days
        .and_then(|days| days.split_once('-'))
        .map_or(("Mo", "Su"), |(from, to)| (from.trim(), to.trim()));
    let mut hours = OpeningHours::default();
    hours.set_range(weekday_from_short(from_day)?, weekday_from_short(to_day)?, &range);
    Some(hours)
}

/// Product details collected while walking the children of one day.
#[derive(Debug, Default)]
struct DayState {
    course: String,
    section: String,
    product: String,
    allergens: Vec<String>,
    description: String,
    notes: Vec<String>,
    category_notes: Vec<String>,
    closed: bool,
}

impl DayState {
    fn category(&self, suffix: &str) -> String {
        [self.course.as_str(), self.section.as_str(), suffix]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Add the collected product, if any. Returns whether a meal was added.
    fn flush(&mut self, builder: &mut FeedBuilder, date: NaiveDate, suffix: &str) -> bool {
        if self.closed || self.course.is_empty() || self.product.is_empty() {
            return false;
        }
        let mut notes = std::mem::take(&mut self.notes);
        notes.extend(wrap(&self.description, MAX_TEXT_LEN));
        notes.append(&mut self.allergens);
        notes.extend(self.category_notes.iter().cloned());

        let name = truncate_chars(&std::mem::take(&mut self.product), MAX_TEXT_LEN - 1);
        builder.add_meal(date, &self.category(suffix), Meal::new(name).with_notes(notes));
        self.description.clear();
        true
    }
}

fn mentions_closed(element: &ElementRef<'_>) -> bool {
    text(element).to_lowercase().contains("fermé")
        || element
            .value()
            .attrs()
            .any(|(_, value)| value.to_lowercase().contains("fermé"))
}

/// Walk one `.daily-menu > div` and add its meals. Returns the number of meals added.
fn parse_day(
    day: &ElementRef<'_>,
    date: NaiveDate,
    suffix: &str,
    builder: &mut FeedBuilder,
) -> usize {
    let mut state = DayState::default();
    let mut added = 0;
    let mut queue: VecDeque<ElementRef<'_>> = child_elements(day).collect();

    while let Some(element) = queue.pop_front() {
        let classes: Vec<&str> = element.value().classes().collect();

        if PRODUCT_BOUNDARIES.iter().any(|class| classes.contains(class))
            && state.flush(builder, date, suffix)
        {
            added += 1;
        }

        if classes.is_empty() {
            if element.value().name() == "ul" {
                if state.closed {
                    continue;
                }
                added += 1;
                let category = state.category("");
                for item in element.select(&LIST_ITEM) {
                    let name = text(&item);
                    if !name.is_empty() {
                        builder.add_meal(date, &category, Meal::new(truncate_chars(&name, MAX_TEXT_LEN - 1)));
                    }
                }
            } else {
                warn!(tag = element.value().name(), "unknown element in day menu");
                builder.append_comment(format!("Unknown tag <{}>", element.value().name()));
            }
            continue;
        }

        if has_class(&element, "no-products") || element.select(&EMPTY_FORMULAE).next().is_some() {
            builder.set_day_closed(date);
            state.closed = true;
        } else if mentions_closed(&element) {
            builder.set_day_closed(date);
            state.closed = true;
        } else if has_class(&element, "course-name") {
            state.course = text(&element);
            state.section.clear();
        } else if has_class(&element, "product-section") {
            state.section = text(&element);
        } else if has_class(&element, "product-allergens") {
            state.allergens.extend(allergen_notes(&text(&element)));
        } else if has_class(&element, "product-description") {
            state.description = text(&element);
        } else if has_class(&element, "product-name") {
            state.product = product_name(&text(&element));
        } else if has_class(&element, "product-flag") {
            let src = element.value().attr("src").unwrap_or_default();
            match FLAGS.iter().find(|(ending, _)| src.ends_with(ending)) {
                Some((_, note)) => state.notes.push((*note).to_owned()),
                None => {
                    warn!(src, "unknown flag image");
                    builder.append_comment(format!("Unknown img {src}"));
                }
            }
        } else if has_class(&element, "wrapper-theme-day") {
            let theme = text(&element);
            info!(theme, "theme day");
            builder.append_comment(format!("Theme day: {theme}"));
        } else if has_class(&element, "wrapper-category") {
            for button in element.select(&BUTTON) {
                if !has_class(&button, "showConstantProducts") && !has_class(&button, "showFormulae") {
                    let label = text(&button);
                    info!(label, "unknown category button");
                    builder.append_comment(format!("Unknown category button: {label}"));
                }
            }
        } else if has_class(&element, "formulaeContainer") || has_class(&element, "constantProductContainer") {
            queue.extend(child_elements(&element));
            state.category_notes = if has_class(&element, "constantProductContainer") {
                vec![String::from("produit constant")]
            } else {
                Vec::new()
            };
        } else if !has_class(&element, "cb") {
            warn!(?classes, "unknown class in day menu");
            builder.append_comment(format!("Unknown tag <{}> with class {}", element.value().name(), classes.join(" ")));
        }
    }

    if state.flush(builder, date, suffix) {
        added += 1;
    }
    added
}

/// Parse one Restopolis week page. Returns the number of meals added.
///
/// A page without date selector yields [`PortError::Layout`].
fn parse_page(html: &str, suffix: &str, builder: &mut FeedBuilder) -> Result<usize, PortError> {
    let document = Html::parse_document(html);
    if document.select(&DATE_SELECTOR).next().is_none() {
        return Err(PortError::Layout("no div.date-selector-desktop".to_owned()));
    }

    let dates: Vec<NaiveDate> = document
        .select(&DATE_BUTTON)
        .filter_map(|button| button.value().attr("data-full-date"))
        .map(|date| NaiveDate::parse_from_str(date.trim(), "%d.%m.%Y"))
        .collect::<Result<_, _>>()?;

    let mut added = 0;
    for (index, day) in document.select(&DAY_MENU).enumerate() {
        let Some(date) = dates.get(index) else {
            warn!(index, "day menu without date");
            continue;
        };
        added += parse_day(&day, *date, suffix, builder);
    }
    Ok(added)
}

#[cfg(test)]
mod tests {
    use chrono::Weekday;

    use super::*;

    const PAGE: &str = r#"<html><body>
        <div class="date-selector-desktop">
          <button class="day" data-full-date="04.03.2024">Lu</button>
          <button class="day" data-full-date="05.03.2024">Ma</button>
          <button class="day" data-full-date="06.03.2024">Me</button>
        </div>
        <div class="daily-menu">
          <div>
            <div class="course-name">Plat du jour</div>
            <div class="product-name">Poulet rôti, 1/2 pomme</div>
            <img class="product-flag" src="/img/bio.png">
            <div class="product-allergens">1, 7</div>
            <div class="product-description">avec frites</div>
            <div class="wrapper-theme-day">Semaine italienne</div>
            <div class="constantProductContainer">
              <div class="course-name">Snacks</div>
              <div class="product-name">Sandwich</div>
            </div>
            <div class="course-name">Desserts</div>
            <ul><li>Tiramisu</li><li> </li></ul>
          </div>
          <div><div class="no-products">Pas de menu</div></div>
          <div><div class="message">Restaurant fermé</div></div>
        </div>
        </body></html>"#;

    fn day(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).expect("valid date")
    }

    fn port() -> LuxembourgPort {
        LuxembourgPort::new(Client::new()).expect("registry loads")
    }

    #[test]
    fn registry_is_not_empty() {
        assert!(port().references().contains(&"LMLweier".to_owned()));
    }

    #[test]
    fn maps_allergen_numbers() {
        assert_eq!(
            allergen_notes("1, 14,x"),
            vec![
                "Céréales contenant du gluten et produits à base de ces céréales",
                "Mollusques et produits à base de mollusques",
                "x"
            ]
        );
        assert_eq!(allergen_name("15"), "15");
    }

    #[test]
    fn walks_day_menus() {
        let mut builder = FeedBuilder::new();
        let added = parse_page(PAGE, "", &mut builder).expect("page parses");
        assert_eq!(added, 3);
        assert_eq!(builder.meal_count(), 3);
        assert!(builder.is_closed(day(5)));
        assert!(builder.is_closed(day(6)));

        let xml = builder.to_xml().expect("feed renders");
        assert!(xml.contains("<category name=\"Plat du jour\">"));
        assert!(xml.contains("<name>Poulet rôti, ½ pomme</name>"));
        assert!(xml.contains("<note>produit biologique</note>"));
        assert!(xml.contains("<note>avec frites</note>"));
        assert!(xml.contains("<note>Lait et produits à base de lait (y compris le lactose)</note>"));
        assert!(xml.contains("<name>Tiramisu</name>"));
        assert!(xml.contains("<note>produit constant</note>"));
        assert!(xml.contains("Theme day: Semaine italienne"));
    }

    #[test]
    fn missing_date_selector_is_a_layout_error() {
        let mut builder = FeedBuilder::new();
        assert!(matches!(
            parse_page("<html><p>Erreur</p></html>", "", &mut builder),
            Err(PortError::Layout(_))
        ));
    }

    #[test]
    fn merges_close_service_windows() {
        let services = vec![(2, "11:30 - 13:00".to_owned()), (5, "13:15 - 14:00".to_owned())];
        let hours = service_hours(&services, Some("Mo-Fr")).expect("hours");
        assert_eq!(hours.on(Weekday::Mon), Some("11:30-14:00"));
        assert_eq!(hours.on(Weekday::Fri), Some("11:30-14:00"));
        assert_eq!(hours.on(Weekday::Sat), None);

        let services = vec![(1, "11:30 - 14:00".to_owned()), (3, "18:00 - 20:00".to_owned())];
        let hours = service_hours(&services, None).expect("hours");
        assert_eq!(hours.on(Weekday::Sun), Some("11:30-14:00"));
    }

    #[tokio::test]
    async fn meta_qualifies_name_with_region() {
        let urls = UrlTemplate::new("https://example.org", "luxembourg");
        let xml = port().meta("CmpsKiBergAltius", &urls).await.expect("meta renders");
        assert!(xml.contains("<name>Restaurant Altius (Campus Kirchberg)</name>"));
        assert!(xml.contains("<address>6, rue Coudenhove-Kalergi, L-1359 Luxembourg</address>"));
        assert!(xml.contains("RestaurantId/137/ServiceId/1"));
    }

    #[tokio::test]
    async fn unknown_reference_is_reported() {
        assert!(matches!(
            port().feed("nope", FeedKind::Week).await,
            Err(PortError::UnknownCanteen(_))
        ));
    }
}
