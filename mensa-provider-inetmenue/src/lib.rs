//! Parser for the inetmenue.de ordering portals.
//!
//! Portals run one of two front ends: the newer `fs` week view built from
//! `div`s below `#week-content`, and the older `sf` view with a `.week_table`.
//! The `fs` view often names categories only through a picture, so categories
//! are looked up by image URL.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, Url};
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use mensa_core::html::{child_elements, document_text, first_text, has_class, selector, text};
use mensa_core::{
    CachedFetcher, Canteen, CanteenEntry, CanteenRegistry, FeedBuilder, FeedKind, Meal, MenuPort,
    MetaDocument, ParserId, ParserMeta, ParserPlugin, Parsers, PortError, Price, Role, UrlTemplate,
    extract_date,
};

const CANTEENS: &str = include_str!("../canteens.json");
const CACHE_SIZE: usize = 20;

/// Marks a day as closed.
const CLOSED: &str = "*closed*";
/// Falls back to a numbered category.
const IGNORE: &str = "*ignore*";
/// Drops the meal.
const REMOVE: &str = "*remove*";

const CLOSED_PHRASES: [&str; 2] = ["Mensa geschlossen", "Heute keine Mittagsverpflegung"];

/// Category pictures shared by many portals. Keys are exact URLs or patterns
/// starting with `*` (contains), `^` (starts with) or `$` (ends with).
const SHARED_CATEGORIES: [(&str, &str); 15] = [
    ("https://cdn.inetmenue.de/media%2F00512471%2Fcdd3290ac929fba511b3d2f5497f4172560ece12.jpg", CLOSED),
    ("*schneemann.gif", CLOSED),
    ("https://cdn.inetmenue.de/media%2F00512471%2Fedc0f3199cbf3b7e3b570d7a6f27185bf088bdb0.jpg", IGNORE),
    ("https://cdn.inetmenue.de/media%2F00060380%2Fb0ab12b157398fdd8141d7eb71f4fc920c9925cf.jpg", IGNORE),
    ("https://cdn.inetmenue.de/media%2F00017709%2Fd92b8df29ef5be9a89f438f5f2af24189b85f4bc.png", IGNORE),
    ("https://cdn.inetmenue.de/media%2F00060385%2F9080_0000%2B-%2Blogo%2Bpartyk%25E3%25BCche%2Bkempe%2Bmit%2Bwww.jpg", IGNORE),
    ("https://cdn.inetmenue.de/media%2F00017709%2F683_peg-cat.jpg", IGNORE),
    ("https://cdn.inetmenue.de/media%2F00280005%2F04699e67275bb021b3a883e8f107a081452c0c2578b8bb819f2bf373e1710d20.jpg", IGNORE),
    ("https://cdn.inetmenue.de/media%2F00017709%2Fc6b053e7e3b5eca2162f8a7db28d2ef13d4a650b.jpg", "Nudelbuffet"),
    ("https://cdn.inetmenue.de/media%2F00209660%2F0d6cb6be82321a6db02c87fc126503ab9317a0e3.jpg", "DGE-Qualitätsstandard"),
    ("https://cdn.inetmenue.de/media%2F00143229%2F10597_mensa%2Bfps.jpg", IGNORE),
    ("https://cdn.inetmenue.de/media%2F00143229%2Fd7e19a1d1ad799edf4a25fdb9662ee0b06cfcff3.jpg", "Salat"),
    ("*_dummy%2Bklein.jpg", IGNORE),
    ("*_test-bild-gross.jpg", IGNORE),
    ("*_standardbild.jpg", IGNORE),
];

static PRICE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+,\d{2}").expect("valid price pattern"));

static WEEK_CONTENT: Lazy<Selector> = Lazy::new(|| selector("#week-content"));
static WEEK_TABLE: Lazy<Selector> = Lazy::new(|| selector(".week_table"));
static OOPS: Lazy<Selector> = Lazy::new(|| selector(".oops"));

static HEADER_DATE: Lazy<Selector> = Lazy::new(|| selector(".day .long small"));
static JUMP: Lazy<Selector> = Lazy::new(|| selector("a.jmp"));
static CARET_RIGHT: Lazy<Selector> = Lazy::new(|| selector(".fa-caret-right"));
static DAY: Lazy<Selector> = Lazy::new(|| selector(".day"));
static ORDER_END: Lazy<Selector> = Lazy::new(|| selector(".order-end"));
static PRODUCT_NAME: Lazy<Selector> = Lazy::new(|| selector(".product h4"));
static HEADER: Lazy<Selector> = Lazy::new(|| selector("header"));
static ICON: Lazy<Selector> = Lazy::new(|| selector(".icon"));
static PRODUCT_IMAGE: Lazy<Selector> = Lazy::new(|| selector(".product .image"));
static ALLERGENS: Lazy<Selector> = Lazy::new(|| selector(".allergens"));
static PRICE_TEXT: Lazy<Selector> = Lazy::new(|| selector(".price"));

static NEXT_WEEK_LINK: Lazy<Selector> = Lazy::new(|| selector("#day-tabs .next_week a"));
static DAY_DATE: Lazy<Selector> = Lazy::new(|| selector(".week_table th .day_date"));
static TABLE_BODY: Lazy<Selector> = Lazy::new(|| selector(".week_table tbody"));
static CELL: Lazy<Selector> = Lazy::new(|| selector("td"));
static MENU_BOX: Lazy<Selector> = Lazy::new(|| selector(".menu_box"));
static MENU_INFO: Lazy<Selector> = Lazy::new(|| selector(".menuinfo"));
static MENU_NAME: Lazy<Selector> = Lazy::new(|| selector("h4"));

#[derive(Debug, Deserialize)]
struct InetmenueCanteen {
    #[serde(flatten)]
    canteen: Canteen,
    /// Portal-specific category pictures, same key syntax as [`SHARED_CATEGORIES`].
    #[serde(default)]
    categories: BTreeMap<String, String>,
}

impl InetmenueCanteen {
    fn week_url(&self) -> String {
        let source = self.canteen.source.as_deref().unwrap_or_default();
        if source.starts_with("//") {
            format!("https:{source}")
        } else {
            source.to_owned()
        }
    }

    /// Lookup table with the shared pictures taking precedence over portal entries.
    fn category_table(&self) -> Vec<(String, String)> {
        self.categories
            .iter()
            .filter(|(key, _)| !SHARED_CATEGORIES.iter().any(|(shared, _)| shared == key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .chain(
                SHARED_CATEGORIES
                    .iter()
                    .map(|(key, value)| ((*key).to_owned(), (*value).to_owned())),
            )
            .collect()
    }
}

impl CanteenEntry for InetmenueCanteen {
    fn canteen(&self) -> &Canteen {
        &self.canteen
    }

    fn canteen_mut(&mut self) -> &mut Canteen {
        &mut self.canteen
    }
}

/// Menu parser for inetmenue.de.
pub struct InetmenuePort {
    fetcher: CachedFetcher,
    meta: ParserMeta,
    canteens: CanteenRegistry<InetmenueCanteen>,
}

impl InetmenuePort {
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
impl MenuPort for InetmenuePort {
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
        MetaDocument::for_canteen(&entry.canteen)
            .with_feeds(self.feed_kinds(), urls, reference, Some(&entry.week_url()))
            .render()
    }

    async fn feed(&self, reference: &str, kind: FeedKind) -> Result<String, PortError> {
        let entry = self.canteens.get(reference)?;
        let table = entry.category_table();
        let this_week = entry.week_url();

        let mut builder = FeedBuilder::new();
        let html = self.fetcher.get_text(&this_week).await?;
        let next_week = parse_week(&html, &table, &mut builder)?;

        if kind != FeedKind::Today {
            match next_week {
                Some(href) => {
                    let url = next_week_url(&this_week, &href)?;
                    if url == this_week {
                        debug!(reference, "no distinct next week url found");
                    } else {
                        debug!(reference, url, "loading next week");
                        let html = self.fetcher.get_text(&url).await?;
                        parse_week(&html, &table, &mut builder)?;
                    }
                }
                None => debug!(reference, "no next week url found"),
            }
        }

        info!(reference, meals = builder.meal_count(), "inetmenue feed ready");
        builder.to_xml_feed()
    }
}

/// Build the plugin bundle for the inetmenue parser.
///
/// # Errors
///
/// Returns [`PortError::Json`] if the embedded registry is malformed.
pub fn plugin(client: Client) -> Result<ParserPlugin, PortError> {
    Ok(ParserPlugin::new(InetmenuePort::new(client)?))
}

fn parser_meta() -> ParserMeta {
    ParserMeta {
        id: ParserId::from(Parsers::Inetmenue),
        name: String::from("inetmenue"),
    }
}

fn next_week_url(this_week: &str, href: &str) -> Result<String, PortError> {
    Url::parse(this_week)
        .and_then(|base| base.join(href))
        .map(String::from)
        .map_err(|err| PortError::Layout(format!("bad next week link '{href}': {err}")))
}

/// Category for a picture URL: an exact key first, otherwise the last matching pattern.
fn category_for_image(image: &str, table: &[(String, String)]) -> Option<String> {
    if let Some((_, category)) = table.iter().find(|(key, _)| key == image) {
        return Some(category.clone());
    }
    table
        .iter()
        .rev()
        .find(|(pattern, _)| {
            if let Some(tail) = pattern.strip_prefix('$') {
                image.ends_with(tail)
            } else if let Some(head) = pattern.strip_prefix('^') {
                image.starts_with(head)
            } else if let Some(part) = pattern.strip_prefix('*') {
                image.contains(part)
            } else {
                false
            }
        })
        .map(|(_, category)| category.clone())
}

/// URL inside a `background-image: url(...)` style.
fn style_image(style: &str) -> Option<&str> {
    let (_, rest) = style.split_once("url(")?;
    let (url, _) = rest.split_once(')')?;
    Some(url.trim().trim_matches(|c: char| c == '\'' || c == '"'))
}

/// Parse one week page in either layout. Returns the link to the following week.
fn parse_week(
    html: &str,
    table: &[(String, String)],
    builder: &mut FeedBuilder,
) -> Result<Option<String>, PortError> {
    let document = Html::parse_document(html);
    if let Some(content) = document.select(&WEEK_CONTENT).next() {
        return Ok(parse_fs_week(&content, table, builder));
    }
    if document.select(&WEEK_TABLE).next().is_some() {
        return Ok(parse_sf_week(&document, builder));
    }
    if let Some(oops) = document_text(&document, &OOPS) {
        error!(oops, "portal error page");
    }
    Err(PortError::Layout("unknown page structure".to_owned()))
}

fn parse_fs_week(
    content: &ElementRef<'_>,
    table: &[(String, String)],
    builder: &mut FeedBuilder,
) -> Option<String> {
    let mut prefix = String::new();
    let mut dates: Vec<Option<NaiveDate>> = Vec::new();
    let mut line_index = 0;
    let mut next_week = None;

    for child in child_elements(content) {
        if child.value().name() == "h2" {
            prefix = text(&child);
        } else if has_class(&child, "day-header") {
            dates = child
                .select(&HEADER_DATE)
                .map(|date| extract_date(&text(&date)))
                .collect();
            for jump in child.select(&JUMP) {
                if jump.select(&CARET_RIGHT).next().is_some() {
                    next_week = jump.value().attr("href").map(str::to_owned);
                }
            }
        } else if has_class(&child, "menu-line") {
            line_index += 1;
            parse_menu_line(&child, line_index, &prefix, &dates, table, builder);
        }
    }
    next_week
}

fn parse_menu_line(
    line: &ElementRef<'_>,
    line_index: usize,
    prefix: &str,
    dates: &[Option<NaiveDate>],
    table: &[(String, String)],
    builder: &mut FeedBuilder,
) {
    let mut category = String::new();

    for (day_index, day) in line.select(&DAY).enumerate() {
        if has_class(&day, "no-menu") {
            continue;
        }
        let Some(date) = dates.get(day_index).copied().flatten() else {
            warn!(day_index, "menu without date");
            continue;
        };

        let name = first_text(&day, &PRODUCT_NAME).unwrap_or_default();
        if CLOSED_PHRASES.iter().any(|phrase| name.contains(phrase)) {
            builder.set_day_closed(date);
            continue;
        }

        let mut notes: Vec<String> = Vec::new();
        if let Some(header) = day.select(&HEADER).next() {
            let title = text(&header);
            if !title.is_empty() {
                category = title;
            }
            if let Some(icon) = header
                .select(&ICON)
                .next()
                .and_then(|icon| icon.value().attr("title"))
                .map(str::trim)
                .filter(|icon| !icon.is_empty())
            {
                notes.push(icon.to_owned());
                if category.is_empty() {
                    category = icon.to_owned();
                }
            }
        } else if let Some(image) = day
            .select(&PRODUCT_IMAGE)
            .next()
            .and_then(|image| image.value().attr("style"))
            .and_then(style_image)
        {
            match category_for_image(image, table) {
                Some(found) => category = found,
                None => debug!(image, "unknown category image"),
            }
        }

        if category == REMOVE {
            continue;
        }
        if category.trim().is_empty() || category == IGNORE {
            category = format!("Essen {line_index:02}");
            debug!(category, "no category found, using default");
        } else if category == CLOSED {
            builder.set_day_closed(date);
            continue;
        }

        if let Some(allergens) = day.select(&ALLERGENS).next().and_then(|node| node.value().attr("title")) {
            notes.extend(
                allergens
                    .split(',')
                    .map(|code| code.trim().trim_matches('=').trim())
                    .filter(|code| !code.is_empty())
                    .map(str::to_owned),
            );
        }

        let price = first_text(&day, &PRICE_TEXT)
            .and_then(|price| PRICE.find(&price).map(|found| found.as_str().to_owned()))
            .and_then(|price| Price::parse(Role::Pupil, &price));

        let full_name = match first_text(&day, &ORDER_END) {
            Some(order_end) => format!("{name}⚠️{order_end}"),
            None => name,
        };
        let mut meal = Meal::new(full_name).with_notes(notes);
        if let Some(price) = price {
            meal = meal.with_price(price);
        }
        builder.add_meal(date, format!("{prefix} {category}").trim(), meal);
    }
}

fn parse_sf_week(document: &Html, builder: &mut FeedBuilder) -> Option<String> {
    let next_week = document
        .select(&NEXT_WEEK_LINK)
        .next()
        .and_then(|link| link.value().attr("href"))
        .map(str::to_owned);
    let dates: Vec<Option<NaiveDate>> = document
        .select(&DAY_DATE)
        .map(|date| extract_date(&text(&date)))
        .collect();

    let Some(body) = document.select(&TABLE_BODY).next() else {
        return next_week;
    };

    let mut mealtime = String::new();
    let mut row_index = 0;
    for row in child_elements(&body).filter(|row| row.value().name() == "tr") {
        if has_class(&row, "menutime") {
            mealtime = text(&row);
            continue;
        }
        row_index += 1;

        for (day_index, cell) in row.select(&CELL).enumerate() {
            let Some(menu_box) = cell.select(&MENU_BOX).next() else {
                continue;
            };
            let Some(date) = dates.get(day_index).copied().flatten() else {
                warn!(day_index, "menu without date");
                continue;
            };
            let mut category = match first_text(&menu_box, &MENU_INFO) {
                Some(info) => format!("{mealtime} {info}").trim().to_owned(),
                None => mealtime.clone(),
            };
            if category.is_empty() {
                category = format!("Essen {row_index:02}");
            }
            let name = first_text(&menu_box, &MENU_NAME).unwrap_or_default();
            builder.add_meal(date, &category, Meal::new(name));
        }
    }
    next_week
}
