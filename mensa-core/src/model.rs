//! Domain data structures for canteens, meals, prices, and feed kinds.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Built-in parsers shipped with mensa-feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parsers {
    /// Eurest menu plans (Austria).
    Eurest,
    /// Studierendenwerk Greifswald.
    Greifswald,
    /// inetmenue.de school and company canteens.
    Inetmenue,
    /// Studierendenwerk Kaiserslautern.
    Kaiserslautern,
    /// Kölner Studierendenwerk.
    Koeln,
    /// Restopolis (Luxembourg).
    Luxembourg,
    /// mampf1a.de canteens.
    Mampf1a,
    /// Markas school canteens (South Tyrol).
    Markas,
    /// mensen.at (Austria).
    Mensenat,
    /// Studierendenwerk Würzburg.
    Wuerzburg,
    /// WU Wien mensa.
    Wuwien,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
/// Identifier for a parser, used in file names and on the command line.
pub struct ParserId(pub String);

impl fmt::Display for Parsers {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slug = match self {
            Parsers::Eurest => "eurest",
            Parsers::Greifswald => "greifswald",
            Parsers::Inetmenue => "inetmenue",
            Parsers::Kaiserslautern => "kaiserslautern",
            Parsers::Koeln => "koeln",
            Parsers::Luxembourg => "luxembourg",
            Parsers::Mampf1a => "mampf1a",
            Parsers::Markas => "markas",
            Parsers::Mensenat => "mensenat",
            Parsers::Wuerzburg => "wuerzburg",
            Parsers::Wuwien => "wuwien",
        };
        write!(formatter, "{slug}")
    }
}

impl From<Parsers> for ParserId {
    fn from(parser: Parsers) -> Self {
        ParserId(parser.to_string())
    }
}

impl fmt::Display for ParserId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
/// Metadata describing a parser and its human-friendly name.
pub struct ParserMeta {
    /// Unique identifier.
    pub id: ParserId,
    /// Display name of the operator or website.
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
/// Static record of one canteen, loaded from a parser's registry file.
pub struct Canteen {
    /// Stable reference used in file names and URLs.
    #[serde(default)]
    pub reference: String,
    /// Site-specific identifier.
    #[serde(default)]
    pub id: String,
    /// Display name.
    pub name: String,
    /// Street address.
    #[serde(default)]
    pub address: String,
    /// City.
    #[serde(default)]
    pub city: String,
    /// Latitude in decimal degrees.
    #[serde(default)]
    pub latitude: f64,
    /// Longitude in decimal degrees.
    #[serde(default)]
    pub longitude: f64,
    /// Phone number, if published.
    #[serde(default)]
    pub phone: Option<String>,
    /// Free-form opening hours, e.g. `Mo - Fr 11:00 - 14:00 Uhr`.
    #[serde(default)]
    pub times: Option<String>,
    /// Page the menu is scraped from.
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// Price category as understood by `OpenMensa`.
pub enum Role {
    /// Students.
    Student,
    /// University staff.
    Employee,
    /// School pupils.
    Pupil,
    /// Guests and everybody else.
    Other,
}

impl Role {
    /// Attribute value used in the feed.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Employee => "employee",
            Role::Pupil => "pupil",
            Role::Other => "other",
        }
    }
}

/// Student, employee, guest; the order most German sites print their prices in.
pub const STUDENT_EMPLOYEE_OTHER: [Role; 3] = [Role::Student, Role::Employee, Role::Other];

static PRICE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)(?:\s*[,.]\s*(\d{1,2}))?").expect("valid price pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
/// Price of a meal for one role.
pub struct Price {
    /// Who pays this price.
    pub role: Role,
    /// Amount in euro cents.
    pub cents: u32,
}

impl Price {
    /// Create a price from an amount in cents.
    #[must_use]
    pub fn new(role: Role, cents: u32) -> Self {
        Self { role, cents }
    }

    /// Parse the first amount in texts like `5,55 €`, `3.2` or `4`.
    #[must_use]
    pub fn parse(role: Role, text: &str) -> Option<Self> {
        let caps = PRICE_PATTERN.captures(text)?;
        let euros = caps.get(1)?.as_str().parse::<u32>().ok()?;
        let cents = match caps.get(2).map(|found| found.as_str()) {
            Some(digits) if digits.len() == 1 => digits.parse::<u32>().ok()? * 10,
            Some(digits) => digits.parse::<u32>().ok()?,
            None => 0,
        };
        Some(Self::new(role, euros.checked_mul(100)?.checked_add(cents)?))
    }
}

impl fmt::Display for Price {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}.{:02}", self.cents / 100, self.cents % 100)
    }
}

/// Pair price texts with roles by position, skipping texts without an amount.
#[must_use]
pub fn role_prices<S: AsRef<str>>(texts: &[S], roles: &[Role]) -> Vec<Price> {
    texts
        .iter()
        .zip(roles)
        .filter_map(|(text, role)| Price::parse(*role, text.as_ref()))
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
/// A single dish as it will appear in the feed.
pub struct Meal {
    /// Dish name.
    pub name: String,
    /// Allergens, additives, and other remarks.
    pub notes: Vec<String>,
    /// Prices per role.
    pub prices: Vec<Price>,
}

impl Meal {
    /// Start a meal with the given name.
    #[must_use]
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            notes: Vec::new(),
            prices: Vec::new(),
        }
    }

    /// Append notes, skipping blank ones.
    #[must_use]
    pub fn with_notes<I, S>(mut self, notes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.notes.extend(
            notes
                .into_iter()
                .map(Into::into)
                .filter(|note| !note.trim().is_empty()),
        );
        self
    }

    /// Append a single price.
    #[must_use]
    pub fn with_price(mut self, price: Price) -> Self {
        self.prices.push(price);
        self
    }

    /// Append several prices.
    #[must_use]
    pub fn with_prices<I: IntoIterator<Item = Price>>(mut self, prices: I) -> Self {
        self.prices.extend(prices);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// The date window a feed covers.
pub enum FeedKind {
    /// The parser's default window, usually the current and next week.
    Week,
    /// Only today (or the current week for sites that publish per week).
    Today,
    /// Everything the site publishes from today on.
    Full,
}

impl FeedKind {
    /// Path segment and file title used for this kind of feed.
    #[must_use]
    pub fn file_title(self) -> &'static str {
        match self {
            FeedKind::Today => "today",
            FeedKind::Week | FeedKind::Full => "feed",
        }
    }

    /// Name of the `<feed>` element in the meta document.
    #[must_use]
    pub fn feed_name(self) -> &'static str {
        match self {
            FeedKind::Today => "today",
            FeedKind::Week | FeedKind::Full => "full",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_german_and_english_prices() {
        assert_eq!(Price::parse(Role::Student, "5,55 €"), Some(Price::new(Role::Student, 555)));
        assert_eq!(Price::parse(Role::Other, "3.2"), Some(Price::new(Role::Other, 320)));
        assert_eq!(Price::parse(Role::Pupil, "€ 4"), Some(Price::new(Role::Pupil, 400)));
        assert_eq!(Price::parse(Role::Pupil, "kostenlos"), None);
    }

    #[test]
    fn formats_price_with_two_decimals() {
        assert_eq!(Price::new(Role::Student, 305).to_string(), "3.05");
        assert_eq!(Price::new(Role::Student, 1200).to_string(), "12.00");
    }

    #[test]
    fn role_prices_skips_missing_amounts() {
        let prices = role_prices(&["2,50", "", "4,10"], &STUDENT_EMPLOYEE_OTHER);
        assert_eq!(
            prices,
            vec![Price::new(Role::Student, 250), Price::new(Role::Other, 410)]
        );
    }

    #[test]
    fn parser_slugs_match_file_names() {
        assert_eq!(ParserId::from(Parsers::Mampf1a).0, "mampf1a");
        assert_eq!(Parsers::Wuwien.to_string(), "wuwien");
    }
}
