//! Traits describing parser capabilities and the shared error type.

use async_trait::async_trait;
use chrono::ParseError as ChronoParseError;
use reqwest::Error as ReqwestError;

use crate::model::{FeedKind, ParserMeta};
use crate::registry::UrlTemplate;

#[derive(thiserror::Error, Debug)]
/// Errors that can occur while scraping a canteen website.
pub enum PortError {
    /// Network layer failed.
    #[error("Network error: {0}")]
    Network(#[from] ReqwestError),
    /// Failed to parse a date from the site.
    #[error("Parse error: {0}")]
    Parse(#[from] ChronoParseError),
    /// A JSON document or registry file could not be decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// An XML document could not be read or written.
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),
    /// Writing a document failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The reference is not in the parser's registry.
    #[error("Unknown canteen with ref='{0}'")]
    UnknownCanteen(String),
    /// The parser does not produce this kind of feed.
    #[error("Feed kind not supported")]
    UnsupportedFeed,
    /// The page did not have the structure the parser expects.
    #[error("Unexpected page layout: {0}")]
    Layout(String),
    /// The requested parser is not registered.
    #[error("Unknown parser '{0}'")]
    UnknownParser(String),
    /// Internal parser error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PortError {
    /// Whether the failure happened while talking to the remote site.
    #[must_use]
    pub fn is_network(&self) -> bool {
        matches!(self, PortError::Network(_))
    }
}

#[async_trait]
/// Trait implemented by every site-specific parser.
pub trait MenuPort: Send + Sync {
    /// Metadata describing this parser.
    fn parser(&self) -> &ParserMeta;

    /// References of all registered canteens, in registry order.
    fn references(&self) -> Vec<String>;

    /// Feed kinds this parser can produce.
    fn feed_kinds(&self) -> &'static [FeedKind];

    /// Map every reference to the URL of its meta document, as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::Json`] if serialization fails.
    fn json(&self, urls: &UrlTemplate) -> Result<String, PortError>;

    /// Build the `OpenMensa` meta document for a canteen.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::UnknownCanteen`] for unregistered references, or another
    /// [`PortError`] if the parser needs the network and the request fails.
    async fn meta(&self, reference: &str, urls: &UrlTemplate) -> Result<String, PortError>;

    /// Scrape the site and build a feed of the given kind.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::UnknownCanteen`] for unregistered references,
    /// [`PortError::UnsupportedFeed`] if the kind is not in [`MenuPort::feed_kinds`],
    /// or another [`PortError`] if fetching or parsing fails.
    async fn feed(&self, reference: &str, kind: FeedKind) -> Result<String, PortError>;
}
