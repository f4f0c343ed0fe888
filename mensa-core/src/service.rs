//! High-level service facade combining all parsers.

use std::sync::Arc;

use crate::model::{FeedKind, ParserId};
use crate::plugin::ParserRegistry;
use crate::ports::PortError;
use crate::registry::UrlTemplate;
use crate::text::xml_escape;

/// Plain-text answer for references that are not registered.
#[must_use]
pub fn unknown_canteen_message(reference: &str) -> String {
    format!("Unknown canteen with ref='{}'", xml_escape(reference))
}

/// Public entry point for producing feeds, meta documents, and JSON indexes.
pub struct MensaService {
    registry: Arc<ParserRegistry>,
    base_url: String,
}

impl MensaService {
    /// Create a new service bound to the provided registry, publishing below `base_url`.
    #[must_use]
    pub fn new<S: Into<String>>(registry: Arc<ParserRegistry>, base_url: S) -> Self {
        Self {
            registry,
            base_url: base_url.into(),
        }
    }

    /// List all parsers and their display names, in registration order.
    #[must_use]
    pub fn parsers(&self) -> Vec<(ParserId, String)> {
        self.registry
            .parsers()
            .into_iter()
            .map(|meta| (meta.id, meta.name))
            .collect()
    }

    /// URL template for a parser's published files.
    #[must_use]
    pub fn urls(&self, parser: &ParserId) -> UrlTemplate {
        UrlTemplate::new(self.base_url.clone(), parser.0.clone())
    }

    /// References of all canteens of a parser.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::UnknownParser`] if the parser is not registered.
    pub fn references(&self, parser: &ParserId) -> Result<Vec<String>, PortError> {
        Ok(self.registry.plugin(parser)?.port.references())
    }

    /// Feed kinds a parser can produce.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::UnknownParser`] if the parser is not registered.
    pub fn feed_kinds(&self, parser: &ParserId) -> Result<&'static [FeedKind], PortError> {
        Ok(self.registry.plugin(parser)?.port.feed_kinds())
    }

    /// JSON object mapping each reference of a parser to its meta URL.
    ///
    /// # Errors
    ///
    /// Returns a [`PortError`] if the parser is unknown or serialization fails.
    pub fn json(&self, parser: &ParserId) -> Result<String, PortError> {
        let plugin = self.registry.plugin(parser)?;
        plugin.port.json(&self.urls(parser))
    }

    /// Meta document for a canteen; unknown references yield a plain-text message.
    ///
    /// # Errors
    ///
    /// Returns a [`PortError`] if the parser is unknown or the parser fails.
    pub async fn meta(&self, parser: &ParserId, reference: &str) -> Result<String, PortError> {
        let plugin = self.registry.plugin(parser)?;
        match plugin.port.meta(reference, &self.urls(parser)).await {
            Err(PortError::UnknownCanteen(reference)) => Ok(unknown_canteen_message(&reference)),
            other => other,
        }
    }

    /// Feed for a canteen; unknown references yield a plain-text message.
    ///
    /// # Errors
    ///
    /// Returns a [`PortError`] if the parser is unknown, does not support `kind`,
    /// or scraping fails.
    pub async fn feed(
        &self,
        parser: &ParserId,
        reference: &str,
        kind: FeedKind,
    ) -> Result<String, PortError> {
        let plugin = self.registry.plugin(parser)?;
        match plugin.port.feed(reference, kind).await {
            Err(PortError::UnknownCanteen(reference)) => Ok(unknown_canteen_message(&reference)),
            other => other,
        }
    }
}
