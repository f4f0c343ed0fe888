//! Registry for all parser plugins.

use std::sync::Arc;

use crate::model::{ParserId, ParserMeta};
use crate::ports::{MenuPort, PortError};

/// A parser together with its metadata.
pub struct ParserPlugin {
    /// Static metadata describing the parser.
    pub meta: ParserMeta,
    /// Implementation that scrapes the site.
    pub port: Arc<dyn MenuPort>,
}

impl ParserPlugin {
    /// Wrap a port, copying its metadata.
    pub fn new<P: MenuPort + 'static>(port: P) -> Self {
        Self {
            meta: port.parser().clone(),
            port: Arc::new(port),
        }
    }
}

/// Registry that resolves plugins by parser identifier, keeping registration order.
pub struct ParserRegistry {
    plugins: Vec<ParserPlugin>,
}

impl ParserRegistry {
    /// Build a registry from the provided plugin list.
    #[must_use]
    pub fn new(plugins: Vec<ParserPlugin>) -> Self {
        Self { plugins }
    }

    /// Return metadata for all registered parsers.
    #[must_use]
    pub fn parsers(&self) -> Vec<ParserMeta> {
        self.plugins.iter().map(|plugin| plugin.meta.clone()).collect()
    }

    /// Iterator over parser metadata.
    pub fn parsers_iter(&self) -> impl Iterator<Item = &ParserMeta> {
        self.plugins.iter().map(|plugin| &plugin.meta)
    }

    /// Look up a plugin for the given parser.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::UnknownParser`] when no plugin is registered.
    pub fn plugin(&self, parser: &ParserId) -> Result<&ParserPlugin, PortError> {
        self.plugins
            .iter()
            .find(|plugin| &plugin.meta.id == parser)
            .ok_or_else(|| PortError::UnknownParser(parser.0.clone()))
    }
}
