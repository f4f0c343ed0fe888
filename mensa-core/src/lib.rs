//! Core types and service wiring for mensa-feeds, the `OpenMensa` feed generator.

/// Feed accumulator that renders `OpenMensa` v2 XML.
pub mod builder;
/// HTTP client construction and cached fetching.
pub mod fetch;
/// Opening-hours text parsing.
pub mod hours;
/// Helpers for parsed HTML documents.
pub mod html;
/// Meta document rendering.
pub mod meta;
/// Domain models and identifiers shared by all parsers.
pub mod model;
/// Registry for plugging site-specific parsers into the service.
pub mod plugin;
/// Traits describing the parser interface.
pub mod ports;
/// Helpers for reading source XML.
pub mod reader;
/// Static canteen registries and published URL layout.
pub mod registry;
/// High-level service facade used by the driver and the server.
pub mod service;
/// Text helpers for escaping, dates, and wrapping.
pub mod text;

pub use builder::*;
pub use fetch::*;
pub use hours::*;
pub use meta::*;
pub use model::*;
pub use plugin::*;
pub use ports::*;
pub use registry::*;
pub use service::*;
pub use text::*;
