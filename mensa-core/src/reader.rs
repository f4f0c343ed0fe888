//! Small helpers for streaming through source XML with `quick-xml`.

use quick_xml::events::{BytesStart, BytesText};

use crate::ports::PortError;

/// Unescaped value of attribute `name`, if present.
///
/// # Errors
///
/// Returns [`PortError::Xml`] if the attribute is malformed.
pub fn attribute(element: &BytesStart<'_>, name: &str) -> Result<Option<String>, PortError> {
    let Some(attr) = element
        .try_get_attribute(name)
        .map_err(quick_xml::Error::from)?
    else {
        return Ok(None);
    };
    let value = attr.unescape_value().map_err(quick_xml::Error::from)?;
    Ok(Some(value.into_owned()))
}

/// Local element name as an owned string.
#[must_use]
pub fn element_name(element: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(element.local_name().as_ref()).into_owned()
}

/// Unescaped text content.
///
/// # Errors
///
/// Returns [`PortError::Xml`] if an entity cannot be resolved.
pub fn text_content(text: &BytesText<'_>) -> Result<String, PortError> {
    Ok(text
        .unescape()
        .map_err(quick_xml::Error::from)?
        .into_owned())
}
