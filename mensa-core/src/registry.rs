//! Static canteen registries and the URL template that names published files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;

use crate::model::{Canteen, FeedKind};
use crate::ports::PortError;

/// A registry entry that carries the common canteen record plus site-specific fields.
pub trait CanteenEntry {
    /// The common record.
    fn canteen(&self) -> &Canteen;
    /// Mutable access, used while loading.
    fn canteen_mut(&mut self) -> &mut Canteen;
}

impl CanteenEntry for Canteen {
    fn canteen(&self) -> &Canteen {
        self
    }

    fn canteen_mut(&mut self) -> &mut Canteen {
        self
    }
}

/// Canteens of one parser, keyed by reference.
#[derive(Debug, Clone)]
pub struct CanteenRegistry<E = Canteen> {
    entries: BTreeMap<String, E>,
}

impl<E: CanteenEntry + DeserializeOwned> CanteenRegistry<E> {
    /// Load a JSON object keyed by reference.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::Json`] if the document does not match `E`.
    pub fn from_json(json: &str) -> Result<Self, PortError> {
        let raw: BTreeMap<String, E> = serde_json::from_str(json)?;
        let entries = raw
            .into_iter()
            .map(|(reference, mut entry)| {
                let canteen = entry.canteen_mut();
                canteen.reference.clone_from(&reference);
                if canteen.id.is_empty() {
                    canteen.id.clone_from(&reference);
                }
                (reference, entry)
            })
            .collect();
        Ok(Self { entries })
    }

    /// Load a JSON object keyed by site id whose entries carry a `reference` field.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::Json`] if the document does not match `E`, or
    /// [`PortError::Internal`] if an entry has no reference.
    pub fn from_json_keyed_by_id(json: &str) -> Result<Self, PortError> {
        let raw: BTreeMap<String, E> = serde_json::from_str(json)?;
        let mut entries = BTreeMap::new();
        for (id, mut entry) in raw {
            let canteen = entry.canteen_mut();
            if canteen.reference.is_empty() {
                return Err(PortError::Internal(format!("canteen {id} has no reference")));
            }
            canteen.id = id;
            entries.insert(canteen.reference.clone(), entry);
        }
        Ok(Self { entries })
    }
}

impl<E: CanteenEntry> CanteenRegistry<E> {
    /// Build a registry from already loaded entries.
    #[must_use]
    pub fn from_entries<I: IntoIterator<Item = E>>(entries: I) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|entry| (entry.canteen().reference.clone(), entry))
                .collect(),
        }
    }

    /// Look up a canteen.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::UnknownCanteen`] when the reference is not registered.
    pub fn get(&self, reference: &str) -> Result<&E, PortError> {
        self.entries
            .get(reference)
            .ok_or_else(|| PortError::UnknownCanteen(reference.to_owned()))
    }

    /// Whether the reference is registered.
    #[must_use]
    pub fn contains(&self, reference: &str) -> bool {
        self.entries.contains_key(reference)
    }

    /// All references in sorted order.
    #[must_use]
    pub fn references(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Iterator over all entries.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &E)> {
        self.entries.iter()
    }

    /// Number of registered canteens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pretty JSON object mapping each reference to its meta document URL.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::Json`] if serialization fails.
    pub fn json(&self, urls: &UrlTemplate) -> Result<String, PortError> {
        let map: BTreeMap<&str, String> = self
            .entries
            .keys()
            .map(|reference| (reference.as_str(), urls.meta(reference)))
            .collect();
        Ok(serde_json::to_string_pretty(&map)?)
    }
}

/// Names published artifacts: `{base}{meta|feed|today}/{parser}_{reference}.xml`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlTemplate {
    base: String,
    parser: String,
}

impl UrlTemplate {
    /// Template for `parser` below `base` (a URL or a directory path).
    #[must_use]
    pub fn new<B: Into<String>, P: Into<String>>(base: B, parser: P) -> Self {
        let mut base = base.into();
        if !base.is_empty() && !base.ends_with('/') {
            base.push('/');
        }
        Self {
            base,
            parser: parser.into(),
        }
    }

    /// Parser name this template is for.
    #[must_use]
    pub fn parser(&self) -> &str {
        &self.parser
    }

    /// URL of a document in the `meta`, `feed` or `today` folder; the reference is percent-encoded.
    #[must_use]
    pub fn url(&self, folder: &str, reference: &str) -> String {
        format!(
            "{}{folder}/{}_{}.xml",
            self.base,
            self.parser,
            urlencoding::encode(reference)
        )
    }

    /// URL of the meta document.
    #[must_use]
    pub fn meta(&self, reference: &str) -> String {
        self.url("meta", reference)
    }

    /// URL of a feed document.
    #[must_use]
    pub fn feed(&self, kind: FeedKind, reference: &str) -> String {
        self.url(kind.file_title(), reference)
    }

    /// File path below `root` for a document in `folder`; the reference is kept verbatim.
    #[must_use]
    pub fn path(root: &Path, parser: &str, folder: &str, reference: &str) -> PathBuf {
        root.join(folder).join(format!("{parser}_{reference}.xml"))
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize)]
    struct Entry {
        #[serde(flatten)]
        canteen: Canteen,
        dportname: String,
    }

    impl CanteenEntry for Entry {
        fn canteen(&self) -> &Canteen {
            &self.canteen
        }

        fn canteen_mut(&mut self) -> &mut Canteen {
            &mut self.canteen
        }
    }

    #[test]
    fn loads_flattened_entries_and_fills_reference() {
        let registry = CanteenRegistry::<Entry>::from_json(
            r#"{"tumensa": {"name": "Mensa", "dportname": "Mensa TU"}}"#,
        )
        .expect("registry loads");
        let entry = registry.get("tumensa").expect("entry exists");
        assert_eq!(entry.canteen.reference, "tumensa");
        assert_eq!(entry.canteen.id, "tumensa");
        assert_eq!(entry.dportname, "Mensa TU");
    }

    #[test]
    fn rekeys_entries_loaded_by_id() {
        let registry = CanteenRegistry::<Canteen>::from_json_keyed_by_id(
            r#"{"42": {"name": "Mensa", "reference": "mensa-zentral"}}"#,
        )
        .expect("registry loads");
        assert_eq!(registry.references(), vec!["mensa-zentral".to_owned()]);
        assert_eq!(registry.get("mensa-zentral").expect("entry exists").id, "42");
    }

    #[test]
    fn unknown_reference_is_an_error() {
        let registry = CanteenRegistry::<Canteen>::from_entries(Vec::new());
        assert!(matches!(
            registry.get("nope"),
            Err(PortError::UnknownCanteen(reference)) if reference == "nope"
        ));
    }

    #[test]
    fn json_maps_references_to_meta_urls() {
        let registry = CanteenRegistry::from_entries([Canteen {
            reference: "mensa süd".to_owned(),
            name: "Mensa".to_owned(),
            ..Canteen::default()
        }]);
        let urls = UrlTemplate::new("https://example.org/mensa", "koeln");
        let json = registry.json(&urls).expect("json renders");
        assert_eq!(
            json,
            "{\n  \"mensa süd\": \"https://example.org/mensa/meta/koeln_mensa%20s%C3%BCd.xml\"\n}"
        );
    }
}
