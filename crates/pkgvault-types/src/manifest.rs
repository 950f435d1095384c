use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TypeError;

/// JSON key under which dist-tags are stored.
pub const DIST_TAGS: &str = "dist-tags";

/// The dist-tag clients resolve when no version is requested.
pub const LATEST_TAG: &str = "latest";

/// Top-level keys owned by the typed fields; `extra` must not carry them.
const RESERVED_KEYS: &[&str] = &["name", "versions", DIST_TAGS];

/// Full metadata document for one package.
///
/// The name is the identity. `versions` maps a version string to that
/// version's metadata (kept as raw JSON so registry-specific fields survive a
/// round trip), and `dist_tags` maps a tag such as `latest` to a version
/// string. Anything else in the document (`time`, `readme`, `_attachments`,
/// `_uplinks`, ...) lands in `extra` and is written back verbatim. Encoding
/// fails if `extra` holds one of the typed keys, since the output would carry
/// that key twice.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,

    #[serde(default)]
    pub versions: BTreeMap<String, Value>,

    #[serde(rename = "dist-tags", default)]
    pub dist_tags: BTreeMap<String, String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Manifest {
    /// An empty manifest for `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Insert (or replace) the metadata for `version`.
    pub fn add_version(&mut self, version: impl Into<String>, metadata: Value) {
        self.versions.insert(version.into(), metadata);
    }

    /// Point `tag` at `version`. Returns the version it previously pointed at.
    pub fn tag(&mut self, tag: impl Into<String>, version: impl Into<String>) -> Option<String> {
        self.dist_tags.insert(tag.into(), version.into())
    }

    /// The version string `latest` points at, if any.
    pub fn latest_version(&self) -> Option<&str> {
        self.dist_tags.get(LATEST_TAG).map(String::as_str)
    }

    /// Metadata of the version `latest` points at.
    ///
    /// Returns `None` when the tag is missing or dangles.
    pub fn latest(&self) -> Option<&Value> {
        self.latest_version().and_then(|v| self.versions.get(v))
    }

    /// Dist-tags whose target version is not present in `versions`.
    pub fn dangling_tags(&self) -> Vec<&str> {
        self.dist_tags
            .iter()
            .filter(|(_, version)| !self.versions.contains_key(version.as_str()))
            .map(|(tag, _)| tag.as_str())
            .collect()
    }

    /// Parse a manifest from its JSON encoding.
    pub fn from_json(bytes: &[u8]) -> Result<Self, TypeError> {
        serde_json::from_slice(bytes).map_err(|e| TypeError::Serialization(e.to_string()))
    }

    /// Encode the manifest as JSON.
    pub fn to_json(&self) -> Result<Vec<u8>, TypeError> {
        self.check_extra()?;
        serde_json::to_vec(self).map_err(|e| TypeError::Serialization(e.to_string()))
    }

    /// Encode the manifest as indented JSON, the layout used on disk.
    pub fn to_json_pretty(&self) -> Result<Vec<u8>, TypeError> {
        self.check_extra()?;
        serde_json::to_vec_pretty(self).map_err(|e| TypeError::Serialization(e.to_string()))
    }

    fn check_extra(&self) -> Result<(), TypeError> {
        match RESERVED_KEYS.iter().find(|key| self.extra.contains_key(**key)) {
            Some(key) => Err(TypeError::Serialization(format!(
                "extension field {key:?} shadows a manifest field"
            ))),
            None => Ok(()),
        }
    }
}
