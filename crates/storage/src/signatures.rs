//! Saved signature stamps.
//!
//! Each entry is a portable encoded image (stored base64 inside the JSON
//! file) plus the placement size in display pixels. The catalog also
//! remembers which signature was used last so it comes preselected.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Placement size given to signatures that never had one chosen.
pub const DEFAULT_PLACEMENT_SIZE: u32 = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureEntry {
    /// Encoded image payload (PNG or JPEG bytes).
    #[serde(with = "base64_bytes")]
    pub image: Vec<u8>,
    /// Placement width in display pixels; height follows the aspect ratio.
    pub placement_size: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignatureCatalog {
    entries: BTreeMap<String, SignatureEntry>,
    last_used: Option<String>,
}

impl SignatureCatalog {
    pub fn insert(&mut self, name: impl Into<String>, image: Vec<u8>) {
        self.entries.insert(
            name.into(),
            SignatureEntry { image, placement_size: DEFAULT_PLACEMENT_SIZE },
        );
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let removed = self.entries.remove(name).is_some();
        if self.last_used.as_deref() == Some(name) {
            self.last_used = None;
        }
        removed
    }

    pub fn rename(&mut self, from: &str, to: impl Into<String>) -> bool {
        let Some(entry) = self.entries.remove(from) else {
            return false;
        };
        let to = to.into();
        if self.last_used.as_deref() == Some(from) {
            self.last_used = Some(to.clone());
        }
        self.entries.insert(to, entry);
        true
    }

    pub fn get(&self, name: &str) -> Option<&SignatureEntry> {
        self.entries.get(name)
    }

    pub fn set_placement_size(&mut self, name: &str, size: u32) -> bool {
        match self.entries.get_mut(name) {
            Some(entry) => {
                entry.placement_size = size;
                true
            }
            None => false,
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn mark_used(&mut self, name: &str) {
        if self.entries.contains_key(name) {
            self.last_used = Some(name.to_owned());
        }
    }

    /// The remembered selection, or any available signature as a fallback.
    pub fn preselected(&self) -> Option<&str> {
        self.last_used
            .as_deref()
            .filter(|name| self.entries.contains_key(*name))
            .or_else(|| self.entries.keys().next().map(String::as_str))
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}
