//! Persisted zoom factors.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

fn default_zoom() -> f32 {
    0.6
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoomSettings {
    /// Zoom applied to documents without a remembered factor.
    #[serde(default = "default_zoom")]
    pub default_zoom: f32,
    #[serde(default)]
    by_document: BTreeMap<PathBuf, f32>,
}

impl Default for ZoomSettings {
    fn default() -> Self {
        Self { default_zoom: default_zoom(), by_document: BTreeMap::new() }
    }
}

impl ZoomSettings {
    pub fn remember(&mut self, path: &Path, zoom: f32) {
        self.by_document.insert(path.to_path_buf(), zoom);
    }

    pub fn zoom_for(&self, path: &Path) -> Option<f32> {
        self.by_document.get(path).copied()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&Path, f32)> {
        self.by_document.iter().map(|(path, zoom)| (path.as_path(), *zoom))
    }

    /// Merge a session's zoom map back in, session values winning.
    pub fn absorb(&mut self, entries: impl IntoIterator<Item = (PathBuf, f32)>) {
        for (path, zoom) in entries {
            self.by_document.insert(path, zoom);
        }
    }
}
