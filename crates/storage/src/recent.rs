//! Recently opened documents, most recent first.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Maximum number of entries kept.
pub const MAX_RECENT: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecentDocuments {
    paths: Vec<PathBuf>,
}

impl RecentDocuments {
    /// Record a path as most recently used. Duplicates move to the front;
    /// the list is capped at `MAX_RECENT`.
    pub fn add(&mut self, path: &Path) {
        self.paths.retain(|existing| existing != path);
        self.paths.insert(0, path.to_path_buf());
        self.paths.truncate(MAX_RECENT);
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn clear(&mut self) {
        self.paths.clear();
    }

    /// Drop entries whose files no longer exist.
    pub fn prune_missing(&mut self) {
        let before = self.paths.len();
        self.paths.retain(|path| path.exists());
        let dropped = before - self.paths.len();
        if dropped > 0 {
            log::debug!("pruned {dropped} missing recent entries");
        }
    }
}
