//! Remembered credentials for encrypted documents.
//!
//! Credentials are stored as plaintext JSON, a known limitation carried
//! over from the behavior this replaces. A hardened deployment should back
//! this type with platform secret storage instead; the API stays the same.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CredentialStore {
    by_path: BTreeMap<PathBuf, String>,
}

impl CredentialStore {
    pub fn remember(&mut self, path: &Path, credential: impl Into<String>) {
        self.by_path.insert(path.to_path_buf(), credential.into());
    }

    pub fn lookup(&self, path: &Path) -> Option<&str> {
        self.by_path.get(path).map(String::as_str)
    }

    pub fn forget(&mut self, path: &Path) -> bool {
        self.by_path.remove(path).is_some()
    }

    pub fn clear(&mut self) {
        self.by_path.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.by_path.keys().map(PathBuf::as_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_returns_remembered_credential() {
        let mut store = CredentialStore::default();
        store.remember(Path::new("/docs/locked.pdf"), "hunter2");

        assert_eq!(store.lookup(Path::new("/docs/locked.pdf")), Some("hunter2"));
        assert_eq!(store.lookup(Path::new("/docs/other.pdf")), None);
    }

    #[test]
    fn forget_removes_a_single_entry() {
        let mut store = CredentialStore::default();
        store.remember(Path::new("/a.pdf"), "one");
        store.remember(Path::new("/b.pdf"), "two");

        assert!(store.forget(Path::new("/a.pdf")));
        assert!(!store.forget(Path::new("/a.pdf")));
        assert_eq!(store.lookup(Path::new("/b.pdf")), Some("two"));
    }

    #[test]
    fn clear_empties_the_store() {
        let mut store = CredentialStore::default();
        store.remember(Path::new("/a.pdf"), "one");
        store.clear();
        assert!(store.is_empty());
    }
}
