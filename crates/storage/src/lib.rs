//! Persisted session preferences: signature catalog, credential store,
//! zoom memory and the recent-document list.
//!
//! Everything lives as schema-versioned JSON under the platform data
//! directory and is written atomically (temp file, then rename). Loading a
//! missing file yields the type's default, so a fresh profile just works.

use directories::ProjectDirs;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

mod credentials;
mod recent;
mod signatures;
mod zoom;

pub use credentials::CredentialStore;
pub use recent::RecentDocuments;
pub use signatures::{SignatureCatalog, SignatureEntry};
pub use zoom::ZoomSettings;

const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("unable to resolve local data directory")]
    NoDataDirectory,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Envelope<T> {
    version: u32,
    data: T,
}

/// File-backed store rooted in the platform data directory.
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn from_default_project() -> Result<Self, StorageError> {
        let dirs =
            ProjectDirs::from("dev", "Blackout", "Blackout").ok_or(StorageError::NoDataDirectory)?;

        Ok(Self { root: dirs.data_local_dir().to_path_buf() })
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn load_signatures(&self) -> Result<SignatureCatalog, StorageError> {
        self.load("signatures.json")
    }

    pub fn save_signatures(&self, catalog: &SignatureCatalog) -> Result<(), StorageError> {
        self.save("signatures.json", catalog)
    }

    pub fn load_credentials(&self) -> Result<CredentialStore, StorageError> {
        self.load("credentials.json")
    }

    pub fn save_credentials(&self, store: &CredentialStore) -> Result<(), StorageError> {
        self.save("credentials.json", store)
    }

    pub fn load_zoom(&self) -> Result<ZoomSettings, StorageError> {
        self.load("zoom.json")
    }

    pub fn save_zoom(&self, settings: &ZoomSettings) -> Result<(), StorageError> {
        self.save("zoom.json", settings)
    }

    pub fn load_recent(&self) -> Result<RecentDocuments, StorageError> {
        let mut recent: RecentDocuments = self.load("recent.json")?;
        recent.prune_missing();
        Ok(recent)
    }

    pub fn save_recent(&self, recent: &RecentDocuments) -> Result<(), StorageError> {
        self.save("recent.json", recent)
    }

    fn load<T: DeserializeOwned + Default>(&self, name: &str) -> Result<T, StorageError> {
        let path = self.root.join(name);
        if !path.exists() {
            return Ok(T::default());
        }

        let bytes = fs::read(path)?;
        let envelope: Envelope<T> = serde_json::from_slice(&bytes)?;
        Ok(envelope.data)
    }

    fn save<T: Serialize>(&self, name: &str, value: &T) -> Result<(), StorageError> {
        fs::create_dir_all(&self.root)?;

        let envelope = Envelope { version: SCHEMA_VERSION, data: value };
        let bytes = serde_json::to_vec_pretty(&envelope)?;

        let path = self.root.join(name);
        let temp = self.root.join(format!("{name}.tmp"));
        fs::write(&temp, bytes)?;
        fs::rename(&temp, &path)?;
        Ok(())
    }
}
