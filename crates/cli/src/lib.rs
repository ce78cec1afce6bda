//! Command-line entry point: open the given files into a session and print
//! a summary line per document.
//!
//! A file that fails to open is reported and skipped; only a startup-level
//! failure exits non-zero.

use anyhow::Result;
use blackout_core::{SessionState, ZoomMemory};
use clap::Parser;
use doc_engine::{default_engine, DocumentKind};
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use storage::Storage;

#[derive(Debug, Parser)]
#[command(name = "blackout")]
#[command(about = "Annotate and redact images and PDF documents")]
pub struct Cli {
    /// Files to open at startup.
    #[arg(value_name = "FILE")]
    files: Vec<PathBuf>,
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    env_logger::init();
    let cli = Cli::parse_from(args);

    let store = open_storage();
    let mut zoom = match &store {
        Some(store) => store.load_zoom().unwrap_or_default(),
        None => storage::ZoomSettings::default(),
    };
    let credentials = match &store {
        Some(store) => store.load_credentials().unwrap_or_default(),
        None => storage::CredentialStore::default(),
    };
    let mut recent = match &store {
        Some(store) => store.load_recent().unwrap_or_default(),
        None => storage::RecentDocuments::default(),
    };

    let remembered: HashMap<PathBuf, f32> =
        zoom.entries().map(|(path, factor)| (path.to_path_buf(), factor)).collect();
    let mut session =
        SessionState::with_zoom_memory(ZoomMemory::from_parts(zoom.default_zoom, remembered));
    let mut engine = default_engine();

    for file in &cli.files {
        let path = absolute(file);
        let credential = credentials.lookup(&path);

        match session.open_document(&mut engine, &path, credential) {
            Ok(id) => {
                recent.add(&path);
                if let Some(doc) = session.documents().iter().find(|doc| doc.id() == id) {
                    println!(
                        "{}: {} page(s), {}{}",
                        path.display(),
                        doc.page_count(),
                        kind_label(doc.kind()),
                        if doc.is_encrypted() { ", encrypted" } else { "" },
                    );
                }
            }
            Err(err) => log::error!("could not open {}: {err}", path.display()),
        }
    }

    if let Some(store) = &store {
        zoom.absorb(
            session
                .zoom_memory()
                .entries()
                .iter()
                .map(|(path, factor)| (path.clone(), *factor)),
        );
        if let Err(err) = store.save_zoom(&zoom) {
            log::warn!("could not persist zoom settings: {err}");
        }
        if let Err(err) = store.save_recent(&recent) {
            log::warn!("could not persist recent documents: {err}");
        }
    }

    Ok(())
}

fn kind_label(kind: DocumentKind) -> &'static str {
    match kind {
        DocumentKind::RasterImage => "raster image",
        DocumentKind::Paginated => "paginated",
    }
}

fn absolute(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// The data directory is overridable for tests and sandboxed runs; losing
/// persistence is not fatal.
fn open_storage() -> Option<Storage> {
    if let Some(root) = std::env::var_os("BLACKOUT_DATA_DIR") {
        return Some(Storage::with_root(PathBuf::from(root)));
    }

    match Storage::from_default_project() {
        Ok(store) => Some(store),
        Err(err) => {
            log::warn!("preferences unavailable: {err}");
            None
        }
    }
}
