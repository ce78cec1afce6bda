//! The save pipeline.
//!
//! A save is a transaction: reopen the source into a fresh handle (the live,
//! displayed handle is never mutated), replay the ledger onto it in page
//! order, write to a temporary path, then atomically rename over the
//! destination. Any failure before the rename leaves the original bytes
//! untouched, and the caller keeps the dirty flag set.
//!
//! Encrypted sources cannot be edited in place. They are rebuilt page by
//! page into a fresh unencrypted document; if the structural copy fails,
//! each page is rendered to a bitmap and re-embedded instead, degrading
//! vector content to raster but guaranteeing an output.

use crate::document::{Document, DocumentId};
use crate::ledger::ModificationLedger;
use doc_engine::{raster, DocEngine, DocRect, DocumentHandle, EngineError, OpenOutcome};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum SaveError {
    #[error("could not reopen source document: {0}")]
    Open(EngineError),
    #[error("wrong or missing credential for encrypted document")]
    Authentication,
    #[error("could not replay edit onto page {page}: {source}")]
    Replay { page: u32, source: EngineError },
    #[error("could not write output: {0}")]
    Write(String),
    #[error("could not reconstruct encrypted document: {0}")]
    Reconstruction(String),
}

/// Where an encrypted save lands. Overwriting the original necessarily
/// strips its encryption; callers surface that as an explicit, confirmed
/// choice by constructing this variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncryptedSaveDestination {
    NewCopy(PathBuf),
    OverwriteStrippingEncryption,
}

/// Default derived output path: `report.pdf` becomes `report_redacted.pdf`.
pub fn redacted_copy_path(path: &Path) -> PathBuf {
    let stem = path.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}_redacted.{}", ext.to_string_lossy()),
        None => format!("{stem}_redacted"),
    };
    path.with_file_name(name)
}

fn temp_path(dest: &Path) -> PathBuf {
    let mut os = dest.as_os_str().to_os_string();
    os.push(".tmp");
    PathBuf::from(os)
}

fn discard_temp(temp: &Path) {
    if temp.exists() {
        if let Err(err) = fs::remove_file(temp) {
            log::warn!("could not remove temp file {}: {err}", temp.display());
        }
    }
}

pub(crate) fn replay_record<E: DocEngine>(
    engine: &mut E,
    handle: DocumentHandle,
    page: u32,
    record: &crate::ledger::EditRecord,
) -> Result<(), EngineError> {
    use crate::ledger::EditRecord::*;

    match record {
        Redaction { rect, color } => engine.draw_filled_rect(handle, page, *rect, *color),
        TextAnnotation { at, text, color, font_size } => {
            engine.draw_text(handle, page, *at, text, *font_size, *color)
        }
        Highlight { rect, color, opacity } => {
            engine.draw_highlight(handle, page, *rect, *color, *opacity)
        }
        SignaturePlacement { at, width, height, image_bytes } => engine.draw_image(
            handle,
            page,
            DocRect::new(at.x, at.y, at.x + width, at.y + height),
            image_bytes,
        ),
    }
}

fn replay_ledger<E: DocEngine>(
    engine: &mut E,
    handle: DocumentHandle,
    document: DocumentId,
    ledger: &ModificationLedger,
) -> Result<(), SaveError> {
    for page in ledger.pages_with_records(document) {
        for record in ledger.records_for(document, page) {
            replay_record(engine, handle, page, record)
                .map_err(|source| SaveError::Replay { page, source })?;
        }
    }
    Ok(())
}

fn write_atomic<E: DocEngine>(
    engine: &mut E,
    handle: DocumentHandle,
    dest: &Path,
    strip_encryption: bool,
) -> Result<(), SaveError> {
    let temp = temp_path(dest);

    if let Err(err) = engine.save(handle, &temp, strip_encryption) {
        discard_temp(&temp);
        return Err(SaveError::Write(err.to_string()));
    }
    if let Err(err) = fs::rename(&temp, dest) {
        discard_temp(&temp);
        return Err(SaveError::Write(err.to_string()));
    }

    log::debug!("saved {}", dest.display());
    Ok(())
}

/// Save an unencrypted document: fresh reopen, full replay, atomic write.
///
/// The caller clears the ledger and dirty flag only after this returns Ok.
pub fn save_document<E: DocEngine>(
    engine: &mut E,
    doc: &Document,
    ledger: &ModificationLedger,
    dest: &Path,
) -> Result<(), SaveError> {
    let fresh = match engine.open(doc.path()).map_err(SaveError::Open)? {
        OpenOutcome::Ready(handle) => handle,
        OpenOutcome::PasswordRequired(handle) => {
            let _ = engine.close(handle);
            return Err(SaveError::Authentication);
        }
    };

    let result = replay_ledger(engine, fresh, doc.id(), ledger)
        .and_then(|()| write_atomic(engine, fresh, dest, false));
    let _ = engine.close(fresh);
    result
}

/// Save an encrypted document by rebuilding it as an unencrypted copy.
///
/// Returns the path the rebuilt document was written to.
pub fn save_encrypted<E: DocEngine>(
    engine: &mut E,
    doc: &Document,
    ledger: &ModificationLedger,
    credential: &str,
    dest: EncryptedSaveDestination,
) -> Result<PathBuf, SaveError> {
    let dest_path = match &dest {
        EncryptedSaveDestination::NewCopy(path) => path.clone(),
        EncryptedSaveDestination::OverwriteStrippingEncryption => doc.path().to_path_buf(),
    };

    let source = engine.open(doc.path()).map_err(SaveError::Open)?.handle();
    let result = save_encrypted_inner(engine, source, doc, ledger, credential, &dest_path);
    let _ = engine.close(source);
    result.map(|()| dest_path)
}

fn save_encrypted_inner<E: DocEngine>(
    engine: &mut E,
    source: DocumentHandle,
    doc: &Document,
    ledger: &ModificationLedger,
    credential: &str,
    dest_path: &Path,
) -> Result<(), SaveError> {
    let authenticated = engine.authenticate(source, credential).unwrap_or(false);
    if !authenticated {
        return Err(SaveError::Authentication);
    }

    let rebuilt = match rebuild_structural(engine, source, doc, ledger) {
        Ok(handle) => handle,
        Err(SaveError::Reconstruction(reason)) => {
            log::warn!("structural copy failed ({reason}); using rasterized fallback");
            rebuild_rasterized(engine, source, doc, ledger)?
        }
        Err(other) => return Err(other),
    };

    let result = write_atomic(engine, rebuilt, dest_path, true);
    let _ = engine.close(rebuilt);
    result
}

/// Copy every source page structurally into a new document and replay the
/// ledger on top.
fn rebuild_structural<E: DocEngine>(
    engine: &mut E,
    source: DocumentHandle,
    doc: &Document,
    ledger: &ModificationLedger,
) -> Result<DocumentHandle, SaveError> {
    let reconstruction = |err: EngineError| SaveError::Reconstruction(err.to_string());

    let page_count = engine.page_count(source).map_err(reconstruction)?;
    let rebuilt = engine.new_document();

    let result = (|| {
        for page in 0..page_count {
            let size = engine.page_size(source, page).map_err(reconstruction)?;
            engine.add_page(rebuilt, size.width_pt, size.height_pt).map_err(reconstruction)?;

            let copied =
                engine.copy_page_content(rebuilt, page, source, page).map_err(reconstruction)?;
            if !copied {
                return Err(SaveError::Reconstruction(format!(
                    "page {page} could not be copied"
                )));
            }
        }
        replay_ledger(engine, rebuilt, doc.id(), ledger)
    })();

    match result {
        Ok(()) => Ok(rebuilt),
        Err(err) => {
            let _ = engine.close(rebuilt);
            Err(err)
        }
    }
}

/// Fallback reconstruction: render each source page at the document's
/// oversample factor, embed the bitmap as a full-page image, replay the
/// ledger on top. Degrades vector and text content to raster.
fn rebuild_rasterized<E: DocEngine>(
    engine: &mut E,
    source: DocumentHandle,
    doc: &Document,
    ledger: &ModificationLedger,
) -> Result<DocumentHandle, SaveError> {
    let reconstruction = |err: EngineError| SaveError::Reconstruction(err.to_string());

    let page_count = engine.page_count(source).map_err(reconstruction)?;
    let rebuilt = engine.new_document();

    let result = (|| {
        for page in 0..page_count {
            let size = engine.page_size(source, page).map_err(reconstruction)?;
            let rendered =
                engine.render_page(source, page, doc.oversample()).map_err(reconstruction)?;
            let bytes = raster::encode_png(&rendered).map_err(reconstruction)?;

            engine.add_page(rebuilt, size.width_pt, size.height_pt).map_err(reconstruction)?;
            engine
                .draw_image(
                    rebuilt,
                    page,
                    DocRect::new(0.0, 0.0, size.width_pt, size.height_pt),
                    &bytes,
                )
                .map_err(reconstruction)?;
        }
        replay_ledger(engine, rebuilt, doc.id(), ledger)
    })();

    match result {
        Ok(()) => Ok(rebuilt),
        Err(err) => {
            let _ = engine.close(rebuilt);
            Err(err)
        }
    }
}

/// Export every page that carries edits as a standalone PNG next to the
/// source file: `report.pdf` yields `report_page_3_redacted.png` and so on.
pub fn export_pages_as_images<E: DocEngine>(
    engine: &E,
    doc: &Document,
    ledger: &ModificationLedger,
) -> Result<Vec<PathBuf>, SaveError> {
    let mut written = Vec::new();

    for page in ledger.pages_with_records(doc.id()) {
        let mut rendered = engine
            .render_page(doc.handle(), page, doc.oversample())
            .map_err(|source| SaveError::Replay { page, source })?;

        for record in ledger.records_for(doc.id(), page) {
            raster::apply_op(&mut rendered, &record.to_draw_op(), doc.oversample())
                .map_err(|source| SaveError::Replay { page, source })?;
        }

        let stem = doc.path().file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
        let path = doc
            .path()
            .with_file_name(format!("{stem}_page_{}_redacted.png", page + 1));
        raster::write_png(&rendered, &path).map_err(|err| SaveError::Write(err.to_string()))?;
        written.push(path);
    }

    Ok(written)
}
