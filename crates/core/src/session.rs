//! Session state: the open document list, the dirty gate, zoom memory,
//! tool state and the live page preview.
//!
//! The core ordering guarantee lives here: the active-document pointer never
//! moves away from a document carrying unsaved edits until the caller
//! resolves the pending decision with save, discard or cancel.

use crate::document::{Document, DocumentId};
use crate::ledger::{EditRecord, ModificationLedger};
use crate::save::{self, EncryptedSaveDestination, SaveError};
use crate::tool::ActiveTool;
use crate::undo::{UndoFrame, UndoStack};
use doc_engine::{raster, DocEngine, EngineError, OpenOutcome, RgbaImage};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Zoom applied to documents seen for the first time.
pub const DEFAULT_ZOOM: f32 = 0.6;

const ZOOM_STEP: f32 = 1.25;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no document is open")]
    NoDocument,
    #[error("document index {0} is out of bounds")]
    InvalidIndex(usize),
    #[error("no page preview has been rendered")]
    NoPreview,
    #[error("an unsaved-changes decision is already pending")]
    DecisionPending,
    #[error("no unsaved-changes decision is pending")]
    NoPendingDecision,
    #[error("encrypted document requires an explicit save destination")]
    EncryptedNeedsDecision,
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Save(#[from] SaveError),
}

/// Live raster preview of the current page. Edits are applied here
/// immediately; the durable record goes to the ledger.
#[derive(Debug, Clone)]
pub struct PagePreview {
    pub document_id: DocumentId,
    pub page: u32,
    pub oversample: f32,
    pub image: RgbaImage,
}

/// Per-path zoom factors, loaded at startup and persisted on exit.
#[derive(Debug, Clone)]
pub struct ZoomMemory {
    default_zoom: f32,
    by_path: HashMap<PathBuf, f32>,
}

impl Default for ZoomMemory {
    fn default() -> Self {
        Self { default_zoom: DEFAULT_ZOOM, by_path: HashMap::new() }
    }
}

impl ZoomMemory {
    pub fn from_parts(default_zoom: f32, by_path: HashMap<PathBuf, f32>) -> Self {
        Self { default_zoom: default_zoom.max(0.1), by_path }
    }

    pub fn zoom_for(&self, path: &Path) -> f32 {
        self.by_path.get(path).copied().unwrap_or(self.default_zoom)
    }

    pub fn remember(&mut self, path: &Path, zoom: f32) {
        self.by_path.insert(path.to_path_buf(), zoom);
    }

    pub fn default_zoom(&self) -> f32 {
        self.default_zoom
    }

    pub fn set_default(&mut self, zoom: f32) {
        self.default_zoom = zoom.max(0.1);
    }

    pub fn entries(&self) -> &HashMap<PathBuf, f32> {
        &self.by_path
    }
}

/// Result of asking to move away from the current document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchGate {
    /// The move happened (nothing unsaved stood in the way).
    Switched,
    /// Unsaved edits exist; resolve with `complete_pending`.
    DecisionNeeded,
}

/// The three outcomes offered for unsaved edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchDecision {
    SaveThenSwitch,
    DiscardThenSwitch,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingAction {
    SwitchTo(usize),
    Remove(usize),
}

/// Owns the open documents and coordinates ledger, undo stack, preview and
/// zoom memory across a multi-document session.
#[derive(Debug)]
pub struct SessionState {
    documents: Vec<Document>,
    current: Option<usize>,
    pending: Option<PendingAction>,
    ledger: ModificationLedger,
    undo: UndoStack,
    tool: ActiveTool,
    zoom: ZoomMemory,
    preview: Option<PagePreview>,
    next_id: u64,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::with_zoom_memory(ZoomMemory::default())
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_zoom_memory(zoom: ZoomMemory) -> Self {
        Self {
            documents: Vec::new(),
            current: None,
            pending: None,
            ledger: ModificationLedger::new(),
            undo: UndoStack::default(),
            tool: ActiveTool::Idle,
            zoom,
            preview: None,
            next_id: 0,
        }
    }

    /// Open a file into the session. For encrypted sources the credential is
    /// tried immediately; without a valid one the open fails.
    ///
    /// Edits are scoped to the session: a (re)opened document always starts
    /// with an empty ledger and a clean dirty flag.
    pub fn open_document<E: DocEngine>(
        &mut self,
        engine: &mut E,
        path: &Path,
        credential: Option<&str>,
    ) -> Result<DocumentId, SessionError> {
        let outcome = engine.open(path)?;
        let handle = outcome.handle();
        let encrypted = matches!(outcome, OpenOutcome::PasswordRequired(_));

        if encrypted {
            let authenticated = match credential {
                Some(credential) => match engine.authenticate(handle, credential) {
                    Ok(ok) => ok,
                    Err(err) => {
                        let _ = engine.close(handle);
                        return Err(err.into());
                    }
                },
                None => false,
            };
            if !authenticated {
                let _ = engine.close(handle);
                return Err(EngineError::AuthenticationRequired.into());
            }
        }

        let kind = engine.kind(handle)?;
        let page_count = engine.page_count(handle)?;

        self.next_id += 1;
        let id = DocumentId(self.next_id);
        let zoom = self.zoom.zoom_for(path);
        self.documents
            .push(Document::new(id, path.to_path_buf(), kind, page_count, encrypted, handle, zoom));

        if self.current.is_none() {
            self.current = Some(self.documents.len() - 1);
        }

        log::debug!("opened {} ({page_count} pages, zoom {zoom})", path.display());
        Ok(id)
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn current_document(&self) -> Option<&Document> {
        self.current.and_then(|index| self.documents.get(index))
    }

    fn current_document_mut(&mut self) -> Result<&mut Document, SessionError> {
        let index = self.current.ok_or(SessionError::NoDocument)?;
        self.documents.get_mut(index).ok_or(SessionError::NoDocument)
    }

    pub fn is_dirty(&self) -> bool {
        self.current_document().is_some_and(Document::is_dirty)
    }

    // --- tool state ---------------------------------------------------

    pub fn active_tool(&self) -> ActiveTool {
        self.tool
    }

    /// Toggle-style activation: requesting the active tool deactivates it.
    pub fn activate_tool(&mut self, requested: ActiveTool) -> ActiveTool {
        self.tool = self.tool.toggle(requested);
        self.tool
    }

    // --- zoom ----------------------------------------------------------

    pub fn zoom_memory(&self) -> &ZoomMemory {
        &self.zoom
    }

    pub fn set_zoom(&mut self, zoom: f32) -> Result<f32, SessionError> {
        let doc = self.current_document_mut()?;
        doc.set_zoom(zoom);
        let zoom = doc.zoom();
        let path = doc.path().to_path_buf();
        // Zoom only affects display scaling; the raster preview is rendered
        // at the oversample factor and stays valid.
        self.zoom.remember(&path, zoom);
        Ok(zoom)
    }

    pub fn zoom_in(&mut self) -> Result<f32, SessionError> {
        let current = self.current_document().ok_or(SessionError::NoDocument)?.zoom();
        self.set_zoom(current * ZOOM_STEP)
    }

    pub fn zoom_out(&mut self) -> Result<f32, SessionError> {
        let current = self.current_document().ok_or(SessionError::NoDocument)?.zoom();
        self.set_zoom(current / ZOOM_STEP)
    }

    // --- preview and edits ---------------------------------------------

    /// Render the current page into the live preview.
    pub fn render_current_page<E: DocEngine>(
        &mut self,
        engine: &E,
    ) -> Result<&PagePreview, SessionError> {
        let doc = self.current_document().ok_or(SessionError::NoDocument)?;
        let page = doc.current_page();
        let oversample = doc.oversample();
        let image = engine.render_page(doc.handle(), page, oversample)?;

        self.preview =
            Some(PagePreview { document_id: doc.id(), page, oversample, image });
        Ok(self.preview.as_ref().expect("preview was just set"))
    }

    pub fn preview(&self) -> Option<&PagePreview> {
        self.preview.as_ref()
    }

    /// Apply an edit to the live preview and record it.
    ///
    /// The preview snapshot is taken before the edit, the edit is applied to
    /// the preview pixels, and only then is the record appended and the
    /// document marked dirty. An edit that fails to apply leaves no trace:
    /// no snapshot, no ledger entry, no dirty flag.
    pub fn apply_edit(&mut self, record: EditRecord) -> Result<(), SessionError> {
        let index = self.current.ok_or(SessionError::NoDocument)?;
        let doc = &mut self.documents[index];
        let preview = self.preview.as_mut().ok_or(SessionError::NoPreview)?;
        if preview.document_id != doc.id() || preview.page != doc.current_page() {
            return Err(SessionError::NoPreview);
        }

        let snapshot = preview.image.clone();
        if let Err(err) = raster::apply_op(&mut preview.image, &record.to_draw_op(), preview.oversample)
        {
            preview.image = snapshot;
            return Err(err.into());
        }

        self.undo.push(UndoFrame { document_id: doc.id(), page: preview.page, snapshot });
        self.ledger.record(doc.id(), preview.page, record);
        doc.mark_dirty();
        Ok(())
    }

    /// Undo the most recent edit: restore the snapshot and pop the ledger in
    /// one step. Returns whether anything was undone.
    pub fn undo(&mut self) -> bool {
        let Some(frame) = self.undo.pop() else {
            return false;
        };

        self.ledger.pop_last(frame.document_id);

        if let Some(preview) = self.preview.as_mut() {
            if preview.document_id == frame.document_id && preview.page == frame.page {
                preview.image = frame.snapshot;
            }
        }
        true
    }

    pub fn undo_depth(&self) -> usize {
        self.undo.len()
    }

    pub fn ledger(&self) -> &ModificationLedger {
        &self.ledger
    }

    // --- page navigation ------------------------------------------------

    pub fn next_page(&mut self) -> Result<bool, SessionError> {
        let moved = self.current_document_mut()?.next_page();
        if moved {
            self.preview = None;
        }
        Ok(moved)
    }

    pub fn prev_page(&mut self) -> Result<bool, SessionError> {
        let moved = self.current_document_mut()?.prev_page();
        if moved {
            self.preview = None;
        }
        Ok(moved)
    }

    pub fn goto_page(&mut self, page: u32) -> Result<bool, SessionError> {
        let moved = self.current_document_mut()?.set_current_page(page);
        if moved {
            self.preview = None;
        }
        Ok(moved)
    }

    // --- switching and removal (the dirty gate) -------------------------

    /// Ask to make `target` the current document. If the current document
    /// carries unsaved edits the pointer does not move; the caller must
    /// resolve the returned decision via `complete_pending`.
    pub fn begin_switch(&mut self, target: usize) -> Result<SwitchGate, SessionError> {
        if self.pending.is_some() {
            return Err(SessionError::DecisionPending);
        }
        if target >= self.documents.len() {
            return Err(SessionError::InvalidIndex(target));
        }
        if Some(target) == self.current {
            return Ok(SwitchGate::Switched);
        }

        if self.is_dirty() {
            self.pending = Some(PendingAction::SwitchTo(target));
            return Ok(SwitchGate::DecisionNeeded);
        }

        self.do_switch(target);
        Ok(SwitchGate::Switched)
    }

    pub fn next_document(&mut self) -> Result<SwitchGate, SessionError> {
        match self.current {
            Some(index) if index + 1 < self.documents.len() => self.begin_switch(index + 1),
            _ => Ok(SwitchGate::Switched),
        }
    }

    pub fn prev_document(&mut self) -> Result<SwitchGate, SessionError> {
        match self.current {
            Some(index) if index > 0 => self.begin_switch(index - 1),
            _ => Ok(SwitchGate::Switched),
        }
    }

    pub fn first_document(&mut self) -> Result<SwitchGate, SessionError> {
        if self.documents.is_empty() {
            return Ok(SwitchGate::Switched);
        }
        self.begin_switch(0)
    }

    pub fn last_document(&mut self) -> Result<SwitchGate, SessionError> {
        if self.documents.is_empty() {
            return Ok(SwitchGate::Switched);
        }
        self.begin_switch(self.documents.len() - 1)
    }

    /// Ask to remove a document from the session. Removing the current
    /// document while dirty requires a decision, like switching.
    pub fn begin_remove<E: DocEngine>(
        &mut self,
        engine: &mut E,
        index: usize,
    ) -> Result<SwitchGate, SessionError> {
        if self.pending.is_some() {
            return Err(SessionError::DecisionPending);
        }
        if index >= self.documents.len() {
            return Err(SessionError::InvalidIndex(index));
        }

        if Some(index) == self.current && self.is_dirty() {
            self.pending = Some(PendingAction::Remove(index));
            return Ok(SwitchGate::DecisionNeeded);
        }

        self.do_remove(engine, index);
        Ok(SwitchGate::Switched)
    }

    /// Resolve a pending switch or removal.
    ///
    /// Returns whether the pending action went through. `Cancel` clears the
    /// pending action and leaves everything in place. A failing save keeps
    /// the decision pending so the caller can retry or cancel.
    pub fn complete_pending<E: DocEngine>(
        &mut self,
        engine: &mut E,
        decision: SwitchDecision,
    ) -> Result<bool, SessionError> {
        let pending = self.pending.ok_or(SessionError::NoPendingDecision)?;

        match decision {
            SwitchDecision::Cancel => {
                self.pending = None;
                Ok(false)
            }
            SwitchDecision::SaveThenSwitch => {
                self.save_current_overwrite(engine)?;
                self.pending = None;
                self.apply_pending(engine, pending);
                Ok(true)
            }
            SwitchDecision::DiscardThenSwitch => {
                if let Some(index) = self.current {
                    let id = self.documents[index].id();
                    self.documents[index].clear_dirty();
                    self.ledger.clear(id);
                    self.undo.forget(id);
                }
                self.pending = None;
                self.apply_pending(engine, pending);
                Ok(true)
            }
        }
    }

    fn apply_pending<E: DocEngine>(&mut self, engine: &mut E, pending: PendingAction) {
        match pending {
            PendingAction::SwitchTo(target) => self.do_switch(target),
            PendingAction::Remove(index) => self.do_remove(engine, index),
        }
    }

    fn do_switch(&mut self, target: usize) {
        if let Some(doc) = self.current_document() {
            let (path, zoom) = (doc.path().to_path_buf(), doc.zoom());
            self.zoom.remember(&path, zoom);
        }
        self.current = Some(target);
        self.preview = None;
    }

    fn do_remove<E: DocEngine>(&mut self, engine: &mut E, index: usize) {
        let doc = self.documents.remove(index);
        self.zoom.remember(doc.path(), doc.zoom());
        self.ledger.clear(doc.id());
        self.undo.forget(doc.id());
        if let Err(err) = engine.close(doc.handle()) {
            log::warn!("closing {} failed: {err}", doc.path().display());
        }

        if self.preview.as_ref().is_some_and(|p| p.document_id == doc.id()) {
            self.preview = None;
        }

        self.current = match self.current {
            Some(current) if current == index => {
                if self.documents.is_empty() {
                    None
                } else {
                    Some(current.min(self.documents.len() - 1))
                }
            }
            Some(current) if current > index => Some(current - 1),
            other => other,
        };
    }

    // --- saving ----------------------------------------------------------

    /// Save the current document over its source path.
    pub fn save_current_overwrite<E: DocEngine>(
        &mut self,
        engine: &mut E,
    ) -> Result<PathBuf, SessionError> {
        self.save_current_to(engine, None)
    }

    /// Save the current document to a different path. The in-memory ledger
    /// is kept: the displayed document still carries its unsaved edits.
    pub fn save_current_as<E: DocEngine>(
        &mut self,
        engine: &mut E,
        dest: &Path,
    ) -> Result<PathBuf, SessionError> {
        self.save_current_to(engine, Some(dest))
    }

    fn save_current_to<E: DocEngine>(
        &mut self,
        engine: &mut E,
        dest: Option<&Path>,
    ) -> Result<PathBuf, SessionError> {
        let index = self.current.ok_or(SessionError::NoDocument)?;
        if self.documents[index].is_encrypted() {
            return Err(SessionError::EncryptedNeedsDecision);
        }

        let dest_path = dest
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.documents[index].path().to_path_buf());
        let overwrote = dest_path == self.documents[index].path();

        save::save_document(engine, &self.documents[index], &self.ledger, &dest_path)?;

        if overwrote {
            let id = self.documents[index].id();
            self.ledger.clear(id);
            self.documents[index].clear_dirty();
            self.refresh_current_handle(engine);
        }
        Ok(dest_path)
    }

    /// Save an encrypted current document via reconstruction.
    pub fn save_current_encrypted<E: DocEngine>(
        &mut self,
        engine: &mut E,
        credential: &str,
        dest: EncryptedSaveDestination,
    ) -> Result<PathBuf, SessionError> {
        let index = self.current.ok_or(SessionError::NoDocument)?;
        let overwrote = dest == EncryptedSaveDestination::OverwriteStrippingEncryption;

        let path =
            save::save_encrypted(engine, &self.documents[index], &self.ledger, credential, dest)?;

        if overwrote {
            let id = self.documents[index].id();
            self.ledger.clear(id);
            self.documents[index].clear_dirty();
            self.documents[index].set_encrypted(false);
            self.refresh_current_handle(engine);
        }
        Ok(path)
    }

    /// Export the current document's edited pages as standalone images.
    pub fn export_current_pages<E: DocEngine>(
        &self,
        engine: &E,
    ) -> Result<Vec<PathBuf>, SessionError> {
        let doc = self.current_document().ok_or(SessionError::NoDocument)?;
        Ok(save::export_pages_as_images(engine, doc, &self.ledger)?)
    }

    /// Point the live handle at the just-written file. Best effort: on
    /// failure the old handle stays in place and the session remains usable.
    fn refresh_current_handle<E: DocEngine>(&mut self, engine: &mut E) {
        let Some(index) = self.current else {
            return;
        };
        let path = self.documents[index].path().to_path_buf();

        match engine.open(&path) {
            Ok(OpenOutcome::Ready(handle)) => {
                let old = self.documents[index].handle();
                if let Err(err) = engine.close(old) {
                    log::warn!("closing stale handle failed: {err}");
                }
                self.documents[index].set_handle(handle);
            }
            Ok(OpenOutcome::PasswordRequired(handle)) => {
                // A freshly saved file should never be encrypted.
                let _ = engine.close(handle);
                log::warn!("reopened {} still requires a password", path.display());
            }
            Err(err) => log::warn!("could not reopen {}: {err}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubEngine;
    use doc_engine::{Color, DocPoint, DocRect};

    fn session_with_file(
        engine: &mut StubEngine,
        dir: &Path,
        name: &str,
        pages: u32,
    ) -> (SessionState, DocumentId) {
        let path = dir.join(name);
        std::fs::write(&path, b"ORIGINAL").unwrap();
        engine.register_file(&path, pages, None);

        let mut session = SessionState::new();
        let id = session.open_document(engine, &path, None).expect("open");
        (session, id)
    }

    fn redaction() -> EditRecord {
        EditRecord::Redaction {
            rect: DocRect::new(10.0, 10.0, 30.0, 30.0),
            color: Color::BLACK,
        }
    }

    #[test]
    fn opening_restores_remembered_zoom() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.pdf");
        std::fs::write(&path, b"x").unwrap();

        let mut engine = StubEngine::new();
        engine.register_file(&path, 1, None);

        let mut memory = ZoomMemory::default();
        memory.remember(&path, 1.5);

        let mut session = SessionState::with_zoom_memory(memory);
        session.open_document(&mut engine, &path, None).unwrap();

        assert_eq!(session.current_document().unwrap().zoom(), 1.5);
    }

    #[test]
    fn unknown_paths_get_the_default_zoom() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = StubEngine::new();
        let (session, _) = session_with_file(&mut engine, dir.path(), "a.pdf", 1);

        assert_eq!(session.current_document().unwrap().zoom(), DEFAULT_ZOOM);
    }

    #[test]
    fn undoing_every_edit_restores_the_original_raster_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = StubEngine::new();
        let (mut session, id) = session_with_file(&mut engine, dir.path(), "a.pdf", 1);

        session.render_current_page(&engine).unwrap();
        let original = session.preview().unwrap().image.clone();

        for offset in 0..3 {
            session
                .apply_edit(EditRecord::Redaction {
                    rect: DocRect::new(
                        10.0 + offset as f32 * 5.0,
                        10.0,
                        20.0 + offset as f32 * 5.0,
                        20.0,
                    ),
                    color: Color::BLACK,
                })
                .unwrap();
        }
        assert_ne!(session.preview().unwrap().image, original);
        assert_eq!(session.ledger().record_count(id), 3);
        assert!(session.is_dirty());

        for _ in 0..3 {
            assert!(session.undo());
        }
        assert!(!session.undo());

        assert_eq!(session.preview().unwrap().image, original);
        assert!(!session.ledger().has_records(id));
    }

    #[test]
    fn signature_placement_draws_onto_the_preview_and_records() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = StubEngine::new();
        let (mut session, id) = session_with_file(&mut engine, dir.path(), "a.pdf", 1);

        session.render_current_page(&engine).unwrap();
        let before = session.preview().unwrap().image.clone();

        session
            .apply_edit(EditRecord::SignaturePlacement {
                at: DocPoint::new(20.0, 20.0),
                width: 30.0,
                height: 15.0,
                image_bytes: StubEngine::sample_png(),
            })
            .unwrap();

        assert_ne!(session.preview().unwrap().image, before);
        assert_eq!(session.ledger().record_count(id), 1);
        assert_eq!(session.undo_depth(), 1);
    }

    #[test]
    fn failed_edit_is_never_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = StubEngine::new();
        let (mut session, id) = session_with_file(&mut engine, dir.path(), "a.pdf", 1);

        session.render_current_page(&engine).unwrap();
        let before = session.preview().unwrap().image.clone();

        let err = session
            .apply_edit(EditRecord::SignaturePlacement {
                at: DocPoint::new(5.0, 5.0),
                width: 10.0,
                height: 10.0,
                image_bytes: b"not an image".to_vec(),
            })
            .expect_err("malformed signature must fail");
        assert!(matches!(err, SessionError::Engine(_)));

        assert_eq!(session.preview().unwrap().image, before);
        assert!(!session.ledger().has_records(id));
        assert!(!session.is_dirty());
        assert_eq!(session.undo_depth(), 0);
    }

    #[test]
    fn switching_away_from_dirty_document_requires_a_decision() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = StubEngine::new();
        let (mut session, _) = session_with_file(&mut engine, dir.path(), "a.pdf", 1);

        let b = dir.path().join("b.pdf");
        std::fs::write(&b, b"x").unwrap();
        engine.register_file(&b, 1, None);
        session.open_document(&mut engine, &b, None).unwrap();

        session.render_current_page(&engine).unwrap();
        session.apply_edit(redaction()).unwrap();

        assert_eq!(session.begin_switch(1).unwrap(), SwitchGate::DecisionNeeded);
        // The pointer has not moved.
        assert_eq!(session.current_index(), Some(0));

        // Cancel keeps everything in place, edits included.
        assert!(!session.complete_pending(&mut engine, SwitchDecision::Cancel).unwrap());
        assert_eq!(session.current_index(), Some(0));
        assert!(session.is_dirty());
    }

    #[test]
    fn discard_then_switch_drops_edits_and_moves() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = StubEngine::new();
        let (mut session, id) = session_with_file(&mut engine, dir.path(), "a.pdf", 1);

        let b = dir.path().join("b.pdf");
        std::fs::write(&b, b"x").unwrap();
        engine.register_file(&b, 1, None);
        session.open_document(&mut engine, &b, None).unwrap();

        session.render_current_page(&engine).unwrap();
        session.apply_edit(redaction()).unwrap();
        session.begin_switch(1).unwrap();

        assert!(session.complete_pending(&mut engine, SwitchDecision::DiscardThenSwitch).unwrap());
        assert_eq!(session.current_index(), Some(1));
        assert!(!session.ledger().has_records(id));
        assert!(!session.documents()[0].is_dirty());
    }

    #[test]
    fn save_then_switch_persists_before_moving() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = StubEngine::new();
        let (mut session, _) = session_with_file(&mut engine, dir.path(), "a.pdf", 1);
        let source = session.current_document().unwrap().path().to_path_buf();

        let b = dir.path().join("b.pdf");
        std::fs::write(&b, b"x").unwrap();
        engine.register_file(&b, 1, None);
        session.open_document(&mut engine, &b, None).unwrap();

        session.render_current_page(&engine).unwrap();
        session.apply_edit(redaction()).unwrap();
        session.begin_switch(1).unwrap();

        assert!(session.complete_pending(&mut engine, SwitchDecision::SaveThenSwitch).unwrap());
        assert_eq!(session.current_index(), Some(1));

        let saved = std::fs::read_to_string(&source).unwrap();
        assert!(saved.starts_with("STUB"), "overwrite save went through: {saved}");
        assert!(saved.contains("ops=1"));
        assert!(!session.documents()[0].is_dirty());
    }

    #[test]
    fn clean_switch_goes_through_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = StubEngine::new();
        let (mut session, _) = session_with_file(&mut engine, dir.path(), "a.pdf", 1);

        let b = dir.path().join("b.pdf");
        std::fs::write(&b, b"x").unwrap();
        engine.register_file(&b, 1, None);
        session.open_document(&mut engine, &b, None).unwrap();

        assert_eq!(session.begin_switch(1).unwrap(), SwitchGate::Switched);
        assert_eq!(session.current_index(), Some(1));
    }

    #[test]
    fn switching_remembers_zoom_per_document() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = StubEngine::new();
        let (mut session, _) = session_with_file(&mut engine, dir.path(), "a.pdf", 1);
        let a_path = session.current_document().unwrap().path().to_path_buf();

        let b = dir.path().join("b.pdf");
        std::fs::write(&b, b"x").unwrap();
        engine.register_file(&b, 1, None);
        session.open_document(&mut engine, &b, None).unwrap();

        session.zoom_in().unwrap();
        let zoomed = session.current_document().unwrap().zoom();
        assert!((zoomed - DEFAULT_ZOOM * 1.25).abs() < 1e-6);

        session.begin_switch(1).unwrap();
        assert_eq!(session.zoom_memory().zoom_for(&a_path), zoomed);
    }

    #[test]
    fn removing_the_current_document_advances_the_pointer() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = StubEngine::new();
        let (mut session, _) = session_with_file(&mut engine, dir.path(), "a.pdf", 1);

        let b = dir.path().join("b.pdf");
        std::fs::write(&b, b"x").unwrap();
        engine.register_file(&b, 1, None);
        session.open_document(&mut engine, &b, None).unwrap();

        assert_eq!(session.begin_remove(&mut engine, 0).unwrap(), SwitchGate::Switched);
        assert_eq!(session.documents().len(), 1);
        assert_eq!(session.current_index(), Some(0));
        assert!(session.current_document().unwrap().path().ends_with("b.pdf"));

        assert_eq!(session.begin_remove(&mut engine, 0).unwrap(), SwitchGate::Switched);
        assert!(session.current_document().is_none());
    }

    #[test]
    fn tool_activation_is_exclusive() {
        let mut session = SessionState::new();

        assert_eq!(session.activate_tool(ActiveTool::Redact), ActiveTool::Redact);
        assert_eq!(session.activate_tool(ActiveTool::Highlight), ActiveTool::Highlight);
        assert_eq!(session.activate_tool(ActiveTool::Highlight), ActiveTool::Idle);
    }

    #[test]
    fn save_as_keeps_in_memory_edits() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = StubEngine::new();
        let (mut session, id) = session_with_file(&mut engine, dir.path(), "a.pdf", 1);

        session.render_current_page(&engine).unwrap();
        session.apply_edit(redaction()).unwrap();

        let copy = dir.path().join("copy.pdf");
        session.save_current_as(&mut engine, &copy).unwrap();

        assert!(copy.exists());
        // Saving a copy leaves the working state dirty and the ledger intact.
        assert!(session.is_dirty());
        assert!(session.ledger().has_records(id));
    }

    #[test]
    fn overwrite_save_clears_ledger_and_dirty_flag() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = StubEngine::new();
        let (mut session, id) = session_with_file(&mut engine, dir.path(), "a.pdf", 1);

        session.render_current_page(&engine).unwrap();
        session.apply_edit(redaction()).unwrap();

        session.save_current_overwrite(&mut engine).unwrap();

        assert!(!session.is_dirty());
        assert!(!session.ledger().has_records(id));
    }

    #[test]
    fn encrypted_open_without_credential_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locked.pdf");
        std::fs::write(&path, b"x").unwrap();

        let mut engine = StubEngine::new();
        engine.register_file(&path, 1, Some("hunter2"));

        let mut session = SessionState::new();
        assert!(session.open_document(&mut engine, &path, None).is_err());
        assert!(session.open_document(&mut engine, &path, Some("wrong")).is_err());
        assert!(session.documents().is_empty());

        let id = session.open_document(&mut engine, &path, Some("hunter2")).unwrap();
        assert!(session.current_document().unwrap().is_encrypted());
        assert_eq!(session.current_document().unwrap().id(), id);
    }

    #[test]
    fn encrypted_overwrite_strips_encryption_and_cleans_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locked.pdf");
        std::fs::write(&path, b"x").unwrap();

        let mut engine = StubEngine::new();
        engine.register_file(&path, 2, Some("hunter2"));

        let mut session = SessionState::new();
        session.open_document(&mut engine, &path, Some("hunter2")).unwrap();
        session.render_current_page(&engine).unwrap();
        session.apply_edit(redaction()).unwrap();

        let saved = session
            .save_current_encrypted(
                &mut engine,
                "hunter2",
                EncryptedSaveDestination::OverwriteStrippingEncryption,
            )
            .unwrap();

        assert_eq!(saved, path);
        assert!(!session.current_document().unwrap().is_encrypted());
        assert!(!session.is_dirty());
    }
}
