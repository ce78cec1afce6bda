//! The modification ledger: the durable record of every edit.
//!
//! Edits are stored in document space so a ledger can be replayed onto a
//! page rendered at any scale. The ledger holds abstract values (colors,
//! font sizes, encoded image payloads), never pre-rendered pixels.

use crate::document::DocumentId;
use doc_engine::{Color, DocPoint, DocRect, DrawOp};
use std::collections::HashMap;

/// A single recorded edit, in document space.
///
/// Signature payloads are embedded by value so replay never depends on
/// external mutable state.
#[derive(Debug, Clone, PartialEq)]
pub enum EditRecord {
    Redaction { rect: DocRect, color: Color },
    TextAnnotation { at: DocPoint, text: String, color: Color, font_size: f32 },
    Highlight { rect: DocRect, color: Color, opacity: f32 },
    SignaturePlacement { at: DocPoint, width: f32, height: f32, image_bytes: Vec<u8> },
}

impl EditRecord {
    /// The drawing operation this record replays as.
    pub fn to_draw_op(&self) -> DrawOp {
        match self {
            EditRecord::Redaction { rect, color } => {
                DrawOp::FillRect { rect: *rect, color: *color }
            }
            EditRecord::TextAnnotation { at, text, color, font_size } => {
                DrawOp::Text { at: *at, text: text.clone(), size: *font_size, color: *color }
            }
            EditRecord::Highlight { rect, color, opacity } => {
                DrawOp::Highlight { rect: *rect, color: *color, opacity: *opacity }
            }
            EditRecord::SignaturePlacement { at, width, height, image_bytes } => DrawOp::Image {
                rect: DocRect::new(at.x, at.y, at.x + width, at.y + height),
                bytes: image_bytes.clone(),
            },
        }
    }
}

#[derive(Debug, Clone)]
struct LedgerEntry {
    page: u32,
    record: EditRecord,
}

/// Per-document, per-page ordered record of edits.
///
/// Entries are keyed by the (document id, page index) pair and kept in
/// insertion order: replay order is application order, later records draw
/// over earlier ones. Append-only during editing; only `pop_last` removes
/// an entry, and it removes the most recently appended record across the
/// whole document.
#[derive(Debug, Default)]
pub struct ModificationLedger {
    entries: HashMap<DocumentId, Vec<LedgerEntry>>,
}

impl ModificationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an edit. Never fails.
    pub fn record(&mut self, document: DocumentId, page: u32, record: EditRecord) {
        self.entries.entry(document).or_default().push(LedgerEntry { page, record });
    }

    /// Ordered records for one page, for replay. Empty if none exist.
    pub fn records_for(&self, document: DocumentId, page: u32) -> Vec<&EditRecord> {
        self.entries
            .get(&document)
            .map(|entries| {
                entries.iter().filter(|e| e.page == page).map(|e| &e.record).collect()
            })
            .unwrap_or_default()
    }

    /// Remove the most recently appended record across all pages of the
    /// document. Returns whether a record existed.
    pub fn pop_last(&mut self, document: DocumentId) -> bool {
        match self.entries.get_mut(&document) {
            Some(entries) => entries.pop().is_some(),
            None => false,
        }
    }

    /// Drop every record for a document (fresh load, or a save that
    /// reconstructed the document losslessly).
    pub fn clear(&mut self, document: DocumentId) {
        self.entries.remove(&document);
    }

    pub fn has_records(&self, document: DocumentId) -> bool {
        self.entries.get(&document).is_some_and(|entries| !entries.is_empty())
    }

    pub fn record_count(&self, document: DocumentId) -> usize {
        self.entries.get(&document).map(Vec::len).unwrap_or(0)
    }

    /// Sorted, deduplicated page indices that carry at least one record.
    pub fn pages_with_records(&self, document: DocumentId) -> Vec<u32> {
        let mut pages: Vec<u32> = self
            .entries
            .get(&document)
            .map(|entries| entries.iter().map(|e| e.page).collect())
            .unwrap_or_default();
        pages.sort_unstable();
        pages.dedup();
        pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn redaction(x: f32) -> EditRecord {
        EditRecord::Redaction { rect: DocRect::new(x, 0.0, x + 10.0, 10.0), color: Color::BLACK }
    }

    #[test]
    fn records_replay_in_insertion_order() {
        let mut ledger = ModificationLedger::new();
        let doc = DocumentId(1);

        ledger.record(doc, 0, redaction(0.0));
        ledger.record(doc, 0, redaction(5.0));
        ledger.record(doc, 0, redaction(2.0));

        let xs: Vec<f32> = ledger
            .records_for(doc, 0)
            .iter()
            .map(|r| match r {
                EditRecord::Redaction { rect, .. } => rect.x1,
                _ => unreachable!(),
            })
            .collect();

        assert_eq!(xs, vec![0.0, 5.0, 2.0]);
    }

    #[test]
    fn pop_last_removes_most_recent_across_pages() {
        let mut ledger = ModificationLedger::new();
        let doc = DocumentId(1);

        ledger.record(doc, 0, redaction(0.0));
        ledger.record(doc, 3, redaction(1.0));

        assert!(ledger.pop_last(doc));
        // The page-3 record was appended last, so it goes first.
        assert_eq!(ledger.records_for(doc, 3).len(), 0);
        assert_eq!(ledger.records_for(doc, 0).len(), 1);

        assert!(ledger.pop_last(doc));
        assert!(!ledger.pop_last(doc));
    }

    #[test]
    fn documents_do_not_share_entries() {
        let mut ledger = ModificationLedger::new();
        ledger.record(DocumentId(1), 0, redaction(0.0));
        ledger.record(DocumentId(2), 0, redaction(1.0));

        ledger.clear(DocumentId(1));

        assert!(!ledger.has_records(DocumentId(1)));
        assert_eq!(ledger.record_count(DocumentId(2)), 1);
    }

    #[test]
    fn pages_with_records_are_sorted_and_deduplicated() {
        let mut ledger = ModificationLedger::new();
        let doc = DocumentId(1);

        ledger.record(doc, 4, redaction(0.0));
        ledger.record(doc, 1, redaction(1.0));
        ledger.record(doc, 4, redaction(2.0));

        assert_eq!(ledger.pages_with_records(doc), vec![1, 4]);
        assert!(ledger.pages_with_records(DocumentId(9)).is_empty());
    }

    #[test]
    fn signature_record_expands_to_image_rect() {
        let record = EditRecord::SignaturePlacement {
            at: DocPoint::new(10.0, 20.0),
            width: 30.0,
            height: 15.0,
            image_bytes: vec![1, 2, 3],
        };

        match record.to_draw_op() {
            DrawOp::Image { rect, bytes } => {
                assert_eq!(rect.x2, 40.0);
                assert_eq!(rect.y2, 35.0);
                assert_eq!(bytes, vec![1, 2, 3]);
            }
            other => panic!("unexpected op: {other:?}"),
        }
    }
}
