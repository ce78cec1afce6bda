//! Document backend abstraction for the redaction engine.
//!
//! The `DocEngine` trait is the seam between the deferred-modification core
//! and whatever library actually opens, renders and writes documents. The
//! bundled `SoftwareEngine` handles raster images completely (decode, draw,
//! encode) and paginated PDF documents structurally: page geometry is parsed
//! with lopdf, recorded draw operations are burned into content streams on
//! save, and previews render as placeholder pages. Backends with real page
//! rasterization plug in behind the same trait.

use image::{ImageBuffer, Rgba};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

pub mod pdf;
pub mod raster;

pub type RgbaImage = ImageBuffer<Rgba<u8>, Vec<u8>>;

/// Opaque handle to a document owned by an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentHandle(u64);

impl DocumentHandle {
    /// Engine implementors mint handles from their own counters.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    RasterImage,
    Paginated,
}

/// Page dimensions in native page units (points for PDF, pixels for images).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width_pt: f32,
    pub height_pt: f32,
}

/// Point in document space. Origin top-left, y grows downward.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DocPoint {
    pub x: f32,
    pub y: f32,
}

impl DocPoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned rectangle in document space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DocRect {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl DocRect {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Corner-order independent copy with `x1 <= x2` and `y1 <= y2`.
    pub fn normalized(self) -> Self {
        Self {
            x1: self.x1.min(self.x2),
            y1: self.y1.min(self.y2),
            x2: self.x1.max(self.x2),
            y2: self.y1.max(self.y2),
        }
    }

    pub fn width(self) -> f32 {
        (self.x2 - self.x1).abs()
    }

    pub fn height(self) -> f32 {
        (self.y2 - self.y1).abs()
    }
}

/// RGBA color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const BLACK: Color = Color { r: 0, g: 0, b: 0, a: 255 };
    pub const WHITE: Color = Color { r: 255, g: 255, b: 255, a: 255 };
    pub const YELLOW: Color = Color { r: 255, g: 255, b: 0, a: 255 };

    pub fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// Normalized RGB components (0.0 to 1.0), as used by PDF color operators.
    pub fn to_normalized(self) -> (f32, f32, f32) {
        (self.r as f32 / 255.0, self.g as f32 / 255.0, self.b as f32 / 255.0)
    }
}

/// A drawing operation in document space, pending application to a page.
#[derive(Debug, Clone, PartialEq)]
pub enum DrawOp {
    FillRect { rect: DocRect, color: Color },
    Text { at: DocPoint, text: String, size: f32, color: Color },
    Highlight { rect: DocRect, color: Color, opacity: f32 },
    Image { rect: DocRect, bytes: Vec<u8> },
}

/// Outcome of opening a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    Ready(DocumentHandle),
    /// The document is encrypted; authenticate before any other operation.
    PasswordRequired(DocumentHandle),
}

impl OpenOutcome {
    pub fn handle(self) -> DocumentHandle {
        match self {
            OpenOutcome::Ready(handle) | OpenOutcome::PasswordRequired(handle) => handle,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF parse error: {0}")]
    Pdf(#[from] lopdf::Error),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("invalid handle {0}")]
    InvalidHandle(u64),
    #[error("page {page} out of range (page_count={page_count})")]
    PageOutOfRange { page: u32, page_count: u32 },
    #[error("document requires authentication")]
    AuthenticationRequired,
    #[error("encrypted documents are not supported by the software backend")]
    EncryptedUnsupported,
    #[error("unsupported file type: {0}")]
    UnsupportedFormat(String),
    #[error("backend error: {0}")]
    Backend(String),
}

/// The document-library collaborator.
///
/// Draw operations take document-space geometry and are deferred: nothing is
/// written until `save`. `copy_page_content` is a structural copy that may
/// legitimately fail (malformed or unsupported page graphs) and reports that
/// with `Ok(false)` so callers can fall back to rasterized reconstruction.
pub trait DocEngine {
    fn open(&mut self, path: &Path) -> Result<OpenOutcome, EngineError>;
    fn authenticate(&mut self, handle: DocumentHandle, credential: &str)
        -> Result<bool, EngineError>;
    fn kind(&self, handle: DocumentHandle) -> Result<DocumentKind, EngineError>;
    fn page_count(&self, handle: DocumentHandle) -> Result<u32, EngineError>;
    fn page_size(&self, handle: DocumentHandle, page: u32) -> Result<PageSize, EngineError>;
    fn render_page(
        &self,
        handle: DocumentHandle,
        page: u32,
        oversample: f32,
    ) -> Result<RgbaImage, EngineError>;

    fn new_document(&mut self) -> DocumentHandle;
    fn add_page(
        &mut self,
        handle: DocumentHandle,
        width_pt: f32,
        height_pt: f32,
    ) -> Result<u32, EngineError>;

    fn draw_filled_rect(
        &mut self,
        handle: DocumentHandle,
        page: u32,
        rect: DocRect,
        color: Color,
    ) -> Result<(), EngineError>;
    fn draw_text(
        &mut self,
        handle: DocumentHandle,
        page: u32,
        at: DocPoint,
        text: &str,
        size: f32,
        color: Color,
    ) -> Result<(), EngineError>;
    fn draw_highlight(
        &mut self,
        handle: DocumentHandle,
        page: u32,
        rect: DocRect,
        color: Color,
        opacity: f32,
    ) -> Result<(), EngineError>;
    fn draw_image(
        &mut self,
        handle: DocumentHandle,
        page: u32,
        rect: DocRect,
        bytes: &[u8],
    ) -> Result<(), EngineError>;

    fn copy_page_content(
        &mut self,
        dest: DocumentHandle,
        dest_page: u32,
        source: DocumentHandle,
        source_page: u32,
    ) -> Result<bool, EngineError>;

    fn save(
        &self,
        handle: DocumentHandle,
        path: &Path,
        strip_encryption: bool,
    ) -> Result<(), EngineError>;
    fn close(&mut self, handle: DocumentHandle) -> Result<(), EngineError>;
}

/// Where a paginated page's base content comes from.
#[derive(Debug, Clone)]
pub(crate) enum PageBase {
    /// Page belongs to the opened source bytes.
    Source,
    /// Empty page created through `add_page`.
    Blank,
    /// Structural copy of a page from another document's bytes.
    CopiedFrom { bytes: Arc<Vec<u8>>, page_index: u32 },
}

#[derive(Debug, Clone)]
pub(crate) struct PageState {
    pub(crate) size: PageSize,
    pub(crate) base: PageBase,
    pub(crate) ops: Vec<DrawOp>,
}

#[derive(Debug, Clone)]
pub(crate) struct PagedDoc {
    /// Original file bytes for documents opened from disk; `None` for
    /// documents built through `new_document`.
    pub(crate) source: Option<Arc<Vec<u8>>>,
    pub(crate) pages: Vec<PageState>,
    pub(crate) encrypted: bool,
}

#[derive(Debug, Clone)]
enum DocRecord {
    Raster { image: RgbaImage, format: image::ImageFormat, ops: Vec<DrawOp> },
    Paged(PagedDoc),
}

/// Software backend: full raster-image support, structural PDF support.
#[derive(Debug, Default)]
pub struct SoftwareEngine {
    next_handle: u64,
    docs: HashMap<DocumentHandle, DocRecord>,
}

impl SoftwareEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, record: DocRecord) -> DocumentHandle {
        self.next_handle += 1;
        let handle = DocumentHandle(self.next_handle);
        self.docs.insert(handle, record);
        handle
    }

    fn record(&self, handle: DocumentHandle) -> Result<&DocRecord, EngineError> {
        self.docs.get(&handle).ok_or(EngineError::InvalidHandle(handle.raw()))
    }

    fn record_mut(&mut self, handle: DocumentHandle) -> Result<&mut DocRecord, EngineError> {
        self.docs.get_mut(&handle).ok_or(EngineError::InvalidHandle(handle.raw()))
    }

    fn push_op(
        &mut self,
        handle: DocumentHandle,
        page: u32,
        op: DrawOp,
    ) -> Result<(), EngineError> {
        match self.record_mut(handle)? {
            DocRecord::Raster { ops, .. } => {
                if page != 0 {
                    return Err(EngineError::PageOutOfRange { page, page_count: 1 });
                }
                ops.push(op);
                Ok(())
            }
            DocRecord::Paged(doc) => {
                if doc.encrypted {
                    return Err(EngineError::AuthenticationRequired);
                }
                let page_count = doc.pages.len() as u32;
                let state = doc
                    .pages
                    .get_mut(page as usize)
                    .ok_or(EngineError::PageOutOfRange { page, page_count })?;
                state.ops.push(op);
                Ok(())
            }
        }
    }
}

fn kind_for_path(path: &Path) -> Result<DocumentKind, EngineError> {
    let ext = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "pdf" => Ok(DocumentKind::Paginated),
        "png" | "jpg" | "jpeg" => Ok(DocumentKind::RasterImage),
        _ => Err(EngineError::UnsupportedFormat(path.display().to_string())),
    }
}

fn is_encrypted(bytes: &[u8]) -> bool {
    bytes.windows(b"/Encrypt".len()).any(|window| window == b"/Encrypt")
}

impl DocEngine for SoftwareEngine {
    fn open(&mut self, path: &Path) -> Result<OpenOutcome, EngineError> {
        match kind_for_path(path)? {
            DocumentKind::RasterImage => {
                let format = image::ImageFormat::from_path(path)?;
                let image = image::open(path)?.to_rgba8();
                Ok(OpenOutcome::Ready(self.insert(DocRecord::Raster {
                    image,
                    format,
                    ops: Vec::new(),
                })))
            }
            DocumentKind::Paginated => {
                let bytes = fs::read(path)?;

                if is_encrypted(&bytes) {
                    let handle = self.insert(DocRecord::Paged(PagedDoc {
                        source: Some(Arc::new(bytes)),
                        pages: Vec::new(),
                        encrypted: true,
                    }));
                    return Ok(OpenOutcome::PasswordRequired(handle));
                }

                let sizes = pdf::parse_page_sizes(&bytes)?;
                let pages = sizes
                    .into_iter()
                    .map(|size| PageState { size, base: PageBase::Source, ops: Vec::new() })
                    .collect();

                Ok(OpenOutcome::Ready(self.insert(DocRecord::Paged(PagedDoc {
                    source: Some(Arc::new(bytes)),
                    pages,
                    encrypted: false,
                }))))
            }
        }
    }

    fn authenticate(
        &mut self,
        handle: DocumentHandle,
        _credential: &str,
    ) -> Result<bool, EngineError> {
        match self.record(handle)? {
            DocRecord::Raster { .. } => Ok(true),
            DocRecord::Paged(doc) if !doc.encrypted => Ok(true),
            DocRecord::Paged(_) => {
                log::warn!("software backend cannot verify credentials for encrypted documents");
                Err(EngineError::EncryptedUnsupported)
            }
        }
    }

    fn kind(&self, handle: DocumentHandle) -> Result<DocumentKind, EngineError> {
        match self.record(handle)? {
            DocRecord::Raster { .. } => Ok(DocumentKind::RasterImage),
            DocRecord::Paged(_) => Ok(DocumentKind::Paginated),
        }
    }

    fn page_count(&self, handle: DocumentHandle) -> Result<u32, EngineError> {
        match self.record(handle)? {
            DocRecord::Raster { .. } => Ok(1),
            DocRecord::Paged(doc) if doc.encrypted => Err(EngineError::AuthenticationRequired),
            DocRecord::Paged(doc) => Ok(doc.pages.len() as u32),
        }
    }

    fn page_size(&self, handle: DocumentHandle, page: u32) -> Result<PageSize, EngineError> {
        match self.record(handle)? {
            DocRecord::Raster { image, .. } => {
                if page != 0 {
                    return Err(EngineError::PageOutOfRange { page, page_count: 1 });
                }
                Ok(PageSize { width_pt: image.width() as f32, height_pt: image.height() as f32 })
            }
            DocRecord::Paged(doc) if doc.encrypted => Err(EngineError::AuthenticationRequired),
            DocRecord::Paged(doc) => doc
                .pages
                .get(page as usize)
                .map(|state| state.size)
                .ok_or(EngineError::PageOutOfRange { page, page_count: doc.pages.len() as u32 }),
        }
    }

    fn render_page(
        &self,
        handle: DocumentHandle,
        page: u32,
        oversample: f32,
    ) -> Result<RgbaImage, EngineError> {
        match self.record(handle)? {
            DocRecord::Raster { image, ops, .. } => {
                if page != 0 {
                    return Err(EngineError::PageOutOfRange { page, page_count: 1 });
                }
                // Raster documents render at native resolution; their raster
                // space is their document space.
                let mut out = image.clone();
                for op in ops {
                    raster::apply_op(&mut out, op, 1.0)?;
                }
                Ok(out)
            }
            DocRecord::Paged(doc) if doc.encrypted => Err(EngineError::AuthenticationRequired),
            DocRecord::Paged(doc) => {
                let page_count = doc.pages.len() as u32;
                let state = doc
                    .pages
                    .get(page as usize)
                    .ok_or(EngineError::PageOutOfRange { page, page_count })?;

                let scale = if oversample <= 0.0 { 1.0 } else { oversample };
                let mut out =
                    raster::blank_page(state.size.width_pt, state.size.height_pt, scale);
                for op in &state.ops {
                    raster::apply_op(&mut out, op, scale)?;
                }
                Ok(out)
            }
        }
    }

    fn new_document(&mut self) -> DocumentHandle {
        self.insert(DocRecord::Paged(PagedDoc {
            source: None,
            pages: Vec::new(),
            encrypted: false,
        }))
    }

    fn add_page(
        &mut self,
        handle: DocumentHandle,
        width_pt: f32,
        height_pt: f32,
    ) -> Result<u32, EngineError> {
        match self.record_mut(handle)? {
            DocRecord::Raster { .. } => {
                Err(EngineError::Backend("raster documents have exactly one page".to_owned()))
            }
            DocRecord::Paged(doc) => {
                doc.pages.push(PageState {
                    size: PageSize { width_pt, height_pt },
                    base: PageBase::Blank,
                    ops: Vec::new(),
                });
                Ok(doc.pages.len() as u32 - 1)
            }
        }
    }

    fn draw_filled_rect(
        &mut self,
        handle: DocumentHandle,
        page: u32,
        rect: DocRect,
        color: Color,
    ) -> Result<(), EngineError> {
        self.push_op(handle, page, DrawOp::FillRect { rect: rect.normalized(), color })
    }

    fn draw_text(
        &mut self,
        handle: DocumentHandle,
        page: u32,
        at: DocPoint,
        text: &str,
        size: f32,
        color: Color,
    ) -> Result<(), EngineError> {
        self.push_op(handle, page, DrawOp::Text { at, text: text.to_owned(), size, color })
    }

    fn draw_highlight(
        &mut self,
        handle: DocumentHandle,
        page: u32,
        rect: DocRect,
        color: Color,
        opacity: f32,
    ) -> Result<(), EngineError> {
        self.push_op(
            handle,
            page,
            DrawOp::Highlight { rect: rect.normalized(), color, opacity: opacity.clamp(0.0, 1.0) },
        )
    }

    fn draw_image(
        &mut self,
        handle: DocumentHandle,
        page: u32,
        rect: DocRect,
        bytes: &[u8],
    ) -> Result<(), EngineError> {
        // Reject undecodable payloads up front so a bad signature image is
        // reported at placement time, not at save time.
        image::load_from_memory(bytes)?;
        self.push_op(
            handle,
            page,
            DrawOp::Image { rect: rect.normalized(), bytes: bytes.to_vec() },
        )
    }

    fn copy_page_content(
        &mut self,
        dest: DocumentHandle,
        dest_page: u32,
        source: DocumentHandle,
        source_page: u32,
    ) -> Result<bool, EngineError> {
        let source_bytes = match self.record(source)? {
            // Content streams of encrypted sources are unreadable here, and
            // raster or handle-only documents have no page graph to copy.
            DocRecord::Raster { .. } => None,
            DocRecord::Paged(doc) if doc.encrypted => None,
            DocRecord::Paged(doc) => doc
                .source
                .as_ref()
                .filter(|bytes| pdf::page_is_copyable(bytes, source_page))
                .map(Arc::clone),
        };

        let Some(bytes) = source_bytes else {
            log::warn!("structural page copy unavailable (page {source_page})");
            return Ok(false);
        };

        match self.record_mut(dest)? {
            DocRecord::Raster { .. } => Ok(false),
            DocRecord::Paged(doc) => {
                let page_count = doc.pages.len() as u32;
                let state = doc
                    .pages
                    .get_mut(dest_page as usize)
                    .ok_or(EngineError::PageOutOfRange { page: dest_page, page_count })?;
                state.base = PageBase::CopiedFrom { bytes, page_index: source_page };
                Ok(true)
            }
        }
    }

    fn save(
        &self,
        handle: DocumentHandle,
        path: &Path,
        strip_encryption: bool,
    ) -> Result<(), EngineError> {
        match self.record(handle)? {
            DocRecord::Raster { image, format, ops } => {
                let mut out = image.clone();
                for op in ops {
                    raster::apply_op(&mut out, op, 1.0)?;
                }
                raster::encode_to_path(&out, *format, path)
            }
            DocRecord::Paged(doc) => {
                if doc.encrypted {
                    return Err(EngineError::AuthenticationRequired);
                }
                if strip_encryption {
                    log::debug!("saving without encryption to {}", path.display());
                }
                pdf::write_paged(doc, path)
            }
        }
    }

    fn close(&mut self, handle: DocumentHandle) -> Result<(), EngineError> {
        self.docs
            .remove(&handle)
            .map(|_| ())
            .ok_or(EngineError::InvalidHandle(handle.raw()))
    }
}

pub fn default_engine() -> SoftwareEngine {
    SoftwareEngine::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_sample_png(path: &Path) {
        let image = RgbaImage::from_pixel(64, 48, Rgba([200, 200, 200, 255]));
        image.save(path).expect("sample image should encode");
    }

    #[test]
    fn opens_raster_image_as_single_page() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("scan.png");
        write_sample_png(&path);

        let mut engine = SoftwareEngine::new();
        let outcome = engine.open(&path).expect("open should succeed");
        let handle = outcome.handle();

        assert!(matches!(outcome, OpenOutcome::Ready(_)));
        assert_eq!(engine.kind(handle).unwrap(), DocumentKind::RasterImage);
        assert_eq!(engine.page_count(handle).unwrap(), 1);

        let size = engine.page_size(handle, 0).unwrap();
        assert_eq!(size.width_pt, 64.0);
        assert_eq!(size.height_pt, 48.0);
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let mut engine = SoftwareEngine::new();
        let err = engine.open(Path::new("/tmp/notes.txt")).expect_err("should reject");
        assert!(matches!(err, EngineError::UnsupportedFormat(_)));
    }

    #[test]
    fn raster_draw_changes_rendered_pixels() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("scan.png");
        write_sample_png(&path);

        let mut engine = SoftwareEngine::new();
        let handle = engine.open(&path).unwrap().handle();
        engine
            .draw_filled_rect(handle, 0, DocRect::new(10.0, 10.0, 20.0, 20.0), Color::BLACK)
            .unwrap();

        let rendered = engine.render_page(handle, 0, 1.0).unwrap();
        assert_eq!(*rendered.get_pixel(15, 15), Rgba([0, 0, 0, 255]));
        assert_eq!(*rendered.get_pixel(40, 40), Rgba([200, 200, 200, 255]));
    }

    #[test]
    fn raster_save_round_trips_edits() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("scan.png");
        let out = dir.path().join("scan-redacted.png");
        write_sample_png(&path);

        let mut engine = SoftwareEngine::new();
        let handle = engine.open(&path).unwrap().handle();
        engine
            .draw_filled_rect(handle, 0, DocRect::new(0.0, 0.0, 8.0, 8.0), Color::BLACK)
            .unwrap();
        engine.save(handle, &out, false).unwrap();

        let reloaded = image::open(&out).unwrap().to_rgba8();
        assert_eq!(*reloaded.get_pixel(4, 4), Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn new_document_grows_by_added_pages() {
        let mut engine = SoftwareEngine::new();
        let handle = engine.new_document();

        assert_eq!(engine.page_count(handle).unwrap(), 0);
        assert_eq!(engine.add_page(handle, 612.0, 792.0).unwrap(), 0);
        assert_eq!(engine.add_page(handle, 612.0, 792.0).unwrap(), 1);
        assert_eq!(engine.page_count(handle).unwrap(), 2);
    }

    #[test]
    fn paged_render_applies_ops_at_oversample() {
        let mut engine = SoftwareEngine::new();
        let handle = engine.new_document();
        engine.add_page(handle, 100.0, 100.0).unwrap();
        engine
            .draw_filled_rect(handle, 0, DocRect::new(10.0, 10.0, 20.0, 20.0), Color::BLACK)
            .unwrap();

        let rendered = engine.render_page(handle, 0, 2.0).unwrap();
        assert_eq!(rendered.width(), 200);
        // Document-space (15, 15) lands at raster (30, 30) under 2x oversampling.
        assert_eq!(*rendered.get_pixel(30, 30), Rgba([0, 0, 0, 255]));
        assert_eq!(*rendered.get_pixel(90, 90), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn malformed_image_payload_is_rejected_at_draw_time() {
        let mut engine = SoftwareEngine::new();
        let handle = engine.new_document();
        engine.add_page(handle, 100.0, 100.0).unwrap();

        let err = engine
            .draw_image(handle, 0, DocRect::new(0.0, 0.0, 10.0, 10.0), b"not an image")
            .expect_err("garbage bytes should be rejected");
        assert!(matches!(err, EngineError::Image(_)));
    }

    #[test]
    fn invalid_handle_returns_error() {
        let engine = SoftwareEngine::new();
        let err = engine.page_count(DocumentHandle(999)).expect_err("unknown handle");
        assert!(matches!(err, EngineError::InvalidHandle(999)));
    }

    #[test]
    fn close_releases_handle() {
        let mut engine = SoftwareEngine::new();
        let handle = engine.new_document();
        engine.close(handle).unwrap();
        assert!(engine.page_count(handle).is_err());
    }
}
