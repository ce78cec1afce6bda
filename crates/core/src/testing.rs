//! Scriptable in-memory engine for exercising the save pipeline and the
//! session state machine, including paths the software backend cannot
//! reach (verified credentials, deterministic write failures).

use doc_engine::{
    raster, Color, DocEngine, DocPoint, DocRect, DocumentHandle, DocumentKind, DrawOp,
    EngineError, OpenOutcome, PageSize, RgbaImage,
};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub(crate) struct StubFile {
    pub pages: u32,
    pub password: Option<String>,
}

#[derive(Debug, Clone)]
struct StubPage {
    size: PageSize,
    ops: Vec<DrawOp>,
    copied: bool,
}

#[derive(Debug)]
struct StubDoc {
    kind: DocumentKind,
    pages: Vec<StubPage>,
    password: Option<String>,
    authenticated: bool,
}

impl StubDoc {
    fn locked(&self) -> bool {
        self.password.is_some() && !self.authenticated
    }
}

/// In-memory `DocEngine` with scriptable failure points.
#[derive(Debug, Default)]
pub(crate) struct StubEngine {
    next: u64,
    files: RefCell<HashMap<PathBuf, StubFile>>,
    docs: HashMap<DocumentHandle, StubDoc>,
    pub fail_save: bool,
    pub fail_copy: bool,
}

const STUB_PAGE: PageSize = PageSize { width_pt: 100.0, height_pt: 100.0 };

impl StubEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Teach the engine about a path. The file itself must be created by
    /// the test when its on-disk bytes matter.
    pub fn register_file(&mut self, path: &Path, pages: u32, password: Option<&str>) {
        self.files.borrow_mut().insert(
            path.to_path_buf(),
            StubFile { pages, password: password.map(str::to_owned) },
        );
    }

    /// A valid encoded image payload for signature tests.
    pub fn sample_png() -> Vec<u8> {
        let stamp = RgbaImage::from_pixel(4, 4, image::Rgba([0, 0, 255, 255]));
        let mut bytes = Vec::new();
        stamp
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .expect("png encode");
        bytes
    }

    fn doc(&self, handle: DocumentHandle) -> Result<&StubDoc, EngineError> {
        self.docs.get(&handle).ok_or(EngineError::InvalidHandle(handle.raw()))
    }

    fn doc_mut(&mut self, handle: DocumentHandle) -> Result<&mut StubDoc, EngineError> {
        self.docs.get_mut(&handle).ok_or(EngineError::InvalidHandle(handle.raw()))
    }

    fn insert(&mut self, doc: StubDoc) -> DocumentHandle {
        self.next += 1;
        let handle = DocumentHandle::from_raw(self.next);
        self.docs.insert(handle, doc);
        handle
    }

    fn push_op(
        &mut self,
        handle: DocumentHandle,
        page: u32,
        op: DrawOp,
    ) -> Result<(), EngineError> {
        let doc = self.doc_mut(handle)?;
        if doc.locked() {
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

impl DocEngine for StubEngine {
    fn open(&mut self, path: &Path) -> Result<OpenOutcome, EngineError> {
        let registered = self.files.borrow().get(path).cloned();
        let spec = match registered {
            Some(spec) => spec,
            // Files this engine wrote describe themselves; anything else is
            // unknown to the stub.
            None => {
                let contents = fs::read_to_string(path).map_err(|_| {
                    EngineError::Backend(format!("unregistered path {}", path.display()))
                })?;
                let pages = contents
                    .lines()
                    .find_map(|line| line.strip_prefix("pages=")?.parse().ok())
                    .filter(|_| contents.starts_with("STUB"))
                    .ok_or_else(|| {
                        EngineError::Backend(format!("unregistered path {}", path.display()))
                    })?;
                StubFile { pages, password: None }
            }
        };

        let pages = (0..spec.pages)
            .map(|_| StubPage { size: STUB_PAGE, ops: Vec::new(), copied: false })
            .collect();
        let doc = StubDoc {
            kind: DocumentKind::Paginated,
            pages,
            password: spec.password.clone(),
            authenticated: false,
        };
        let locked = doc.password.is_some();
        let handle = self.insert(doc);

        if locked {
            Ok(OpenOutcome::PasswordRequired(handle))
        } else {
            Ok(OpenOutcome::Ready(handle))
        }
    }

    fn authenticate(
        &mut self,
        handle: DocumentHandle,
        credential: &str,
    ) -> Result<bool, EngineError> {
        let doc = self.doc_mut(handle)?;
        let ok = doc.password.as_deref() == Some(credential) || doc.password.is_none();
        if ok {
            doc.authenticated = true;
        }
        Ok(ok)
    }

    fn kind(&self, handle: DocumentHandle) -> Result<DocumentKind, EngineError> {
        Ok(self.doc(handle)?.kind)
    }

    fn page_count(&self, handle: DocumentHandle) -> Result<u32, EngineError> {
        let doc = self.doc(handle)?;
        if doc.locked() {
            return Err(EngineError::AuthenticationRequired);
        }
        Ok(doc.pages.len() as u32)
    }

    fn page_size(&self, handle: DocumentHandle, page: u32) -> Result<PageSize, EngineError> {
        let doc = self.doc(handle)?;
        if doc.locked() {
            return Err(EngineError::AuthenticationRequired);
        }
        doc.pages
            .get(page as usize)
            .map(|state| state.size)
            .ok_or(EngineError::PageOutOfRange { page, page_count: doc.pages.len() as u32 })
    }

    fn render_page(
        &self,
        handle: DocumentHandle,
        page: u32,
        oversample: f32,
    ) -> Result<RgbaImage, EngineError> {
        let doc = self.doc(handle)?;
        if doc.locked() {
            return Err(EngineError::AuthenticationRequired);
        }
        let state = doc
            .pages
            .get(page as usize)
            .ok_or(EngineError::PageOutOfRange { page, page_count: doc.pages.len() as u32 })?;

        let mut image = raster::blank_page(state.size.width_pt, state.size.height_pt, oversample);
        for op in &state.ops {
            raster::apply_op(&mut image, op, oversample)?;
        }
        Ok(image)
    }

    fn new_document(&mut self) -> DocumentHandle {
        self.insert(StubDoc {
            kind: DocumentKind::Paginated,
            pages: Vec::new(),
            password: None,
            authenticated: false,
        })
    }

    fn add_page(
        &mut self,
        handle: DocumentHandle,
        width_pt: f32,
        height_pt: f32,
    ) -> Result<u32, EngineError> {
        let doc = self.doc_mut(handle)?;
        doc.pages.push(StubPage {
            size: PageSize { width_pt, height_pt },
            ops: Vec::new(),
            copied: false,
        });
        Ok(doc.pages.len() as u32 - 1)
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
        self.push_op(handle, page, DrawOp::Highlight { rect: rect.normalized(), color, opacity })
    }

    fn draw_image(
        &mut self,
        handle: DocumentHandle,
        page: u32,
        rect: DocRect,
        bytes: &[u8],
    ) -> Result<(), EngineError> {
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
        _source_page: u32,
    ) -> Result<bool, EngineError> {
        if self.fail_copy {
            return Ok(false);
        }
        if self.doc(source)?.locked() {
            return Err(EngineError::AuthenticationRequired);
        }

        let doc = self.doc_mut(dest)?;
        let page_count = doc.pages.len() as u32;
        let state = doc
            .pages
            .get_mut(dest_page as usize)
            .ok_or(EngineError::PageOutOfRange { page: dest_page, page_count })?;
        state.copied = true;
        Ok(true)
    }

    fn save(
        &self,
        handle: DocumentHandle,
        path: &Path,
        _strip_encryption: bool,
    ) -> Result<(), EngineError> {
        if self.fail_save {
            return Err(EngineError::Backend("injected save failure".to_owned()));
        }

        let doc = self.doc(handle)?;
        if doc.locked() {
            return Err(EngineError::AuthenticationRequired);
        }

        let ops: usize = doc.pages.iter().map(|p| p.ops.len()).sum();
        let copied = doc.pages.iter().filter(|p| p.copied).count();
        let raster_base = doc
            .pages
            .iter()
            .any(|p| p.ops.iter().any(|op| matches!(op, DrawOp::Image { rect, .. }
                if rect.x1 == 0.0 && rect.y1 == 0.0)));
        let description = format!(
            "STUB\npages={}\nops={ops}\ncopied={copied}\nraster_base={raster_base}\n",
            doc.pages.len(),
        );
        fs::write(path, description)?;

        // The written file is reopenable, unencrypted.
        self.files.borrow_mut().insert(
            path.to_path_buf(),
            StubFile { pages: doc.pages.len() as u32, password: None },
        );
        Ok(())
    }

    fn close(&mut self, handle: DocumentHandle) -> Result<(), EngineError> {
        self.docs
            .remove(&handle)
            .map(|_| ())
            .ok_or(EngineError::InvalidHandle(handle.raw()))
    }
}
