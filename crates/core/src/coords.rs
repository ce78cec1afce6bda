//! Coordinate conversions between display, raster and document space.
//!
//! Three spaces are in play:
//! - **display**: pixels on the zoomed, scrollable canvas,
//! - **raster**: pixels of the decoded page bitmap, rendered at a fixed
//!   oversampling factor relative to native page units,
//! - **document**: the page's native units (points), resolution independent.
//!
//! Conversions are pure and deterministic. Snapping to integer pixels is
//! round-to-nearest everywhere, which bounds repeated round-trip drift at
//! half a raster pixel; that drift is documented behavior, not a defect.

use doc_engine::{DocPoint, DocRect};

/// Oversampling factor used when rasterizing paginated pages for display.
pub const PDF_OVERSAMPLE: f32 = 2.0;

/// Point on the visible canvas, scaled by the zoom factor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayPoint {
    pub x: f32,
    pub y: f32,
}

impl DisplayPoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Point on the decoded page bitmap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterPoint {
    pub x: f32,
    pub y: f32,
}

impl RasterPoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Round-to-nearest integer pixel coordinates.
    pub fn snapped(self) -> (i32, i32) {
        (self.x.round() as i32, self.y.round() as i32)
    }
}

pub fn display_to_raster(p: DisplayPoint, zoom: f32) -> RasterPoint {
    RasterPoint::new(p.x / zoom, p.y / zoom)
}

pub fn raster_to_display(p: RasterPoint, zoom: f32) -> DisplayPoint {
    DisplayPoint::new(p.x * zoom, p.y * zoom)
}

pub fn raster_to_document(p: RasterPoint, oversample: f32) -> DocPoint {
    DocPoint::new(p.x / oversample, p.y / oversample)
}

pub fn document_to_raster(p: DocPoint, oversample: f32) -> RasterPoint {
    RasterPoint::new(p.x * oversample, p.y * oversample)
}

pub fn display_to_document(p: DisplayPoint, zoom: f32, oversample: f32) -> DocPoint {
    DocPoint::new(p.x / (zoom * oversample), p.y / (zoom * oversample))
}

pub fn document_to_display(p: DocPoint, zoom: f32, oversample: f32) -> DisplayPoint {
    DisplayPoint::new(p.x * zoom * oversample, p.y * zoom * oversample)
}

/// Convert a drag gesture's display-space corners to a document-space rect.
pub fn display_rect_to_document(
    start: DisplayPoint,
    end: DisplayPoint,
    zoom: f32,
    oversample: f32,
) -> DocRect {
    let a = display_to_document(start, zoom, oversample);
    let b = display_to_document(end, zoom, oversample);
    DocRect::new(a.x, a.y, b.x, b.y).normalized()
}
