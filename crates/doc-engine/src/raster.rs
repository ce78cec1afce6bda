//! Software rasterization of draw operations onto RGBA bitmaps.
//!
//! Geometry arrives in document space and is scaled by the caller's
//! oversample factor. Pixel snapping is round-to-nearest throughout.

use crate::{Color, DrawOp, EngineError, RgbaImage};
use image::imageops::{self, FilterType};
use image::Rgba;
use std::path::Path;

/// White page bitmap at `scale` pixels per point, with a light border so
/// page boundaries stay visible against a light canvas.
pub fn blank_page(width_pt: f32, height_pt: f32, scale: f32) -> RgbaImage {
    let width = (width_pt * scale).round().max(1.0) as u32;
    let height = (height_pt * scale).round().max(1.0) as u32;
    let mut image = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));

    if width >= 4 && height >= 4 {
        let border = Rgba([220, 220, 220, 255]);
        for x in 0..width {
            image.put_pixel(x, 0, border);
            image.put_pixel(x, height - 1, border);
        }
        for y in 0..height {
            image.put_pixel(0, y, border);
            image.put_pixel(width - 1, y, border);
        }
    }

    image
}

fn snap(value: f32, max: u32) -> u32 {
    value.round().clamp(0.0, max as f32) as u32
}

fn fill_rect(image: &mut RgbaImage, x1: u32, y1: u32, x2: u32, y2: u32, color: Color) {
    let pixel = Rgba([color.r, color.g, color.b, 255]);
    for y in y1..y2 {
        for x in x1..x2 {
            image.put_pixel(x, y, pixel);
        }
    }
}

fn blend_rect(image: &mut RgbaImage, x1: u32, y1: u32, x2: u32, y2: u32, color: Color, alpha: f32) {
    let alpha = alpha.clamp(0.0, 1.0);
    for y in y1..y2 {
        for x in x1..x2 {
            let Rgba([r, g, b, a]) = *image.get_pixel(x, y);
            let mix = |old: u8, new: u8| -> u8 {
                (old as f32 * (1.0 - alpha) + new as f32 * alpha).round() as u8
            };
            image.put_pixel(x, y, Rgba([mix(r, color.r), mix(g, color.g), mix(b, color.b), a]));
        }
    }
}

/// Apply a single draw operation to `image`, with `scale` pixels per
/// document unit.
pub fn apply_op(image: &mut RgbaImage, op: &DrawOp, scale: f32) -> Result<(), EngineError> {
    let (width, height) = (image.width(), image.height());

    match op {
        DrawOp::FillRect { rect, color } => {
            let rect = rect.normalized();
            fill_rect(
                image,
                snap(rect.x1 * scale, width),
                snap(rect.y1 * scale, height),
                snap(rect.x2 * scale, width),
                snap(rect.y2 * scale, height),
                *color,
            );
            Ok(())
        }
        DrawOp::Highlight { rect, color, opacity } => {
            let rect = rect.normalized();
            blend_rect(
                image,
                snap(rect.x1 * scale, width),
                snap(rect.y1 * scale, height),
                snap(rect.x2 * scale, width),
                snap(rect.y2 * scale, height),
                *color,
                *opacity,
            );
            Ok(())
        }
        DrawOp::Image { rect, bytes } => {
            let rect = rect.normalized();
            let target_w = (rect.width() * scale).round().max(1.0) as u32;
            let target_h = (rect.height() * scale).round().max(1.0) as u32;

            let decoded = image::load_from_memory(bytes)?.to_rgba8();
            let resized = imageops::resize(&decoded, target_w, target_h, FilterType::Triangle);
            imageops::overlay(
                image,
                &resized,
                (rect.x1 * scale).round() as i64,
                (rect.y1 * scale).round() as i64,
            );
            Ok(())
        }
        DrawOp::Text { at, text, size, color } => {
            // No font engine in the software backend; glyphs render as
            // filled blocks sized by the font metrics.
            let glyph_h = size * 0.7 * scale;
            let advance = size * 0.6 * scale;
            let baseline = at.y * scale;
            let mut cursor = at.x * scale;

            for ch in text.chars() {
                if !ch.is_whitespace() {
                    fill_rect(
                        image,
                        snap(cursor, width),
                        snap(baseline - glyph_h, height),
                        snap(cursor + advance * 0.85, width),
                        snap(baseline, height),
                        *color,
                    );
                }
                cursor += advance;
            }
            Ok(())
        }
    }
}

/// Encode a bitmap as PNG bytes (e.g. for re-embedding a rendered page).
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, EngineError> {
    let mut bytes = Vec::new();
    image.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)?;
    Ok(bytes)
}

/// Write a bitmap to `path` as PNG.
pub fn write_png(image: &RgbaImage, path: &Path) -> Result<(), EngineError> {
    encode_to_path(image, image::ImageFormat::Png, path)
}

/// Encode a bitmap to `path` in the given container format.
///
/// JPEG has no alpha channel, so RGBA flattens to RGB first.
pub fn encode_to_path(
    image: &RgbaImage,
    format: image::ImageFormat,
    path: &Path,
) -> Result<(), EngineError> {
    match format {
        image::ImageFormat::Jpeg => {
            let rgb = image::DynamicImage::ImageRgba8(image.clone()).to_rgb8();
            rgb.save_with_format(path, format)?;
        }
        _ => image.save_with_format(path, format)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DocPoint, DocRect};

    #[test]
    fn blank_page_scales_with_oversample() {
        let page = blank_page(100.0, 50.0, 2.0);
        assert_eq!(page.width(), 200);
        assert_eq!(page.height(), 100);
        assert_eq!(*page.get_pixel(100, 50), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn fill_rect_is_clamped_to_image_bounds() {
        let mut page = blank_page(10.0, 10.0, 1.0);
        let op = DrawOp::FillRect {
            rect: DocRect::new(5.0, 5.0, 500.0, 500.0),
            color: Color::BLACK,
        };

        apply_op(&mut page, &op, 1.0).unwrap();
        assert_eq!(*page.get_pixel(9, 9), Rgba([0, 0, 0, 255]));
        assert_eq!(*page.get_pixel(2, 2), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn highlight_blends_instead_of_replacing() {
        let mut page = blank_page(10.0, 10.0, 1.0);
        let op = DrawOp::Highlight {
            rect: DocRect::new(0.0, 0.0, 10.0, 10.0),
            color: Color::YELLOW,
            opacity: 0.5,
        };

        apply_op(&mut page, &op, 1.0).unwrap();
        // 50% yellow over white leaves red/green saturated and blue halved.
        assert_eq!(*page.get_pixel(5, 5), Rgba([255, 255, 128, 255]));
    }

    #[test]
    fn text_blocks_land_at_scaled_baseline() {
        let mut page = blank_page(100.0, 100.0, 2.0);
        let op = DrawOp::Text {
            at: DocPoint::new(10.0, 50.0),
            text: "x".to_owned(),
            size: 10.0,
            color: Color::BLACK,
        };

        apply_op(&mut page, &op, 2.0).unwrap();
        // Glyph block spans (20, 86)..(30, 100) in raster pixels.
        assert_eq!(*page.get_pixel(24, 95), Rgba([0, 0, 0, 255]));
        assert_eq!(*page.get_pixel(24, 105), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn overlapping_fills_depend_on_application_order() {
        let black_then_white = [
            DrawOp::FillRect { rect: DocRect::new(0.0, 0.0, 10.0, 10.0), color: Color::BLACK },
            DrawOp::FillRect { rect: DocRect::new(5.0, 5.0, 15.0, 15.0), color: Color::WHITE },
        ];

        let mut forward = blank_page(20.0, 20.0, 1.0);
        for op in &black_then_white {
            apply_op(&mut forward, op, 1.0).unwrap();
        }

        let mut reversed = blank_page(20.0, 20.0, 1.0);
        for op in black_then_white.iter().rev() {
            apply_op(&mut reversed, op, 1.0).unwrap();
        }

        // The overlap pixel takes the later fill, so swapping order flips it.
        assert_eq!(*forward.get_pixel(7, 7), Rgba([255, 255, 255, 255]));
        assert_eq!(*reversed.get_pixel(7, 7), Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn image_op_rejects_garbage_bytes() {
        let mut page = blank_page(50.0, 50.0, 1.0);
        let op = DrawOp::Image {
            rect: DocRect::new(0.0, 0.0, 10.0, 10.0),
            bytes: b"garbage".to_vec(),
        };

        assert!(apply_op(&mut page, &op, 1.0).is_err());
    }

    #[test]
    fn image_op_blits_decoded_pixels() {
        let stamp = RgbaImage::from_pixel(4, 4, Rgba([10, 20, 30, 255]));
        let mut bytes = Vec::new();
        stamp
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();

        let mut page = blank_page(50.0, 50.0, 1.0);
        let op = DrawOp::Image { rect: DocRect::new(10.0, 10.0, 20.0, 20.0), bytes };

        apply_op(&mut page, &op, 1.0).unwrap();
        assert_eq!(*page.get_pixel(15, 15), Rgba([10, 20, 30, 255]));
    }
}
