//! PDF structure handling for the software backend.
//!
//! Page geometry is read with lopdf; deferred draw operations are burned
//! into content streams at save time. Document space is top-left y-down, so
//! every operator flips y against the page height before emission.

use crate::{Color, DocRect, DrawOp, EngineError, PageBase, PageSize, PagedDoc};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use std::fmt::Write as FmtWrite;
use std::path::Path;

const US_LETTER: PageSize = PageSize { width_pt: 612.0, height_pt: 792.0 };

/// Read the MediaBox of every page. Pages without a parseable MediaBox fall
/// back to US Letter.
pub(crate) fn parse_page_sizes(bytes: &[u8]) -> Result<Vec<PageSize>, EngineError> {
    let doc = Document::load_mem(bytes)?;
    let pages = doc.get_pages();
    let mut sizes = Vec::with_capacity(pages.len());

    for (_, object_id) in pages {
        let dict = doc.get_dictionary(object_id)?;
        let size = dict
            .get(b"MediaBox")
            .ok()
            .and_then(|obj| obj.as_array().ok())
            .and_then(|array| {
                if array.len() != 4 {
                    return None;
                }
                let x0 = array[0].as_float().ok()?;
                let y0 = array[1].as_float().ok()?;
                let x1 = array[2].as_float().ok()?;
                let y1 = array[3].as_float().ok()?;
                Some(PageSize { width_pt: (x1 - x0).abs(), height_pt: (y1 - y0).abs() })
            })
            .unwrap_or(US_LETTER);

        sizes.push(size);
    }

    if sizes.is_empty() {
        return Err(EngineError::Backend("document has no pages".to_owned()));
    }

    Ok(sizes)
}

/// Whether a page can be structurally copied: the bytes parse and the page
/// carries its own content streams.
pub(crate) fn page_is_copyable(bytes: &[u8], page_index: u32) -> bool {
    let Ok(doc) = Document::load_mem(bytes) else {
        return false;
    };
    let pages = doc.get_pages();
    let Some(page_id) = pages.values().nth(page_index as usize) else {
        return false;
    };

    doc.get_dictionary(*page_id)
        .map(|dict| dict.get(b"Contents").is_ok())
        .unwrap_or(false)
}

/// Serialize a paged document to `path`, burning pending draw operations
/// into the page content streams.
pub(crate) fn write_paged(doc: &PagedDoc, path: &Path) -> Result<(), EngineError> {
    match &doc.source {
        Some(bytes) => {
            let mut pdf = Document::load_mem(bytes)?;
            let page_ids: Vec<ObjectId> = pdf.get_pages().values().copied().collect();

            for (index, state) in doc.pages.iter().enumerate() {
                if state.ops.is_empty() {
                    continue;
                }
                let page_id = *page_ids.get(index).ok_or_else(|| {
                    EngineError::Backend(format!("page {index} missing from source"))
                })?;
                burn_ops(&mut pdf, page_id, state.size, &state.ops)?;
            }

            pdf.compress();
            pdf.save(path)?;
            Ok(())
        }
        None => build_document(doc, path),
    }
}

/// Assemble a brand-new PDF from page records (the encrypted-reconstruction
/// output path).
fn build_document(doc: &PagedDoc, path: &Path) -> Result<(), EngineError> {
    let mut pdf = Document::with_version("1.5");
    let pages_id = pdf.new_object_id();
    let mut kids: Vec<Object> = Vec::new();

    for state in &doc.pages {
        let page_id = match &state.base {
            PageBase::CopiedFrom { bytes, page_index } => {
                import_copied_page(&mut pdf, pages_id, bytes, *page_index, state.size)?
            }
            PageBase::Blank | PageBase::Source => {
                let content_id = pdf.add_object(Stream::new(Dictionary::new(), Vec::new()));
                pdf.add_object(dictionary! {
                    "Type" => "Page",
                    "Parent" => pages_id,
                    "MediaBox" => media_box(state.size),
                    "Contents" => content_id,
                })
            }
        };

        burn_ops(&mut pdf, page_id, state.size, &state.ops)?;
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    pdf.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );

    let catalog_id = pdf.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    pdf.trailer.set("Root", catalog_id);

    pdf.compress();
    pdf.save(path)?;
    Ok(())
}

fn media_box(size: PageSize) -> Vec<Object> {
    vec![0.into(), 0.into(), size.width_pt.into(), size.height_pt.into()]
}

/// Import one page's object graph from `bytes` into `dest`, remapping every
/// object id past the destination's current maximum.
fn import_copied_page(
    dest: &mut Document,
    pages_id: ObjectId,
    bytes: &[u8],
    page_index: u32,
    size: PageSize,
) -> Result<ObjectId, EngineError> {
    let source = Document::load_mem(bytes)?;
    let source_page_id = *source
        .get_pages()
        .values()
        .nth(page_index as usize)
        .ok_or_else(|| EngineError::Backend(format!("source page {page_index} not found")))?;
    let source_page = source.get_dictionary(source_page_id)?.clone();

    let offset = dest.max_id;
    for (old_id, object) in source.objects.iter() {
        let new_id = (old_id.0 + offset, old_id.1);
        dest.objects.insert(new_id, remap_object_refs(object.clone(), offset));
    }
    dest.max_id = offset + source.max_id;

    let mut page_dict = dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => media_box(size),
    };
    if let Ok(contents) = source_page.get(b"Contents") {
        page_dict.set("Contents", remap_object_refs(contents.clone(), offset));
    }
    if let Ok(resources) = source_page.get(b"Resources") {
        page_dict.set("Resources", remap_object_refs(resources.clone(), offset));
    }

    Ok(dest.add_object(page_dict))
}

fn remap_object_refs(obj: Object, offset: u32) -> Object {
    match obj {
        Object::Reference(id) => Object::Reference((id.0 + offset, id.1)),
        Object::Array(arr) => {
            Object::Array(arr.into_iter().map(|o| remap_object_refs(o, offset)).collect())
        }
        Object::Dictionary(mut dict) => {
            for (_, value) in dict.iter_mut() {
                *value = remap_object_refs(value.clone(), offset);
            }
            Object::Dictionary(dict)
        }
        Object::Stream(mut stream) => {
            for (_, value) in stream.dict.iter_mut() {
                *value = remap_object_refs(value.clone(), offset);
            }
            Object::Stream(stream)
        }
        other => other,
    }
}

/// Burn draw operations into a page: allocate the resources they need, then
/// append one content stream with the operators.
fn burn_ops(
    pdf: &mut Document,
    page_id: ObjectId,
    size: PageSize,
    ops: &[DrawOp],
) -> Result<(), EngineError> {
    if ops.is_empty() {
        return Ok(());
    }

    let mut fonts: Vec<(String, ObjectId)> = Vec::new();
    let mut gstates: Vec<(String, ObjectId)> = Vec::new();
    let mut xobjects: Vec<(String, ObjectId)> = Vec::new();

    if ops.iter().any(|op| matches!(op, DrawOp::Text { .. })) {
        let font_id = pdf.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        fonts.push(("FBlk".to_owned(), font_id));
    }

    for (index, op) in ops.iter().enumerate() {
        match op {
            DrawOp::Highlight { opacity, .. } => {
                let gs_id = pdf.add_object(dictionary! {
                    "Type" => "ExtGState",
                    "ca" => *opacity,
                    "CA" => *opacity,
                });
                gstates.push((format!("GSa{index}"), gs_id));
            }
            DrawOp::Image { bytes, .. } => {
                let decoded = image::load_from_memory(bytes)?.to_rgb8();
                let (width, height) = (decoded.width() as i64, decoded.height() as i64);
                let image_id = pdf.add_object(Stream::new(
                    dictionary! {
                        "Type" => "XObject",
                        "Subtype" => "Image",
                        "Width" => width,
                        "Height" => height,
                        "ColorSpace" => "DeviceRGB",
                        "BitsPerComponent" => 8,
                    },
                    decoded.into_raw(),
                ));
                xobjects.push((format!("Imb{index}"), image_id));
            }
            _ => {}
        }
    }

    add_resources(pdf, page_id, &fonts, &gstates, &xobjects)?;

    let content = ops_content(size, ops)?;
    append_content(pdf, page_id, content)
}

/// Merge resource entries into the page's Resources dictionary. A shared
/// (referenced) Resources dictionary is cloned page-local before mutation.
fn add_resources(
    pdf: &mut Document,
    page_id: ObjectId,
    fonts: &[(String, ObjectId)],
    gstates: &[(String, ObjectId)],
    xobjects: &[(String, ObjectId)],
) -> Result<(), EngineError> {
    if fonts.is_empty() && gstates.is_empty() && xobjects.is_empty() {
        return Ok(());
    }

    let page = pdf.get_dictionary(page_id)?.clone();
    let mut resources = match page.get(b"Resources") {
        Ok(Object::Reference(id)) => pdf.get_dictionary(*id)?.clone(),
        Ok(Object::Dictionary(dict)) => dict.clone(),
        _ => Dictionary::new(),
    };

    let mut merge = |category: &[u8], entries: &[(String, ObjectId)]| {
        if entries.is_empty() {
            return;
        }
        let mut dict = match resources.get(category) {
            Ok(Object::Dictionary(existing)) => existing.clone(),
            _ => Dictionary::new(),
        };
        for (name, id) in entries {
            dict.set(name.as_bytes().to_vec(), Object::Reference(*id));
        }
        resources.set(category.to_vec(), Object::Dictionary(dict));
    };

    merge(b"Font", fonts);
    merge(b"ExtGState", gstates);
    merge(b"XObject", xobjects);

    pdf.get_object_mut(page_id)?
        .as_dict_mut()?
        .set("Resources", Object::Dictionary(resources));
    Ok(())
}

/// Append a content stream to the page's Contents chain.
fn append_content(
    pdf: &mut Document,
    page_id: ObjectId,
    content: Vec<u8>,
) -> Result<(), EngineError> {
    let stream_id = pdf.add_object(Stream::new(Dictionary::new(), content));

    let page = pdf.get_dictionary(page_id)?;
    let new_contents = match page.get(b"Contents") {
        Ok(Object::Reference(id)) => {
            Object::Array(vec![Object::Reference(*id), Object::Reference(stream_id)])
        }
        Ok(Object::Array(existing)) => {
            let mut arr = existing.clone();
            arr.push(Object::Reference(stream_id));
            Object::Array(arr)
        }
        _ => Object::Array(vec![Object::Reference(stream_id)]),
    };

    pdf.get_object_mut(page_id)?.as_dict_mut()?.set("Contents", new_contents);
    Ok(())
}

fn set_fill_color(stream: &mut String, color: Color) -> Result<(), EngineError> {
    let (r, g, b) = color.to_normalized();
    writeln!(stream, "{} {} {} rg", r, g, b)
        .map_err(|e| EngineError::Backend(e.to_string()))
}

fn rect_path(stream: &mut String, rect: DocRect, size: PageSize) -> Result<(), EngineError> {
    let rect = rect.normalized();
    writeln!(
        stream,
        "{} {} {} {} re",
        rect.x1,
        size.height_pt - rect.y2,
        rect.width(),
        rect.height()
    )
    .map_err(|e| EngineError::Backend(e.to_string()))
}

fn escape_text(text: &str) -> String {
    text.replace('\\', "\\\\").replace('(', "\\(").replace(')', "\\)")
}

/// Generate the operator stream for a page's pending ops, wrapped in a
/// save/restore pair so the base content's graphics state stays untouched.
fn ops_content(size: PageSize, ops: &[DrawOp]) -> Result<Vec<u8>, EngineError> {
    let mut stream = String::from("q\n");
    let fail = |e: std::fmt::Error| EngineError::Backend(e.to_string());

    for (index, op) in ops.iter().enumerate() {
        match op {
            DrawOp::FillRect { rect, color } => {
                set_fill_color(&mut stream, *color)?;
                rect_path(&mut stream, *rect, size)?;
                writeln!(stream, "f").map_err(fail)?;
            }
            DrawOp::Highlight { rect, color, .. } => {
                writeln!(stream, "/GSa{index} gs").map_err(fail)?;
                set_fill_color(&mut stream, *color)?;
                rect_path(&mut stream, *rect, size)?;
                writeln!(stream, "f").map_err(fail)?;
            }
            DrawOp::Text { at, text, size: font_size, color } => {
                writeln!(stream, "BT").map_err(fail)?;
                writeln!(stream, "/FBlk {font_size} Tf").map_err(fail)?;
                set_fill_color(&mut stream, *color)?;
                writeln!(stream, "{} {} Td", at.x, size.height_pt - at.y).map_err(fail)?;
                writeln!(stream, "({}) Tj", escape_text(text)).map_err(fail)?;
                writeln!(stream, "ET").map_err(fail)?;
            }
            DrawOp::Image { rect, .. } => {
                let rect = rect.normalized();
                writeln!(stream, "q").map_err(fail)?;
                writeln!(
                    stream,
                    "{} 0 0 {} {} {} cm",
                    rect.width(),
                    rect.height(),
                    rect.x1,
                    size.height_pt - rect.y2
                )
                .map_err(fail)?;
                writeln!(stream, "/Imb{index} Do").map_err(fail)?;
                writeln!(stream, "Q").map_err(fail)?;
            }
        }
    }

    stream.push_str("Q\n");
    Ok(stream.into_bytes())
}
