use std::io::{BufWriter, Cursor, Write};
use std::path::Path;

use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use tracing::debug;

use crate::error::{TransformError, ValidationError};
use crate::sanitize::redact_path;
use crate::store::{release_blocking, OutputDir};
use crate::transform::options::{
    AdvancedCompressOptions, CompressionLevel, RotateOptions, SplitOptions,
};
use crate::transform::word::write_docx;
use crate::transform::{
    create_output, prefixed_name, require_pdf, with_extension, Transform, TransformInput,
    TransformKind, TransformOutput, DOCX_MIME, PDF_MIME,
};

/// Prunes unreferenced objects and compresses every stream.
#[derive(Debug, Default)]
pub struct PdfCompress;

impl Transform for PdfCompress {
    fn kind(&self) -> TransformKind {
        TransformKind::PdfCompress
    }

    fn apply(&self, input: &TransformInput, out: &OutputDir) -> Result<TransformOutput, TransformError> {
        let _span = tracing::info_span!("transform.pdf_compress", file = %input.original_name).entered();

        require_pdf(input)?;
        let mut doc = load_pdf(&input.path)?;
        optimize(&mut doc, &AdvancedCompressOptions::default());

        save_pdf(&mut doc, out, prefixed_name("compressed", &input.original_name))
    }
}

/// Level-driven compression with optional image and metadata stripping.
#[derive(Debug, Default)]
pub struct PdfCompressAdvanced {
    options: AdvancedCompressOptions,
}

impl PdfCompressAdvanced {
    pub fn new(options: AdvancedCompressOptions) -> Self {
        Self { options }
    }
}

impl Transform for PdfCompressAdvanced {
    fn kind(&self) -> TransformKind {
        TransformKind::PdfCompressAdvanced
    }

    fn apply(&self, input: &TransformInput, out: &OutputDir) -> Result<TransformOutput, TransformError> {
        let _span = tracing::info_span!(
            "transform.pdf_compress_advanced",
            file = %input.original_name,
            level = ?self.options.compression_level,
        )
        .entered();

        require_pdf(input)?;
        let mut doc = load_pdf(&input.path)?;
        optimize(&mut doc, &self.options);

        save_pdf(&mut doc, out, prefixed_name("compressed", &input.original_name))
    }
}

/// Keeps pages `start..=end` (1-based, inclusive).
#[derive(Debug, Default)]
pub struct PdfSplit {
    options: SplitOptions,
}

impl PdfSplit {
    pub fn new(options: SplitOptions) -> Self {
        Self { options }
    }
}

impl Transform for PdfSplit {
    fn kind(&self) -> TransformKind {
        TransformKind::PdfSplit
    }

    fn apply(&self, input: &TransformInput, out: &OutputDir) -> Result<TransformOutput, TransformError> {
        let _span = tracing::info_span!("transform.pdf_split", file = %input.original_name).entered();

        require_pdf(input)?;
        let mut doc = load_pdf(&input.path)?;

        let page_count = doc.get_pages().len() as u32;
        let start = self.options.start_page;
        let end = self.options.end_page.unwrap_or(page_count);
        if start < 1 || start > end || end > page_count {
            return Err(ValidationError::new(
                "pageRange",
                format!(
                    "pages {}-{} are outside 1-{} or reversed",
                    start, end, page_count
                ),
            )
            .into());
        }

        let discard: Vec<u32> = (1..=page_count)
            .filter(|n| *n < start || *n > end)
            .collect();
        if !discard.is_empty() {
            doc.delete_pages(&discard);
            doc.prune_objects();
            doc.renumber_objects();
        }
        debug!(kept = end - start + 1, total = page_count, "Split page range");

        save_pdf(&mut doc, out, prefixed_name("split", &input.original_name))
    }
}

/// Sets an absolute `/Rotate` on every page.
#[derive(Debug, Default)]
pub struct PdfRotate {
    options: RotateOptions,
}

impl PdfRotate {
    pub fn new(options: RotateOptions) -> Self {
        Self { options }
    }
}

impl Transform for PdfRotate {
    fn kind(&self) -> TransformKind {
        TransformKind::PdfRotate
    }

    fn apply(&self, input: &TransformInput, out: &OutputDir) -> Result<TransformOutput, TransformError> {
        let _span = tracing::info_span!(
            "transform.pdf_rotate",
            file = %input.original_name,
            rotation = self.options.rotation,
        )
        .entered();

        require_pdf(input)?;
        let mut doc = load_pdf(&input.path)?;

        let rotation = self.options.page_rotation();
        let page_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();
        for page_id in page_ids {
            let page = doc
                .get_object_mut(page_id)
                .and_then(Object::as_dict_mut)
                .map_err(|e| TransformError::Pdf(format!("Malformed page {:?}: {}", page_id, e)))?;
            page.set("Rotate", rotation);
        }

        save_pdf(&mut doc, out, prefixed_name("rotated", &input.original_name))
    }
}

/// Extracts the text layer page by page into a DOCX document.
#[derive(Debug, Default)]
pub struct PdfToWord;

impl Transform for PdfToWord {
    fn kind(&self) -> TransformKind {
        TransformKind::PdfToWord
    }

    fn apply(&self, input: &TransformInput, out: &OutputDir) -> Result<TransformOutput, TransformError> {
        let _span = tracing::info_span!("transform.pdf_to_word", file = %input.original_name).entered();

        require_pdf(input)?;
        let doc = load_pdf(&input.path)?;
        let pages = extract_page_texts(&doc);

        let file_name = with_extension(&input.original_name, "docx");
        let (path, file) = create_output(out, &file_name)?;
        if let Err(e) = write_docx(BufWriter::new(file), &pages) {
            release_blocking(&path);
            return Err(e);
        }

        Ok(TransformOutput {
            path,
            file_name,
            mime_type: DOCX_MIME.to_string(),
        })
    }
}

fn load_pdf(path: &Path) -> Result<Document, TransformError> {
    let bytes = std::fs::read(path).map_err(|e| TransformError::ReadInput {
        path: path.to_path_buf(),
        source: e,
    })?;

    let doc = Document::load_mem(&bytes)
        .map_err(|e| TransformError::Pdf(format!("Failed to load {}: {}", redact_path(path), e)))?;
    if doc.get_pages().is_empty() {
        return Err(TransformError::Pdf(format!("{} has no pages", redact_path(path))));
    }
    Ok(doc)
}

/// Serializes `doc` into a new output file, removing the file again if
/// serialization fails midway.
pub(crate) fn save_pdf(doc: &mut Document, out: &OutputDir, file_name: String) -> Result<TransformOutput, TransformError> {
    let (path, file) = create_output(out, &file_name)?;
    let mut writer = BufWriter::new(file);

    let written = doc
        .save_to(&mut writer)
        .map_err(|e| TransformError::Pdf(format!("Failed to save PDF: {}", e)))
        .and_then(|_| {
            writer.flush().map_err(|e| TransformError::WriteOutput {
                path: path.clone(),
                source: e,
            })
        });

    if let Err(e) = written {
        drop(writer);
        release_blocking(&path);
        return Err(e);
    }

    Ok(TransformOutput {
        path,
        file_name,
        mime_type: PDF_MIME.to_string(),
    })
}

/// Applies the cumulative compression steps of `options.compression_level`
/// plus the independent flags.
pub(crate) fn optimize(doc: &mut Document, options: &AdvancedCompressOptions) {
    let level = options.compression_level;

    if options.remove_images {
        let replaced = replace_images(doc);
        debug!(replaced, "Replaced image XObjects");
    } else if let Some(quality) = level.image_quality() {
        let reencoded = reencode_jpeg_images(doc, quality);
        debug!(reencoded, quality, "Re-encoded embedded JPEG images");
    }

    if options.remove_metadata || level >= CompressionLevel::Extreme {
        strip_metadata(doc);
    }

    if level >= CompressionLevel::Medium || options.optimize_for_web {
        doc.delete_zero_length_streams();
        let pruned = doc.prune_objects();
        debug!(pruned = pruned.len(), "Pruned unreferenced objects");
    }

    if level >= CompressionLevel::High || options.optimize_for_web {
        doc.renumber_objects();
    }

    doc.compress();
}

fn is_image_xobject(stream: &Stream) -> bool {
    matches!(stream.dict.get(b"Subtype"), Ok(Object::Name(name)) if name.as_slice() == b"Image")
}

fn replace_images(doc: &mut Document) -> usize {
    let mut replaced = 0;
    for object in doc.objects.values_mut() {
        if let Object::Stream(stream) = object {
            if is_image_xobject(stream) {
                *stream = blank_pixel();
                replaced += 1;
            }
        }
    }
    replaced
}

fn blank_pixel() -> Stream {
    Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => 1,
            "Height" => 1,
            "ColorSpace" => "DeviceGray",
            "BitsPerComponent" => 8,
        },
        vec![0xFF],
    )
}

/// Re-encodes plain DCT images in RGB or gray, keeping the smaller encoding.
fn reencode_jpeg_images(doc: &mut Document, quality: u8) -> usize {
    let mut reencoded = 0;
    for object in doc.objects.values_mut() {
        let Object::Stream(stream) = object else {
            continue;
        };
        if !is_image_xobject(stream) || !is_plain_dct(stream) {
            continue;
        }

        let gray = match stream.dict.get(b"ColorSpace") {
            Ok(Object::Name(name)) if name.as_slice() == b"DeviceRGB" => false,
            Ok(Object::Name(name)) if name.as_slice() == b"DeviceGray" => true,
            _ => continue,
        };

        match reencode_jpeg(&stream.content, quality, gray) {
            Some(smaller) if smaller.len() < stream.content.len() => {
                stream.set_content(smaller);
                reencoded += 1;
            }
            _ => {}
        }
    }
    reencoded
}

fn is_plain_dct(stream: &Stream) -> bool {
    match stream.dict.get(b"Filter") {
        Ok(Object::Name(name)) => name.as_slice() == b"DCTDecode",
        Ok(Object::Array(filters)) => {
            filters.len() == 1 && matches!(&filters[0], Object::Name(n) if n.as_slice() == b"DCTDecode")
        }
        _ => false,
    }
}

fn reencode_jpeg(data: &[u8], quality: u8, gray: bool) -> Option<Vec<u8>> {
    let img = image::load_from_memory_with_format(data, image::ImageFormat::Jpeg).ok()?;

    let mut buffer = Cursor::new(Vec::new());
    let encoded = {
        let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buffer, quality);
        if gray {
            encoder.encode_image(&img.to_luma8())
        } else {
            encoder.encode_image(&img.to_rgb8())
        }
    };

    match encoded {
        Ok(()) => Some(buffer.into_inner()),
        Err(e) => {
            debug!("Skipping image re-encode: {}", e);
            None
        }
    }
}

fn strip_metadata(doc: &mut Document) {
    doc.trailer.remove(b"Info");

    let root_id = match doc.trailer.get(b"Root") {
        Ok(Object::Reference(id)) => *id,
        _ => return,
    };
    if let Ok(Object::Dictionary(catalog)) = doc.get_object_mut(root_id) {
        catalog.remove(b"Metadata");
    }
}

/// Text of each page in page order; pages without a usable text layer yield
/// an empty string.
pub(crate) fn extract_page_texts(doc: &Document) -> Vec<String> {
    doc.get_pages()
        .keys()
        .map(|page_num| doc.extract_text(&[*page_num]).unwrap_or_default())
        .collect()
}
