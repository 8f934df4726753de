use std::io::Cursor;

use image::{DynamicImage, GenericImageView};
use lopdf::{dictionary, Document, Object, Stream};

use crate::error::TransformError;
use crate::sanitize;
use crate::store::OutputDir;
use crate::transform::options::{ImageCompressOptions, ImageConvertOptions, ImageFormat};
use crate::transform::pdf::save_pdf;
use crate::transform::{
    prefixed_name, require_image, with_extension, write_output, Transform, TransformInput,
    TransformKind, TransformOutput,
};

/// Re-encodes an image into another raster format, or embeds it in a
/// single-page PDF sized to the image.
#[derive(Debug, Default)]
pub struct ImageConvert {
    options: ImageConvertOptions,
}

impl ImageConvert {
    pub fn new(options: ImageConvertOptions) -> Self {
        Self { options }
    }
}

impl Transform for ImageConvert {
    fn kind(&self) -> TransformKind {
        TransformKind::ImageConvert
    }

    fn apply(&self, input: &TransformInput, out: &OutputDir) -> Result<TransformOutput, TransformError> {
        let format = self.options.format;
        let _span = tracing::info_span!(
            "transform.image_convert",
            file = %input.original_name,
            format = %format,
        )
        .entered();

        require_image(input)?;
        let data = input.read()?;
        let img = decode(&data)?;
        let file_name = with_extension(&input.original_name, format.extension());

        match format.codec() {
            Some(codec) => {
                let encoded = encode(&img, codec)?;
                write_output(out, file_name, format.mime_type(), &encoded)
            }
            None => {
                let mut doc = image_pdf(&img, &data);
                save_pdf(&mut doc, out, file_name)
            }
        }
    }
}

/// Lossy JPEG re-encode at a fixed quality.
#[derive(Debug, Default)]
pub struct ImageCompress {
    options: ImageCompressOptions,
}

impl ImageCompress {
    pub fn new(options: ImageCompressOptions) -> Self {
        Self { options }
    }
}

impl Transform for ImageCompress {
    fn kind(&self) -> TransformKind {
        TransformKind::ImageCompress
    }

    fn apply(&self, input: &TransformInput, out: &OutputDir) -> Result<TransformOutput, TransformError> {
        let quality = self.options.quality;
        let _span = tracing::info_span!(
            "transform.image_compress",
            file = %input.original_name,
            quality,
        )
        .entered();

        require_image(input)?;
        let img = decode(&input.read()?)?;

        let mut buffer = Cursor::new(Vec::new());
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buffer, quality)
            .encode_image(&img.to_rgb8())
            .map_err(|e| TransformError::Image(format!("Failed to encode JPEG: {}", e)))?;

        write_output(
            out,
            compressed_name(&input.original_name),
            ImageFormat::Jpeg.mime_type(),
            buffer.get_ref(),
        )
    }
}

/// `compressed-<original>` when the upload already is a JPEG. Any other
/// input is re-encoded as JPEG, so its extension becomes `.jpg` and the name
/// follows the content type instead of the uploaded file name.
fn compressed_name(original_name: &str) -> String {
    match sanitize::extension_of(original_name).as_deref() {
        Some("jpg") | Some("jpeg") => prefixed_name("compressed", original_name),
        _ => prefixed_name("compressed", &with_extension(original_name, "jpg")),
    }
}

fn decode(data: &[u8]) -> Result<DynamicImage, TransformError> {
    image::load_from_memory(data)
        .map_err(|e| TransformError::Image(format!("Failed to load image: {}", e)))
}

fn encode(img: &DynamicImage, codec: image::ImageFormat) -> Result<Vec<u8>, TransformError> {
    // JPEG has no alpha channel; everything else takes 8-bit RGBA.
    let prepared = match codec {
        image::ImageFormat::Jpeg => DynamicImage::ImageRgb8(img.to_rgb8()),
        _ => DynamicImage::ImageRgba8(img.to_rgba8()),
    };

    let mut buffer = Cursor::new(Vec::new());
    prepared
        .write_to(&mut buffer, codec)
        .map_err(|e| TransformError::Image(format!("Failed to encode {:?}: {}", codec, e)))?;
    Ok(buffer.into_inner())
}

/// One page, one point per pixel. RGB JPEGs are embedded as-is; anything else
/// is stored as raw RGB and compressed on save.
fn image_pdf(img: &DynamicImage, data: &[u8]) -> Document {
    let (width, height) = img.dimensions();

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let passthrough_jpeg = matches!(image::guess_format(data), Ok(image::ImageFormat::Jpeg))
        && matches!(img, DynamicImage::ImageRgb8(_));

    let image_stream = if passthrough_jpeg {
        Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width as i64,
                "Height" => height as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            data.to_vec(),
        )
    } else {
        Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width as i64,
                "Height" => height as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
            },
            img.to_rgb8().into_raw(),
        )
    };
    let image_id = doc.add_object(image_stream);

    let resources_id = doc.add_object(dictionary! {
        "XObject" => dictionary! {
            "Im1" => image_id,
        },
    });

    let content = format!("q\n{} 0 0 {} 0 0 cm\n/Im1 Do\nQ\n", width, height);
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));

    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), (width as i64).into(), (height as i64).into()],
        "Resources" => resources_id,
        "Contents" => content_id,
    });

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    if !passthrough_jpeg {
        doc.compress();
    }
    doc
}
