//! Typed option structs, one per transform, parsed from the scalar fields of
//! a multipart form.
//!
//! Parsing happens once at the HTTP boundary; a batch then shares the parsed
//! options read-only across all of its files.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::ValidationError;

pub const DEFAULT_IMAGE_QUALITY: u8 = 80;
pub const MIN_IMAGE_QUALITY: u8 = 10;
pub const MAX_IMAGE_QUALITY: u8 = 100;
pub const DEFAULT_ROTATION: u16 = 90;

/// Scalar (non-file) form fields. Later values for the same name win.
#[derive(Debug, Clone, Default)]
pub struct FormFields {
    values: HashMap<String, String>,
}

impl FormFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    /// Trimmed value; blank values count as absent.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn parse_bool(&self, name: &str) -> Result<bool, ValidationError> {
        match self.get(name).map(|v| v.to_ascii_lowercase()) {
            None => Ok(false),
            Some(v) => match v.as_str() {
                "true" | "1" | "on" | "yes" => Ok(true),
                "false" | "0" | "off" | "no" => Ok(false),
                _ => Err(ValidationError::new(name, format!("'{}' is not a boolean", v))),
            },
        }
    }

    fn parse_int(&self, name: &str) -> Result<Option<i64>, ValidationError> {
        self.get(name)
            .map(|v| {
                v.parse::<i64>()
                    .map_err(|_| ValidationError::new(name, format!("'{}' is not a number", v)))
            })
            .transpose()
    }

    fn parse_enum<T: FromStr<Err = ValidationError>>(&self, name: &str) -> Result<Option<T>, ValidationError> {
        self.get(name).map(T::from_str).transpose()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FormFields {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut fields = FormFields::new();
        for (k, v) in iter {
            fields.insert(k, v);
        }
        fields
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    #[default]
    Zip,
    Individual,
}

impl OutputMode {
    pub fn from_fields(fields: &FormFields) -> Result<Self, ValidationError> {
        Ok(fields.parse_enum("outputMode")?.unwrap_or_default())
    }
}

impl FromStr for OutputMode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "zip" => Ok(OutputMode::Zip),
            "individual" => Ok(OutputMode::Individual),
            other => Err(ValidationError::new(
                "outputMode",
                format!("'{}' is not one of zip, individual", other),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    Low,
    #[default]
    Medium,
    High,
    Extreme,
}

impl CompressionLevel {
    /// JPEG quality used when re-encoding embedded images, if this level does so.
    pub fn image_quality(&self) -> Option<u8> {
        match self {
            CompressionLevel::Low | CompressionLevel::Medium => None,
            CompressionLevel::High => Some(60),
            CompressionLevel::Extreme => Some(35),
        }
    }
}

impl FromStr for CompressionLevel {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(CompressionLevel::Low),
            "medium" => Ok(CompressionLevel::Medium),
            "high" => Ok(CompressionLevel::High),
            "extreme" => Ok(CompressionLevel::Extreme),
            other => Err(ValidationError::new(
                "compressionLevel",
                format!("'{}' is not one of low, medium, high, extreme", other),
            )),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdvancedCompressOptions {
    pub compression_level: CompressionLevel,
    pub remove_images: bool,
    pub remove_metadata: bool,
    pub optimize_for_web: bool,
}

impl AdvancedCompressOptions {
    pub fn from_fields(fields: &FormFields) -> Result<Self, ValidationError> {
        Ok(Self {
            compression_level: fields.parse_enum("compressionLevel")?.unwrap_or_default(),
            remove_images: fields.parse_bool("removeImages")?,
            remove_metadata: fields.parse_bool("removeMetadata")?,
            optimize_for_web: fields.parse_bool("optimizeForWeb")?,
        })
    }
}

/// Page range to keep. `end_page` of `None` means the last page; the range is
/// checked against the page count inside the transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitOptions {
    pub start_page: u32,
    pub end_page: Option<u32>,
}

impl Default for SplitOptions {
    fn default() -> Self {
        Self {
            start_page: 1,
            end_page: None,
        }
    }
}

impl SplitOptions {
    pub fn from_fields(fields: &FormFields) -> Result<Self, ValidationError> {
        let start_page = page_number(fields, "startPage")?.unwrap_or(1);
        let end_page = page_number(fields, "endPage")?;
        Ok(Self { start_page, end_page })
    }
}

fn page_number(fields: &FormFields, name: &str) -> Result<Option<u32>, ValidationError> {
    fields
        .parse_int(name)?
        .map(|n| {
            u32::try_from(n)
                .map_err(|_| ValidationError::new(name, format!("{} is not a page number", n)))
        })
        .transpose()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotateOptions {
    pub rotation: u16,
}

impl Default for RotateOptions {
    fn default() -> Self {
        Self {
            rotation: DEFAULT_ROTATION,
        }
    }
}

impl RotateOptions {
    pub fn new(rotation: i64) -> Result<Self, ValidationError> {
        match rotation {
            90 | 180 | 270 | 360 => Ok(Self {
                rotation: rotation as u16,
            }),
            other => Err(ValidationError::new(
                "rotation",
                format!("{} is not one of 90, 180, 270, 360", other),
            )),
        }
    }

    pub fn from_fields(fields: &FormFields) -> Result<Self, ValidationError> {
        match fields.parse_int("rotation")? {
            Some(rotation) => Self::new(rotation),
            None => Ok(Self::default()),
        }
    }

    /// Value written to a page's `/Rotate` entry; a full turn is upright.
    pub fn page_rotation(&self) -> i64 {
        i64::from(self.rotation % 360)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageCompressOptions {
    pub quality: u8,
}

impl Default for ImageCompressOptions {
    fn default() -> Self {
        Self {
            quality: DEFAULT_IMAGE_QUALITY,
        }
    }
}

impl ImageCompressOptions {
    /// Out-of-range qualities are clamped, not rejected.
    pub fn with_quality(quality: i64) -> Self {
        let clamped = quality.clamp(i64::from(MIN_IMAGE_QUALITY), i64::from(MAX_IMAGE_QUALITY));
        Self {
            quality: clamped as u8,
        }
    }

    pub fn from_fields(fields: &FormFields) -> Result<Self, ValidationError> {
        Ok(match fields.parse_int("quality")? {
            Some(quality) => Self::with_quality(quality),
            None => Self::default(),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    #[default]
    Png,
    Webp,
    Gif,
    Bmp,
    Tiff,
    Pdf,
}

impl ImageFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Png => "png",
            ImageFormat::Webp => "webp",
            ImageFormat::Gif => "gif",
            ImageFormat::Bmp => "bmp",
            ImageFormat::Tiff => "tiff",
            ImageFormat::Pdf => "pdf",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
            ImageFormat::Webp => "image/webp",
            ImageFormat::Gif => "image/gif",
            ImageFormat::Bmp => "image/bmp",
            ImageFormat::Tiff => "image/tiff",
            ImageFormat::Pdf => "application/pdf",
        }
    }

    /// Raster codec for the format; `None` for PDF.
    pub fn codec(&self) -> Option<image::ImageFormat> {
        match self {
            ImageFormat::Jpeg => Some(image::ImageFormat::Jpeg),
            ImageFormat::Png => Some(image::ImageFormat::Png),
            ImageFormat::Webp => Some(image::ImageFormat::WebP),
            ImageFormat::Gif => Some(image::ImageFormat::Gif),
            ImageFormat::Bmp => Some(image::ImageFormat::Bmp),
            ImageFormat::Tiff => Some(image::ImageFormat::Tiff),
            ImageFormat::Pdf => None,
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ImageFormat {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(ImageFormat::Jpeg),
            "png" => Ok(ImageFormat::Png),
            "webp" => Ok(ImageFormat::Webp),
            "gif" => Ok(ImageFormat::Gif),
            "bmp" => Ok(ImageFormat::Bmp),
            "tiff" | "tif" => Ok(ImageFormat::Tiff),
            "pdf" => Ok(ImageFormat::Pdf),
            other => Err(ValidationError::new(
                "format",
                format!("'{}' is not one of jpeg, png, webp, gif, bmp, tiff, pdf", other),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageConvertOptions {
    pub format: ImageFormat,
}

impl ImageConvertOptions {
    pub fn from_fields(fields: &FormFields) -> Result<Self, ValidationError> {
        Ok(Self {
            format: fields.parse_enum("format")?.unwrap_or_default(),
        })
    }
}
