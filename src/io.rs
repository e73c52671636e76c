use image::codecs::bmp::BmpEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, GrayImage, ImageError, RgbaImage};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::canvas::{StrokePoint, check_dimensions};
use crate::components::tools::StrokeLog;
use crate::ops::adjustments::AdjustmentParams;

/// Accepted photo extensions (lowercase).
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "tif", "webp"];

/// Largest accepted input file.
pub const MAX_FILE_SIZE: u64 = 16 * 1024 * 1024;

/// Default JPEG quality for exports.
pub const DEFAULT_QUALITY: u8 = 90;

pub fn is_image_extension(ext: &str) -> bool {
    IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str())
}

// ============================================================================
// IMAGE LOAD / EXPORT
// ============================================================================

/// Decode a photo into RGBA8, downsizing so the longest edge is at most
/// `max_dimension` (aspect ratio preserved).
pub fn load_image_sync(path: &Path, max_dimension: u32) -> Result<RgbaImage, String> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    if !is_image_extension(&ext) {
        return Err(format!(
            "unsupported file type '.{}' (allowed: {})",
            ext,
            IMAGE_EXTENSIONS.join(", ")
        ));
    }

    let meta = std::fs::metadata(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    if meta.len() > MAX_FILE_SIZE {
        return Err(format!(
            "file too large ({} bytes, max {} MB)",
            meta.len(),
            MAX_FILE_SIZE / (1024 * 1024)
        ));
    }

    let img = image::open(path).map_err(|e| e.to_string())?.to_rgba8();
    if img.width() == 0 || img.height() == 0 {
        return Err("image has zero width or height".to_string());
    }

    let (w, h) = img.dimensions();
    let fitted = fit_within(w, h, max_dimension);
    if fitted == (w, h) {
        return Ok(img);
    }

    crate::log_info!(
        "Downscaling {} from {}x{} to {}x{}",
        path.display(),
        w,
        h,
        fitted.0,
        fitted.1
    );
    Ok(image::imageops::resize(
        &img,
        fitted.0,
        fitted.1,
        image::imageops::FilterType::Triangle,
    ))
}

/// Size that fits `(w, h)` inside a `max_dimension` square, never upscaling.
pub fn fit_within(w: u32, h: u32, max_dimension: u32) -> (u32, u32) {
    if max_dimension == 0 || w.max(h) <= max_dimension {
        return (w, h);
    }
    if w >= h {
        let nh = (h as f64 * max_dimension as f64 / w as f64).round() as u32;
        (max_dimension, nh.max(1))
    } else {
        let nw = (w as f64 * max_dimension as f64 / h as f64).round() as u32;
        (nw.max(1), max_dimension)
    }
}

/// Encode `image` by the extension of `path` (PNG, JPEG, BMP, TIFF).
pub fn encode_and_write(image: &RgbaImage, path: &Path, quality: u8) -> Result<(), ImageError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("png")
        .to_lowercase();

    if ext == "tif" || ext == "tiff" {
        return image.save_with_format(path, image::ImageFormat::Tiff);
    }

    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    match ext.as_str() {
        "jpg" | "jpeg" => {
            let rgb_image = DynamicImage::ImageRgba8(image.clone()).to_rgb8();
            let mut encoder = JpegEncoder::new_with_quality(&mut writer, quality.clamp(1, 100));
            encoder.encode(
                rgb_image.as_raw(),
                rgb_image.width(),
                rgb_image.height(),
                image::ColorType::Rgb8,
            )?;
        }
        "bmp" => {
            let mut encoder = BmpEncoder::new(&mut writer);
            encoder.encode(
                image.as_raw(),
                image.width(),
                image.height(),
                image::ColorType::Rgba8,
            )?;
        }
        _ => {
            let encoder = PngEncoder::new(&mut writer);
            #[allow(deprecated)]
            encoder.encode(
                image.as_raw(),
                image.width(),
                image.height(),
                image::ColorType::Rgba8,
            )?;
        }
    }
    Ok(())
}

/// Write a binary hole mask as an 8-bit grayscale PNG.
pub fn write_hole_mask(mask: &GrayImage, path: &Path) -> Result<(), ImageError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    let encoder = PngEncoder::new(&mut writer);
    #[allow(deprecated)]
    encoder.encode(mask.as_raw(), mask.width(), mask.height(), image::ColorType::L8)?;
    Ok(())
}

// ============================================================================
// SESSION FILE FORMAT (.rfs)
// ============================================================================

const RFS_MAGIC_V1: &str = "RFS1";

/// Everything needed to rebuild a session: the original photo, the slider
/// values and the stroke log.  The mask surface itself is re-derived by replay.
#[derive(Serialize, Deserialize)]
pub(crate) struct SessionFileV1 {
    magic: String,
    pub width: u32,
    pub height: u32,
    pub original: Vec<u8>,
    pub params: AdjustmentParams,
    pub display_width: u32,
    pub display_height: u32,
    pub points: Vec<StrokePoint>,
    pub stroke_starts: Vec<usize>,
    pub brush_size: u32,
}

impl SessionFileV1 {
    pub fn new(
        original: &RgbaImage,
        params: AdjustmentParams,
        display: (u32, u32),
        strokes: &StrokeLog,
        brush_size: u32,
    ) -> Self {
        Self {
            magic: RFS_MAGIC_V1.to_string(),
            width: original.width(),
            height: original.height(),
            original: original.as_raw().clone(),
            params,
            display_width: display.0,
            display_height: display.1,
            points: strokes.points().to_vec(),
            stroke_starts: strokes.starts().to_vec(),
            brush_size,
        }
    }

    pub fn original_image(&self) -> Option<RgbaImage> {
        RgbaImage::from_raw(self.width, self.height, self.original.clone())
    }
}

/// Error type for session file operations
#[derive(Debug)]
pub enum SessionFileError {
    Io(std::io::Error),
    Serialize(String),
    InvalidFormat(String),
}

impl std::fmt::Display for SessionFileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionFileError::Io(e) => write!(f, "I/O error: {}", e),
            SessionFileError::Serialize(e) => write!(f, "Serialization error: {}", e),
            SessionFileError::InvalidFormat(e) => write!(f, "Invalid format: {}", e),
        }
    }
}

impl std::error::Error for SessionFileError {}

impl From<std::io::Error> for SessionFileError {
    fn from(e: std::io::Error) -> Self {
        SessionFileError::Io(e)
    }
}

impl From<Box<bincode::ErrorKind>> for SessionFileError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        SessionFileError::Serialize(e.to_string())
    }
}

pub(crate) fn write_session_file(file: &SessionFileV1, path: &Path) -> Result<(), SessionFileError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let writer = BufWriter::new(File::create(path)?);
    bincode::serialize_into(writer, file)?;
    Ok(())
}

pub(crate) fn read_session_file(path: &Path) -> Result<SessionFileV1, SessionFileError> {
    let raw = std::fs::read(path)?;
    if raw.len() < 12 {
        return Err(SessionFileError::InvalidFormat("File too small".into()));
    }

    // bincode writes a String as an 8-byte length prefix + UTF-8 data, so the
    // 4-char magic lives at bytes 8..12.
    let magic = std::str::from_utf8(&raw[8..12]).unwrap_or("");
    if magic != RFS_MAGIC_V1 {
        return Err(SessionFileError::InvalidFormat(format!("Unknown magic '{}'", magic)));
    }

    let file: SessionFileV1 = bincode::deserialize(&raw)?;
    check_dimensions(file.width, file.height).map_err(|e| {
        SessionFileError::InvalidFormat(format!("Bad image dimensions: {}", e))
    })?;
    check_dimensions(file.display_width, file.display_height).map_err(|e| {
        SessionFileError::InvalidFormat(format!("Bad display dimensions: {}", e))
    })?;
    let expected = file.width as usize * file.height as usize * 4;
    if file.original.len() != expected {
        return Err(SessionFileError::InvalidFormat(format!(
            "Pixel data holds {} bytes, expected {}",
            file.original.len(),
            expected
        )));
    }
    Ok(file)
}

/// Directory for autosaved sessions (inside the platform data directory).
pub fn autosave_dir() -> PathBuf {
    crate::logger::data_dir().join("RestoreFE").join("autosave")
}
