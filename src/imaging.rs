use base64::{engine::general_purpose::STANDARD, Engine};
use image::{
    codecs::jpeg::JpegEncoder, imageops::FilterType, metadata::Orientation, DynamicImage,
    GenericImageView, ImageDecoder, ImageReader, ImageResult,
};
use std::io::Cursor;
use tracing::warn;

use crate::config::{CanvasCfg, OutputCfg, PreviewCfg};
use crate::error::{ProcessError, UploadError};

pub const JPEG_DATA_URL_PREFIX: &str = "data:image/jpeg;base64,";

/// Decode an upload and apply the EXIF orientation it carries, if any.
pub fn decode_oriented(bytes: &[u8]) -> ImageResult<DynamicImage> {
    let mut decoder = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .into_decoder()?;
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    let mut img = DynamicImage::from_decoder(decoder)?;
    img.apply_orientation(orientation);
    Ok(img)
}

/// 8-bit RGB and 8-bit grayscale pass through, anything else becomes RGB.
pub fn normalize_mode(img: DynamicImage) -> DynamicImage {
    match img {
        DynamicImage::ImageRgb8(_) | DynamicImage::ImageLuma8(_) => img,
        other => DynamicImage::ImageRgb8(other.to_rgb8()),
    }
}

/// Alpha is dropped, not composited.
pub fn force_rgb(img: DynamicImage) -> DynamicImage {
    match img {
        DynamicImage::ImageRgb8(_) => img,
        other => DynamicImage::ImageRgb8(other.to_rgb8()),
    }
}

pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> ImageResult<Vec<u8>> {
    let mut buf = Vec::new();
    img.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality))?;
    Ok(buf)
}

/// Strips a leading `data:image/<anything>;base64,` header. The match is
/// greedy, so it runs to the last `;base64,` marker.
pub fn strip_data_url_prefix(s: &str) -> &str {
    const MARKER: &str = ";base64,";
    let Some(rest) = s.strip_prefix("data:image/") else { return s };
    match rest.rfind(MARKER) {
        Some(i) if i > 0 => &rest[i + MARKER.len()..],
        _ => s,
    }
}

pub fn decode_data_url(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let payload = strip_data_url_prefix(s);
    if payload.bytes().any(|b| b.is_ascii_whitespace()) {
        let compact: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        return STANDARD.decode(compact);
    }
    STANDARD.decode(payload)
}

pub fn to_data_url(jpeg: &[u8]) -> String {
    format!("{JPEG_DATA_URL_PREFIX}{}", STANDARD.encode(jpeg))
}

#[derive(Debug)]
pub struct Preview {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Downscaled JPEG shown to the client before it crops.
#[derive(Debug, Clone)]
pub struct PreviewMaker { pub max_side: u32, pub quality: u8 }

impl From<&PreviewCfg> for PreviewMaker {
    fn from(cfg: &PreviewCfg) -> Self { Self { max_side: cfg.max_side, quality: cfg.jpeg_quality } }
}

impl PreviewMaker {
    pub fn preview(&self, img: &DynamicImage) -> ImageResult<Preview> {
        let (w, h) = img.dimensions();
        let scaled = if w > self.max_side || h > self.max_side {
            img.resize(self.max_side, self.max_side, FilterType::Lanczos3)
        } else {
            img.clone()
        };
        let rgb = force_rgb(scaled);
        let jpeg = encode_jpeg(&rgb, self.quality)?;
        Ok(Preview { jpeg, width: rgb.width(), height: rgb.height() })
    }

    pub fn preview_upload(&self, bytes: &[u8]) -> Result<Preview, UploadError> {
        let img = decode_oriented(bytes).map_err(UploadError::Decode)?;
        let img = normalize_mode(img);
        self.preview(&img).map_err(UploadError::Encode)
    }
}

/// Produces the final fixed-size JPEG from client-cropped image data.
#[derive(Debug, Clone)]
pub struct CanvasRenderer { pub quality: u8, pub max_side: u32 }

impl From<&OutputCfg> for CanvasRenderer {
    fn from(cfg: &OutputCfg) -> Self { Self { quality: cfg.jpeg_quality, max_side: cfg.max_side } }
}

impl CanvasRenderer {
    pub fn check_canvas(&self, canvas: CanvasCfg) -> Result<(), ProcessError> {
        let CanvasCfg { width, height } = canvas;
        let ok = |side: u32| (1..=self.max_side).contains(&side);
        if ok(width) && ok(height) {
            Ok(())
        } else {
            Err(ProcessError::Canvas { width, height, max: self.max_side })
        }
    }

    pub fn render_data_url(&self, data_url: &str, canvas: CanvasCfg) -> Result<Vec<u8>, ProcessError> {
        self.check_canvas(canvas)?;
        let bytes = decode_data_url(data_url)?;
        self.render(&bytes, canvas)
    }

    pub fn render(&self, bytes: &[u8], canvas: CanvasCfg) -> Result<Vec<u8>, ProcessError> {
        self.check_canvas(canvas)?;
        let img = image::load_from_memory(bytes).map_err(ProcessError::Decode)?;
        let (w, h) = img.dimensions();
        let img = if (w, h) != (canvas.width, canvas.height) {
            warn!(
                from_w = w, from_h = h, to_w = canvas.width, to_h = canvas.height,
                "received image size differs from canvas, resizing"
            );
            img.resize_exact(canvas.width, canvas.height, FilterType::Lanczos3)
        } else {
            img
        };
        encode_jpeg(&force_rgb(img), self.quality).map_err(ProcessError::Encode)
    }
}
