use crate::config::DEFAULT_QUALITY;
use crate::fetch::Fetcher;
use crate::ProxyError;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, GenericImageView, ImageEncoder};
use std::sync::Arc;
use tokio::sync::Semaphore;

pub mod params;

/// Formats the proxy re-encodes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Jpeg,
    Png,
    Webp,
}

impl OutputFormat {
    /// Picks the output format from the upstream `Content-Type`.
    ///
    /// Plain substring matching, checked in this order: "png", "webp",
    /// then "jpg"/"jpeg". Anything else, including a missing header, falls
    /// back to JPEG. The image bytes are never sniffed here, so a PNG served
    /// as `application/octet-stream` comes out as JPEG.
    pub fn from_content_type(content_type: &str) -> Self {
        let ct = content_type.to_ascii_lowercase();
        if ct.contains("png") {
            OutputFormat::Png
        } else if ct.contains("webp") {
            OutputFormat::Webp
        } else {
            // "jpg", "jpeg" and everything unrecognised
            OutputFormat::Jpeg
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Png => "image/png",
            OutputFormat::Webp => "image/webp",
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Jpeg => write!(f, "jpeg"),
            OutputFormat::Png => write!(f, "png"),
            OutputFormat::Webp => write!(f, "webp"),
        }
    }
}

/// Decodes raw image bytes.
///
/// The decoder is chosen from the magic bytes, independently of the
/// declared content type that drives the output format.
///
/// # Errors
/// `ProxyError::DecodeError` if the format is unknown, the data is
/// corrupt, or the image has a zero dimension.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, ProxyError> {
    let guessed = image::guess_format(bytes)
        .map_err(|e| ProxyError::DecodeError(e.to_string()))?;

    let img = image::load_from_memory_with_format(bytes, guessed)
        .map_err(|e| ProxyError::DecodeError(e.to_string()))?;

    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return Err(ProxyError::DecodeError("Invalid image dimensions".into()));
    }

    Ok(img)
}

/// Cover-fit resize that never enlarges.
///
/// - Neither dimension: image returned unchanged
/// - One dimension: scaled to it, other side keeps the aspect ratio; a
///   target at or above the source size is a no-op
/// - Both: scaled so the target box is covered, then center-cropped to the
///   box. The scale is capped at 1.0, so when the source is smaller than the
///   box on some side the crop is limited to the source on that side.
///
/// Lanczos3 resampling, minimum dimension 1 pixel.
pub fn resize_image(img: DynamicImage, w: Option<u32>, h: Option<u32>) -> DynamicImage {
    let (orig_w, orig_h) = img.dimensions();

    match (w, h) {
        (None, None) => img,
        (Some(tw), None) => {
            if tw >= orig_w {
                return img;
            }
            let th = scale_side(orig_h, tw, orig_w);
            img.resize_exact(tw, th, FilterType::Lanczos3)
        }
        (None, Some(th)) => {
            if th >= orig_h {
                return img;
            }
            let tw = scale_side(orig_w, th, orig_h);
            img.resize_exact(tw, th, FilterType::Lanczos3)
        }
        (Some(tw), Some(th)) => {
            let scale = f64::max(
                tw as f64 / orig_w as f64,
                th as f64 / orig_h as f64,
            )
            .min(1.0);

            let (scaled_w, scaled_h, scaled) = if scale < 1.0 {
                let sw = ((orig_w as f64 * scale).round() as u32).max(1);
                let sh = ((orig_h as f64 * scale).round() as u32).max(1);
                (sw, sh, img.resize_exact(sw, sh, FilterType::Lanczos3))
            } else {
                (orig_w, orig_h, img)
            };

            let crop_w = tw.min(scaled_w);
            let crop_h = th.min(scaled_h);
            if crop_w == scaled_w && crop_h == scaled_h {
                return scaled;
            }
            let x = (scaled_w - crop_w) / 2;
            let y = (scaled_h - crop_h) / 2;
            scaled.crop_imm(x, y, crop_w, crop_h)
        }
    }
}

fn scale_side(side: u32, target: u32, reference: u32) -> u32 {
    ((side as f64 * target as f64 / reference as f64).round() as u32).max(1)
}

/// PNG is lossless, so "quality" selects compression effort instead:
/// 1-33 fast, 34-66 default, 67-100 best. The default quality of 80 lands
/// on best.
pub fn png_compression(quality: u8) -> CompressionType {
    match quality {
        0..=33 => CompressionType::Fast,
        34..=66 => CompressionType::Default,
        _ => CompressionType::Best,
    }
}

/// Encodes an image with quality control.
///
/// - **JPEG**: RGB, lossy at `quality`
/// - **PNG**: lossless, alpha kept; `quality` maps to compression effort
///   via [`png_compression`]
/// - **WebP**: lossy via libwebp at `quality`, alpha kept
///
/// Quality is clamped to [1, 100].
///
/// # Errors
/// `ProxyError::EncodeError` on encoder failures.
pub fn encode_image(
    img: &DynamicImage,
    fmt: OutputFormat,
    quality: u8,
) -> Result<Vec<u8>, ProxyError> {
    let q = quality.clamp(1, 100);
    let mut out = Vec::new();

    match fmt {
        OutputFormat::Jpeg => {
            let rgb = img.to_rgb8();
            let (w, h) = rgb.dimensions();
            let enc = JpegEncoder::new_with_quality(&mut out, q);
            enc.write_image(rgb.as_raw(), w, h, ExtendedColorType::Rgb8)
                .map_err(|e| ProxyError::EncodeError(e.to_string()))?;
        }
        OutputFormat::Png => {
            let enc = PngEncoder::new_with_quality(&mut out, png_compression(q), PngFilter::Adaptive);
            let written = if img.color().has_alpha() {
                let rgba = img.to_rgba8();
                let (w, h) = rgba.dimensions();
                enc.write_image(rgba.as_raw(), w, h, ExtendedColorType::Rgba8)
            } else {
                let rgb = img.to_rgb8();
                let (w, h) = rgb.dimensions();
                enc.write_image(rgb.as_raw(), w, h, ExtendedColorType::Rgb8)
            };
            written.map_err(|e| ProxyError::EncodeError(e.to_string()))?;
        }
        OutputFormat::Webp => {
            let encoded = if img.color().has_alpha() {
                let rgba = img.to_rgba8();
                let (w, h) = rgba.dimensions();
                webp::Encoder::from_rgba(rgba.as_raw(), w, h).encode_simple(false, q as f32)
            } else {
                let rgb = img.to_rgb8();
                let (w, h) = rgb.dimensions();
                webp::Encoder::from_rgb(rgb.as_raw(), w, h).encode_simple(false, q as f32)
            }
            .map_err(|e| ProxyError::EncodeError(format!("{:?}", e)))?;
            out.extend_from_slice(&encoded);
        }
    }

    Ok(out)
}

/// Result of a successful transcode.
#[derive(Debug, Clone)]
pub struct Transcoded {
    pub bytes: Bytes,
    pub format: OutputFormat,
}

impl Transcoded {
    pub fn content_type(&self) -> &'static str {
        self.format.content_type()
    }
}

/// Fetch, decode, resize and re-encode one source image.
///
/// Codec work runs on the blocking pool and is capped by a semaphore, so
/// at most `max_concurrent` images are being decoded or encoded at once.
/// Fetches are not capped.
#[derive(Clone)]
pub struct Transcoder {
    fetcher: Arc<dyn Fetcher>,
    permits: Arc<Semaphore>,
}

impl Transcoder {
    pub fn new(fetcher: Arc<dyn Fetcher>, max_concurrent: usize) -> Self {
        Self {
            fetcher,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Errors are never retried and no partial output is produced.
    pub async fn transcode(
        &self,
        url: &str,
        width: Option<u32>,
        height: Option<u32>,
        quality: Option<u8>,
    ) -> Result<Transcoded, ProxyError> {
        let source = self.fetcher.fetch(url).await?;
        let format = OutputFormat::from_content_type(&source.content_type);
        let quality = quality.unwrap_or(DEFAULT_QUALITY);

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| ProxyError::InternalError(e.to_string()))?;

        let bytes = source.bytes;
        let encoded = tokio::task::spawn_blocking(move || {
            let img = decode_image(&bytes)?;
            let resized = resize_image(img, width, height);
            encode_image(&resized, format, quality)
        })
        .await
        .map_err(|e| ProxyError::InternalError(format!("transcode task failed: {}", e)))??;

        tracing::debug!(
            "Transcoded {} to {} ({} bytes, w={:?}, h={:?}, q={})",
            url, format, encoded.len(), width, height, quality
        );

        Ok(Transcoded { bytes: Bytes::from(encoded), format })
    }
}
