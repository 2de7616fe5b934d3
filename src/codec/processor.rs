use super::CodecService;
use crate::mime::detect_image_mime;
use crate::models::{CompressionParameters, MimeType};
use crate::{Error, Result};
use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilterType, PngEncoder};
use image::imageops::FilterType;
use image::{DynamicImage, ImageError, Rgb, RgbImage};

const QUALITY_STEP: f64 = 0.9;
const MIN_QUALITY: f64 = 0.05;

/// Codec backed by the `image` crate: downsizes, then re-encodes as JPEG or PNG.
#[derive(Debug, Clone, Default)]
pub struct ImageCodec;

impl ImageCodec {
    pub fn new() -> Self {
        Self
    }

    fn compress_sync(
        data: Vec<u8>,
        mime_type: MimeType,
        params: CompressionParameters,
    ) -> Result<Vec<u8>> {
        // Trust the bytes over the declared type when they disagree.
        let input_format = detect_image_mime(&data).unwrap_or(mime_type);
        let img = image::load_from_memory_with_format(&data, input_format.image_format())
            .map_err(map_image_error)?;

        let img = fit_within(img, params.max_dimension_px);

        match params.output_format(input_format) {
            MimeType::Jpeg => encode_jpeg_within_ceiling(&flatten_alpha(&img), &params),
            MimeType::Png => encode_png(&img),
        }
    }
}

fn map_image_error(e: ImageError) -> Error {
    match e {
        ImageError::Unsupported(_) => Error::UnsupportedFormat(e.to_string()),
        other => Error::Image(other),
    }
}

/// Shrink so the longest side is at most `max_dimension`. Never upscales.
fn fit_within(img: DynamicImage, max_dimension: u32) -> DynamicImage {
    let max_dimension = max_dimension.max(1);
    if img.width() <= max_dimension && img.height() <= max_dimension {
        return img;
    }
    img.resize(max_dimension, max_dimension, FilterType::Lanczos3)
}

/// JPEG has no alpha channel; composite transparent pixels over white.
fn flatten_alpha(img: &DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.to_rgb8();
    }

    let rgba = img.to_rgba8();
    let mut flattened = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        let alpha = a as u16;
        let blend = |c: u8| ((c as u16 * alpha + 255 * (255 - alpha)) / 255) as u8;
        flattened.put_pixel(x, y, Rgb([blend(r), blend(g), blend(b)]));
    }
    flattened
}

fn jpeg_quality(quality: f64) -> u8 {
    (quality * 100.0).round().clamp(1.0, 100.0) as u8
}

fn encode_jpeg(img: &RgbImage, quality: f64) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut output, jpeg_quality(quality));
    encoder.encode_image(img)?;
    Ok(output)
}

/// Encode, then step quality down until the output fits the size ceiling or
/// the iteration budget runs out. Keeps the smallest encoding seen.
fn encode_jpeg_within_ceiling(img: &RgbImage, params: &CompressionParameters) -> Result<Vec<u8>> {
    let ceiling = params.target_size_ceiling_bytes();
    let mut quality = params.starting_quality().clamp(MIN_QUALITY, 1.0);
    let mut best = encode_jpeg(img, quality)?;

    for iteration in 1..params.max_iterations.max(1) {
        if best.len() as u64 <= ceiling || quality <= MIN_QUALITY {
            break;
        }
        quality = (quality * QUALITY_STEP).max(MIN_QUALITY);
        let candidate = encode_jpeg(img, quality)?;
        tracing::trace!(
            "JPEG pass {}: quality {} -> {} bytes",
            iteration + 1,
            jpeg_quality(quality),
            candidate.len()
        );
        if candidate.len() < best.len() {
            best = candidate;
        }
    }

    Ok(best)
}

fn encode_png(img: &DynamicImage) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    let encoder = PngEncoder::new_with_quality(
        &mut output,
        CompressionType::Best,
        PngFilterType::Adaptive,
    );
    img.write_with_encoder(encoder)?;
    Ok(output)
}

#[async_trait]
impl CodecService for ImageCodec {
    async fn compress(
        &self,
        image: &[u8],
        mime_type: MimeType,
        params: &CompressionParameters,
    ) -> Result<Vec<u8>> {
        tokio::task::spawn_blocking({
            let data = image.to_vec();
            let params = *params;
            move || Self::compress_sync(data, mime_type, params)
        })
        .await
        .map_err(|e| Error::Codec(format!("Compression task join error: {}", e)))?
    }

    async fn ready(&self) -> Result<()> {
        let probe = RgbImage::from_pixel(1, 1, Rgb([255, 255, 255]));
        encode_jpeg(&probe, 0.8)
            .and_then(|_| encode_png(&DynamicImage::ImageRgb8(probe)))
            .map(|_| ())
            .map_err(|e| Error::CodecUnavailable(e.to_string()))
    }
}
