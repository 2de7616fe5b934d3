//! Compression parameter planning
//!
//! Maps a source image's size, type and the requested quality to the
//! parameters handed to the codec. Larger sources get a lower quality cap and
//! a proportionally smaller size ceiling.

use crate::models::{CompressionParameters, MimeType, BYTES_PER_MB};

pub const FIRST_PASS_MAX_DIMENSION: u32 = 1920;
pub const SECOND_PASS_MAX_DIMENSION: u32 = 1600;
pub const MAX_CODEC_ITERATIONS: u32 = 10;

const SIZE_CEILING_CAP_MB: f64 = 1.0;
const PNG_TO_JPEG_QUALITY_CAP: f64 = 0.85;
const ESCALATION_QUALITY_FACTOR: f64 = 0.8;
const ESCALATION_QUALITY_CAP: f64 = 0.6;
const MIN_QUALITY: f64 = 0.01;

struct Tier {
    size_factor: f64,
    quality_cap: Option<f64>,
}

fn tier_for(size_mb: f64) -> Tier {
    if size_mb > 5.0 {
        Tier {
            size_factor: 0.3,
            quality_cap: Some(0.7),
        }
    } else if size_mb > 2.0 {
        Tier {
            size_factor: 0.5,
            quality_cap: Some(0.8),
        }
    } else {
        Tier {
            size_factor: 0.7,
            quality_cap: None,
        }
    }
}

fn clamp_quality(quality: f64) -> f64 {
    if quality.is_nan() {
        return 1.0;
    }
    quality.clamp(MIN_QUALITY, 1.0)
}

/// Derive first-pass parameters. Never fails; out-of-range quality is clamped.
pub fn plan(
    source_size_bytes: u64,
    mime_type: MimeType,
    requested_quality: f64,
) -> CompressionParameters {
    let size_mb = source_size_bytes as f64 / BYTES_PER_MB;
    let requested_quality = clamp_quality(requested_quality);
    let tier = tier_for(size_mb);

    let target_quality = match tier.quality_cap {
        Some(cap) => requested_quality.min(cap),
        None => requested_quality,
    };

    let mut params = CompressionParameters {
        target_size_ceiling_mb: (size_mb * tier.size_factor).min(SIZE_CEILING_CAP_MB),
        target_quality,
        initial_quality: target_quality,
        max_dimension_px: FIRST_PASS_MAX_DIMENSION,
        output_format_hint: None,
        max_iterations: MAX_CODEC_ITERATIONS,
    };

    // PNG is re-encoded as JPEG; the lower ceiling keeps banding in check.
    if mime_type == MimeType::Png {
        params.output_format_hint = Some(MimeType::Jpeg);
        params.initial_quality = params.initial_quality.min(PNG_TO_JPEG_QUALITY_CAP);
    }

    params
}

/// Tightened parameters for the second pass over the first pass's output.
pub fn escalate(params: &CompressionParameters) -> CompressionParameters {
    CompressionParameters {
        target_quality: (params.target_quality * ESCALATION_QUALITY_FACTOR)
            .min(ESCALATION_QUALITY_CAP),
        max_dimension_px: SECOND_PASS_MAX_DIMENSION,
        ..*params
    }
}
