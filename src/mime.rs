//! Magic-byte sniffing for the formats the compressor accepts.

use crate::models::MimeType;

pub fn detect_image_mime(bytes: &[u8]) -> Option<MimeType> {
    match bytes {
        [0xFF, 0xD8, 0xFF, ..] => Some(MimeType::Jpeg),
        [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, ..] => Some(MimeType::Png),
        _ => {
            tracing::debug!(
                "Unrecognized image signature (first 4 bytes: {:02X?})",
                &bytes[..bytes.len().min(4)]
            );
            None
        }
    }
}
