use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::ImageFormat;
use stylist_contracts::photo::FALLBACK_MIME_TYPE;

use crate::error::TranscodeError;

pub const DISPLAY_SOURCE_PREFIX: &str = "data:image/png;base64,";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPhoto {
    pub data: String,
    pub mime_type: String,
}

/// Reads `path` fully and returns its raw base64 payload. Content type is not
/// checked here.
pub fn encode_file(path: &Path) -> Result<EncodedPhoto, TranscodeError> {
    let bytes = fs::read(path).map_err(|source| TranscodeError {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(encode_bytes(&bytes))
}

pub fn encode_bytes(bytes: &[u8]) -> EncodedPhoto {
    EncodedPhoto {
        data: BASE64.encode(bytes),
        mime_type: sniff_mime(bytes).to_string(),
    }
}

fn sniff_mime(bytes: &[u8]) -> &'static str {
    match image::guess_format(bytes) {
        Ok(ImageFormat::Png) => "image/png",
        Ok(ImageFormat::Jpeg) => "image/jpeg",
        Ok(ImageFormat::WebP) => "image/webp",
        Ok(ImageFormat::Gif) => "image/gif",
        _ => FALLBACK_MIME_TYPE,
    }
}

/// Drops a leading `data:<mime>;base64,` header, if any.
pub fn strip_data_url_header(value: &str) -> &str {
    let trimmed = value.trim();
    if !trimmed.starts_with("data:") {
        return trimmed;
    }
    trimmed
        .split_once(',')
        .map(|(_, payload)| payload)
        .unwrap_or("")
}

/// Idempotent: data URLs pass through, raw payloads get the PNG header.
pub fn to_display_source(value: &str) -> String {
    if value.starts_with("data:") {
        return value.to_string();
    }
    format!("{DISPLAY_SOURCE_PREFIX}{value}")
}

pub fn decode_payload(value: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(strip_data_url_header(value).as_bytes())
        .context("image payload is not valid base64")
}
