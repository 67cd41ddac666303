//! `data:` URI helpers.
//!
//! Input media travels to the provider as base64 `data:` URIs, and some providers answer
//! with one instead of a URL.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;

use crate::error::JobError;

/// Encodes raw bytes as `data:<mime>;base64,<payload>`.
pub fn encode_data_uri(mime: &str, data: &[u8]) -> String {
    format!("data:{mime};base64,{}", STANDARD.encode(data))
}

/// A decoded `data:` URI.
#[derive(Debug, Clone, PartialEq)]
pub struct DataUri {
    pub mime: String,
    pub data: Bytes,
}

impl DataUri {
    pub fn parse(uri: &str) -> Result<Self, JobError> {
        let rest = uri
            .strip_prefix("data:")
            .ok_or_else(|| JobError::Validation("Not a data URI".into()))?;
        let (meta, payload) = rest
            .split_once(',')
            .ok_or_else(|| JobError::Validation("Malformed data URI".into()))?;

        let (mime, is_base64) = match meta.strip_suffix(";base64") {
            Some(mime) => (mime, true),
            None => (meta, false),
        };

        let data = if is_base64 {
            STANDARD
                .decode(payload.trim())
                .map_err(|e| JobError::Validation(format!("Invalid base64 payload: {e}")))?
        } else {
            payload.as_bytes().to_vec()
        };

        let mime = match mime.split(';').next() {
            Some(m) if !m.is_empty() => m.to_string(),
            _ => "application/octet-stream".to_string(),
        };

        Ok(Self {
            mime,
            data: Bytes::from(data),
        })
    }

    /// A file extension matching the mime type, if one is known.
    pub fn extension(&self) -> Option<&'static str> {
        mime_guess::get_mime_extensions_str(&self.mime).and_then(|exts| exts.first().copied())
    }
}
