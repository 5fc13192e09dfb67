//! Text form of an encoded thumbnail for storage layers that only keep
//! strings: `data:<mime>;base64,<payload>`.

use base64::{engine::general_purpose::STANDARD, Engine};
use thiserror::Error;

use crate::pipeline::EncodedResult;

#[derive(Error, Debug, PartialEq)]
pub enum TransportError {
    #[error("Not a data URL")]
    MissingScheme,

    #[error("Data URL is not base64 encoded")]
    NotBase64,

    #[error("Data URL has no MIME type")]
    MissingMimeType,

    #[error("Invalid base64 payload: {0}")]
    Payload(String),
}

pub fn encode_data_url(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type, STANDARD.encode(bytes))
}

/// Split a data URL back into its MIME type and the exact original bytes.
pub fn decode_data_url(url: &str) -> Result<(String, Vec<u8>), TransportError> {
    let rest = url.strip_prefix("data:").ok_or(TransportError::MissingScheme)?;
    let (header, payload) = rest.split_once(',').ok_or(TransportError::NotBase64)?;
    let mime_type = header.strip_suffix(";base64").ok_or(TransportError::NotBase64)?;

    if mime_type.is_empty() {
        return Err(TransportError::MissingMimeType);
    }

    let bytes = STANDARD
        .decode(payload)
        .map_err(|e| TransportError::Payload(e.to_string()))?;
    Ok((mime_type.to_string(), bytes))
}

impl EncodedResult {
    pub fn to_data_url(&self) -> String {
        encode_data_url(&self.mime_type, &self.bytes)
    }
}
