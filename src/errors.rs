use thiserror::Error;

use crate::codec::Codec;

#[derive(Error, Debug)]
pub enum ThumbnailError {
    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("No codec could encode the image (tried: {tried})")]
    EncodingUnavailable { tried: String },

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("File too large: maximum size is {max_size} bytes")]
    FileTooLarge { max_size: usize },
}

impl ThumbnailError {
    pub fn encoding_unavailable(tried: &[Codec]) -> Self {
        let tried = tried
            .iter()
            .map(|codec| codec.name())
            .collect::<Vec<_>>()
            .join(", ");
        ThumbnailError::EncodingUnavailable { tried }
    }
}

impl From<image::ImageError> for ThumbnailError {
    fn from(err: image::ImageError) -> Self {
        ThumbnailError::Decode(err.to_string())
    }
}

/// Failure of a single codec. Never leaves the pipeline: the orchestrator
/// answers it by moving on to the next codec in the chain.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("{0} support is not compiled into this build")]
    Disabled(Codec),

    #[error("{codec} encoder failed: {message}")]
    Encoder { codec: Codec, message: String },

    #[error("{0} encoder produced no output")]
    Empty(Codec),

    #[error("{0} encoder panicked")]
    Panicked(Codec),
}

impl CodecError {
    pub fn encoder(codec: Codec, message: impl Into<String>) -> Self {
        CodecError::Encoder {
            codec,
            message: message.into(),
        }
    }
}

impl actix_web::ResponseError for ThumbnailError {
    fn error_response(&self) -> actix_web::HttpResponse {
        use actix_web::HttpResponse;

        match self {
            ThumbnailError::Decode(_) => {
                HttpResponse::UnsupportedMediaType().json(serde_json::json!({
                    "error": "decode_error",
                    "message": self.to_string()
                }))
            }
            ThumbnailError::InvalidParameters(_) => {
                HttpResponse::BadRequest().json(serde_json::json!({
                    "error": "invalid_parameters",
                    "message": self.to_string()
                }))
            }
            ThumbnailError::FileTooLarge { max_size } => {
                HttpResponse::PayloadTooLarge().json(serde_json::json!({
                    "error": "file_too_large",
                    "message": self.to_string(),
                    "max_size_bytes": max_size
                }))
            }
            ThumbnailError::EncodingUnavailable { .. } => {
                HttpResponse::InternalServerError().json(serde_json::json!({
                    "error": "encoding_unavailable",
                    "message": self.to_string()
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::ResponseError;

    #[test]
    fn test_error_status_codes() {
        let cases = [
            (ThumbnailError::Decode("bad header".to_string()), 415),
            (ThumbnailError::InvalidParameters("max_dimension".to_string()), 400),
            (ThumbnailError::FileTooLarge { max_size: 1024 }, 413),
            (ThumbnailError::encoding_unavailable(&Codec::PRIORITY), 500),
        ];

        for (err, status) in cases {
            assert_eq!(err.error_response().status().as_u16(), status, "{}", err);
        }
    }

    #[test]
    fn test_encoding_unavailable_lists_chain() {
        let err = ThumbnailError::encoding_unavailable(&[Codec::WebP, Codec::Jpeg]);
        assert_eq!(err.to_string(), "No codec could encode the image (tried: webp, jpeg)");
    }

    #[test]
    fn test_image_errors_are_decode_errors() {
        let err: ThumbnailError = image::load_from_memory(b"not an image").unwrap_err().into();
        assert!(matches!(err, ThumbnailError::Decode(_)));
    }
}
