//! Text extraction provider abstraction.
//!
//! Defines the [`TextExtractor`] trait so the external OCR service can be
//! swapped out or mocked in tests. The only shipped backend is the Gemini
//! vision client in [`gemini`].

pub mod gemini;

use thiserror::Error;

/// An uploaded report image awaiting extraction.
pub struct ImageUpload {
    pub filename: String,
    pub data: Vec<u8>,
}

/// Failure modes of the external extraction call.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("unsupported image format: {0} (expected JPEG or PNG)")]
    UnsupportedFormat(String),
    #[error("OCR request timed out after {0}s")]
    Timeout(u64),
    #[error("network error calling OCR service: {0}")]
    Network(#[from] reqwest::Error),
    #[error("OCR service rejected credentials: {0}")]
    Auth(String),
    #[error("OCR service quota exceeded: {0}")]
    Quota(String),
    #[error("OCR service error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("OCR service returned no text")]
    EmptyResponse,
}

/// Async trait implemented by each extraction backend.
#[async_trait::async_trait]
pub trait TextExtractor: Send + Sync {
    fn name(&self) -> &str;

    /// Send the image to the external service and return the raw
    /// recognized text. One bounded blocking call, no retries.
    async fn extract(&self, upload: &ImageUpload) -> Result<String, ExtractionError>;
}

/// Sniff the upload's MIME type from magic bytes. Only JPEG and PNG are
/// accepted; anything else is an extraction failure before any network call.
pub fn detect_mime(data: &[u8]) -> Result<&'static str, ExtractionError> {
    match image::guess_format(data) {
        Ok(image::ImageFormat::Jpeg) => Ok("image/jpeg"),
        Ok(image::ImageFormat::Png) => Ok("image/png"),
        Ok(other) => Err(ExtractionError::UnsupportedFormat(format!("{:?}", other))),
        Err(_) => Err(ExtractionError::UnsupportedFormat("unknown".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_mime_png() {
        let png = [0x89u8, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0, 0];
        assert_eq!(detect_mime(&png).unwrap(), "image/png");
    }

    #[test]
    fn test_detect_mime_jpeg() {
        let jpeg = [0xffu8, 0xd8, 0xff, 0xe0, 0, 0, 0, 0];
        assert_eq!(detect_mime(&jpeg).unwrap(), "image/jpeg");
    }

    #[test]
    fn test_detect_mime_rejects_unknown() {
        let garbage = b"not an image at all";
        assert!(matches!(
            detect_mime(garbage),
            Err(ExtractionError::UnsupportedFormat(_))
        ));
    }
}
