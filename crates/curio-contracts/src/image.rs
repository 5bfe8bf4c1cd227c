use std::fmt;
use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use sha2::{Digest, Sha256};

/// Assumed when a payload arrives without a media-type prefix.
pub const DEFAULT_MEDIA_TYPE: &str = "image/jpeg";

pub const RECOGNIZED_MEDIA_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/webp",
    "image/gif",
    "image/heic",
    "image/heif",
];

#[derive(Debug, thiserror::Error)]
pub enum InvalidImageError {
    #[error("image payload is empty")]
    Empty,
    #[error("image payload is not valid base64")]
    Base64(#[from] base64::DecodeError),
    #[error("malformed data URL prefix")]
    MalformedDataUrl,
    #[error("unsupported media type {0:?}")]
    UnsupportedMediaType(String),
    #[error("failed to read image {path}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to decode image: {0}")]
    Decode(String),
}

pub fn is_recognized_media_type(media_type: &str) -> bool {
    RECOGNIZED_MEDIA_TYPES.contains(&media_type)
}

/// Non-empty image bytes plus the media type they are declared as.
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedImage {
    media_type: String,
    bytes: Vec<u8>,
}

impl EncodedImage {
    pub fn new(media_type: &str, bytes: Vec<u8>) -> Result<Self, InvalidImageError> {
        if bytes.is_empty() {
            return Err(InvalidImageError::Empty);
        }
        let media_type = media_type.trim().to_ascii_lowercase();
        let media_type = if media_type == "image/jpg" {
            DEFAULT_MEDIA_TYPE.to_string()
        } else {
            media_type
        };
        if !is_recognized_media_type(&media_type) {
            return Err(InvalidImageError::UnsupportedMediaType(media_type));
        }
        Ok(Self { media_type, bytes })
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Canonical `data:<media>;base64,<payload>` form sent to the gateway.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type, BASE64.encode(&self.bytes))
    }

    pub fn sha256_hex(&self) -> String {
        hex::encode(Sha256::digest(&self.bytes))
    }
}

impl fmt::Debug for EncodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedImage")
            .field("media_type", &self.media_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}
