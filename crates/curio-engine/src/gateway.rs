use std::fmt;

use curio_contracts::image::EncodedImage;

use crate::stage::Stage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayErrorKind {
    /// Credential rejected by the service.
    Unauthorized,
    /// Transport failure, timeout, or non-success status.
    Unavailable,
    /// The service answered but produced no usable text.
    EmptyResponse,
}

impl GatewayErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::Unavailable => "unavailable",
            Self::EmptyResponse => "empty response",
        }
    }
}

impl fmt::Display for GatewayErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct GatewayError {
    pub kind: GatewayErrorKind,
    pub message: String,
}

impl GatewayError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            kind: GatewayErrorKind::Unauthorized,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: GatewayErrorKind::Unavailable,
            message: message.into(),
        }
    }

    pub fn empty_response(message: impl Into<String>) -> Self {
        Self {
            kind: GatewayErrorKind::EmptyResponse,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == GatewayErrorKind::Unavailable
    }
}

/// Text plus an optional image, tagged with the stage that issued it.
#[derive(Debug, Clone)]
pub struct Prompt<'a> {
    pub stage: Stage,
    pub text: String,
    pub image: Option<&'a EncodedImage>,
}

/// "Given a prompt and optionally an image, return generated text."
///
/// Implementations make exactly one attempt per call; retries belong to the
/// caller of the whole analysis.
pub trait InferenceGateway: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, prompt: &Prompt<'_>, max_output_tokens: u64) -> Result<String, GatewayError>;
}

impl<T: InferenceGateway + ?Sized> InferenceGateway for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn generate(&self, prompt: &Prompt<'_>, max_output_tokens: u64) -> Result<String, GatewayError> {
        (**self).generate(prompt, max_output_tokens)
    }
}

impl<T: InferenceGateway + ?Sized> InferenceGateway for std::sync::Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn generate(&self, prompt: &Prompt<'_>, max_output_tokens: u64) -> Result<String, GatewayError> {
        (**self).generate(prompt, max_output_tokens)
    }
}
