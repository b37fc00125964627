/// Convenience result type used across the relay.
pub type RelayResult<T> = Result<T, RelayError>;

/// Error taxonomy for the request-to-artifact pipeline.
///
/// Each variant carries a stable machine code and an HTTP status so the router can answer every
/// failure the same way.
#[derive(thiserror::Error, Debug)]
pub enum RelayError {
    /// Malformed request body. Caused by the caller.
    #[error("decode error: {0}")]
    Decode(String),

    /// Scratch file creation or template instantiation failed.
    #[error("render preparation error: {0}")]
    RenderPrep(String),

    /// The renderer executable could not be found. Not surfaced as an HTTP error.
    #[error("renderer not available: {0}")]
    RendererAbsent(String),

    /// The renderer exited unsuccessfully or timed out.
    #[error("render error: {0}")]
    Render(String),

    /// A delivery channel (cloud push or bus publish) failed.
    #[error("delivery error: {0}")]
    Delivery(String),

    /// Invalid startup configuration.
    #[error("config error: {0}")]
    Config(String),

    /// Wrapped lower-level error from dependencies or IO.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RelayError {
    /// Build a [`RelayError::Decode`] value.
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Build a [`RelayError::RenderPrep`] value.
    pub fn render_prep(msg: impl Into<String>) -> Self {
        Self::RenderPrep(msg.into())
    }

    /// Build a [`RelayError::RendererAbsent`] value.
    pub fn renderer_absent(msg: impl Into<String>) -> Self {
        Self::RendererAbsent(msg.into())
    }

    /// Build a [`RelayError::Render`] value.
    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render(msg.into())
    }

    /// Build a [`RelayError::Delivery`] value.
    pub fn delivery(msg: impl Into<String>) -> Self {
        Self::Delivery(msg.into())
    }

    /// Build a [`RelayError::Config`] value.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Stable error code reported in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Decode(_) => "DECODE_FAILED",
            Self::RenderPrep(_) => "RENDER_PREP_FAILED",
            Self::RendererAbsent(_) => "RENDERER_ABSENT",
            Self::Render(_) => "RENDER_FAILED",
            Self::Delivery(_) => "DELIVERY_FAILED",
            Self::Config(_) => "CONFIG_INVALID",
            Self::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status used when this error ends a request.
    pub fn status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::Decode(_) => StatusCode::BAD_REQUEST,
            Self::RendererAbsent(_) => StatusCode::OK,
            Self::Delivery(_) => StatusCode::BAD_GATEWAY,
            Self::RenderPrep(_) | Self::Render(_) | Self::Config(_) | Self::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Whether the failure was caused by the caller rather than the server.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Decode(_))
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/error.rs"]
mod tests;
