/// Convenience result type used across statcast.
pub type StatcastResult<T> = Result<T, StatcastError>;

/// Error taxonomy shared by configuration, fetching, rendering and encoding.
#[derive(thiserror::Error, Debug)]
pub enum StatcastError {
    /// Invalid configuration or caller-provided data.
    #[error("validation error: {0}")]
    Validation(String),

    /// A prerequisite for streaming is missing: audio track, ffmpeg, first encoder launch.
    #[error("startup error: {0}")]
    Startup(String),

    /// Transport or HTTP status failure talking to the counter API.
    #[error("fetch error: {0}")]
    Fetch(String),

    /// A request exceeded the per-request timeout, in milliseconds.
    #[error("fetch timed out after {0} ms")]
    Timeout(u64),

    /// The counter API answered with an unexpected document shape.
    #[error("malformed document: {0}")]
    Malformed(String),

    /// Image bytes could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// The encoder failed while streaming.
    #[error("encoder error: {0}")]
    Encoder(String),

    /// Wrapped lower-level error from dependencies or IO.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StatcastError {
    /// Build a [`StatcastError::Validation`] value.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Build a [`StatcastError::Startup`] value.
    pub fn startup(msg: impl Into<String>) -> Self {
        Self::Startup(msg.into())
    }

    /// Build a [`StatcastError::Fetch`] value.
    pub fn fetch(msg: impl Into<String>) -> Self {
        Self::Fetch(msg.into())
    }

    /// Build a [`StatcastError::Malformed`] value.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    /// Build a [`StatcastError::Decode`] value.
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Build a [`StatcastError::Encoder`] value.
    pub fn encoder(msg: impl Into<String>) -> Self {
        Self::Encoder(msg.into())
    }

    /// Errors a single fetch attempt is expected to end with now and then. Anything else
    /// points at a bug or a broken environment.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Fetch(_) | Self::Timeout(_) | Self::Malformed(_) | Self::Decode(_)
        )
    }
}

impl From<reqwest::Error> for StatcastError {
    fn from(e: reqwest::Error) -> Self {
        Self::Fetch(e.to_string())
    }
}
