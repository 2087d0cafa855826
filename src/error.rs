/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum TetherError {
    /// Network or request execution error from the last transport attempt.
    #[error("failed to do request: {0}")]
    Transport(#[source] TransportError),
    /// The admission gate was cancelled before a token was granted.
    #[error("rate limiter wait failed: {0}")]
    RateLimit(#[source] RateLimitError),
    /// URL passed to a per-verb helper could not be parsed.
    #[error("invalid url: {0}")]
    InvalidUrl(#[source] url::ParseError),
    /// Header name or value configured on the builder is not valid HTTP.
    #[error("invalid header: {0}")]
    InvalidHeader(String),
    /// Builder option outside its accepted range.
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("response is nil")]
    MissingResponse,
    /// Reading the response body failed.
    #[error("failed to read response body: {0}")]
    Body(#[source] reqwest::Error),
    /// Response body is not valid JSON for the requested type.
    #[error("failed to decode response: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Error returned by a [`RateLimiter`](crate::RateLimiter) wait.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    #[error("wait cancelled")]
    Cancelled,
}

/// Failure reported by a [`Transport`](crate::Transport) for one attempt.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Error from the `reqwest` client.
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    /// Error raised by a custom transport.
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl TransportError {
    /// Wraps an arbitrary error from a custom transport.
    pub fn other<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Other(err.into())
    }

    /// The underlying `reqwest` error, if the failure came from `reqwest`.
    pub fn as_reqwest(&self) -> Option<&reqwest::Error> {
        match self {
            Self::Http(err) => Some(err),
            Self::Other(_) => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.as_reqwest().is_some_and(reqwest::Error::is_timeout)
    }

    pub fn is_connect(&self) -> bool {
        self.as_reqwest().is_some_and(reqwest::Error::is_connect)
    }
}
