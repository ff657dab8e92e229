use thiserror::Error;

#[derive(Error, Debug)]
pub enum UpstreamError {
    /// No session could be established: missing credentials or unreachable endpoint.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The service refused the session configuration.
    #[error("upstream rejected session: {0}")]
    UpstreamRejected(String),

    /// Audio was sent after the session terminated.
    #[error("upstream session is closed")]
    UpstreamClosed,

    #[error("upstream protocol error: {0}")]
    Protocol(String),

    #[error("upstream quota exceeded")]
    QuotaExceeded,

    #[error("upstream HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl From<serde_json::Error> for UpstreamError {
    fn from(err: serde_json::Error) -> Self {
        UpstreamError::Protocol(err.to_string())
    }
}
