use thiserror::Error;

/// Failure of an outbound call to the OAuth issuer or the statement API.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Connection refused, DNS/TLS failure or request timeout.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// Upstream answered with a non-2xx status.
    #[error("upstream rejected request with status {status}")]
    Rejected { status: u16, body: String },

    /// 2xx response whose body is not what the protocol promises.
    #[error("malformed upstream payload: {0}")]
    MalformedPayload(String),
}

impl UpstreamError {
    /// Transport-class failures: the caller should report the service as unavailable.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::MalformedPayload(_))
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type UpstreamResult<T> = Result<T, UpstreamError>;
