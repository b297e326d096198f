use thiserror::Error;

/// Result type for resolver operations.
pub type Result<T> = std::result::Result<T, ResolverError>;

#[derive(Debug, Clone, Error)]
pub enum ResolverError {
    #[error("unknown resolver backend: {0}")]
    UnknownBackend(String),
    #[error("invalid backend configuration: {0}")]
    InvalidConfig(String),
    #[error("request failed: {0}")]
    Http(String),
    #[error("backend returned HTTP {0}")]
    Status(u16),
    #[error("unexpected response shape: {0}")]
    UnexpectedResponse(String),
    #[error("request signing failed: {0}")]
    Signing(String),
}
