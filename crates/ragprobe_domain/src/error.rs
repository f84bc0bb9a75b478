use thiserror::Error;

/// Errors surfaced by the harness domain layer.
///
/// Configuration variants are the only errors that escape a module's
/// constructor; everything else is recovered at the per-case boundary and
/// folded into a failed case result.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Missing required configuration: {0}")]
    MissingConfig(String),

    #[error("Missing required environment variables: {0}")]
    MissingEnvironment(String),

    #[error("Search query is empty")]
    EmptyQuery,

    #[error("Search query exceeds {max} characters (got {len})")]
    QueryTooLong { len: usize, max: usize },

    #[error("Search timed out after {0} ms")]
    SearchTimeout(u64),

    #[error("Collection endpoint is not configured")]
    MissingCollectionEndpoint,

    #[error("Connection to search backend failed: {0}")]
    ConnectionFailed(String),

    #[error("Invalid search response: {0}")]
    InvalidResponse(String),
}

pub type Result<T> = std::result::Result<T, Error>;
