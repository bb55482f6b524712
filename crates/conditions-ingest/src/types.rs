use thiserror::Error;

/// Failure of a single source call. Callers in this crate never propagate it
/// past the point that caused it.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("source responded with status {0}")]
    Status(u16),
    #[error("response is missing `{0}`")]
    MissingMetric(&'static str),
    #[error("source did not answer in time")]
    Timeout,
    #[error("malformed response: {0}")]
    Decode(String),
}
