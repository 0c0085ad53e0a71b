//! Domain error taxonomy.
//!
//! Every failure the pipeline can surface to a caller maps onto one of these
//! variants. None of them trigger automatic retries; the generation path is
//! the only one that degrades in-band instead of propagating (see `ask`).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Empty or missing caller input (blank question, blank text, bad
    /// chunking parameters). Surfaced directly, nothing is written.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The uploaded bytes are not a format we can extract text from.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Extraction succeeded but produced no usable text.
    #[error("no extractable content: {0}")]
    EmptyContent(String),

    /// The embedding or vector-index capability failed.
    #[error("index unavailable: {0}")]
    IndexUnavailable(String),

    /// The streaming generation call failed to start or died mid-stream.
    #[error("generation failed: {0}")]
    GenerationFailure(String),

    /// A history-store write failed. Logged by callers; partial results
    /// still reported.
    #[error("persistence failed: {0}")]
    PersistenceFailure(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Machine-readable code used by the HTTP error contract.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidInput(_) => "invalid_input",
            Error::UnsupportedFormat(_) => "unsupported_format",
            Error::EmptyContent(_) => "empty_content",
            Error::IndexUnavailable(_) => "index_unavailable",
            Error::GenerationFailure(_) => "generation_failure",
            Error::PersistenceFailure(_) => "persistence_failure",
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::PersistenceFailure(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::PersistenceFailure(e.to_string())
    }
}
