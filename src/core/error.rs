use thiserror::Error;

use crate::ports::HttpClientError;

/// Configuration-time failures while assembling the dispatch engine.
///
/// These are fatal at startup and never produced while serving traffic.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BuildError {
    #[error("Route table has no catch-all '/' entry")]
    MissingDefaultRoute,

    #[error("Route pattern '{0}' is declared more than once")]
    DuplicatePattern(String),

    #[error("Invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Invalid proxy target '{target}': {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("Invalid header '{name}' for target '{target}'")]
    InvalidHeader { target: String, name: String },

    #[error("Could not create HTTP client: {0}")]
    Client(#[from] HttpClientError),
}

pub type BuildResult<T> = Result<T, BuildError>;
