use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by storage access, format readers and the overlay engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Deployment mistake such as an unknown environment indicator
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Caller passed an invalid argument, e.g. an unknown reader format label
    #[error("{0}")]
    Usage(String),

    /// File or remote object does not exist
    #[error("File not found: {0}")]
    NotFound(String),

    /// Bytes could not be decoded in the declared format
    #[error("Unable to decode {filename}: {reason}")]
    Decode { filename: String, reason: String },

    /// Input rejected before any geometric work started
    #[error("{0}")]
    Validation(String),

    /// Geometric or coordinate computation failed
    #[error("Computation failed: {0}")]
    Computation(String),

    /// Remote object store failure other than a missing object
    #[error("Remote storage error: {0}")]
    Remote(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn decode(filename: &str, reason: impl ToString) -> Self {
        Error::Decode {
            filename: filename.to_string(),
            reason: reason.to_string(),
        }
    }

    /// True for failures a batch job should log and skip rather than abort on.
    pub fn is_computation(&self) -> bool {
        matches!(self, Error::Computation(_))
    }
}
