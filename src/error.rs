use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum HarvestError {
    #[error("invalid venue id: {0}")]
    InvalidVenueId(String),

    #[error("invalid query definition: {0}")]
    InvalidQuery(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("giving up on {url} after {attempts} attempts: {last}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        last: String,
    },

    #[error("OpenReview returned status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("venue not found upstream: {0}")]
    #[diagnostic(help("check the venue id, e.g. ICLR.cc/2024/Conference"))]
    VenueNotFound(String),

    #[error("record {0} has no pdate, cdate or mdate")]
    MissingDate(String),

    #[error("malformed record {id}: {reason}")]
    MalformedRecord { id: String, reason: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("worker panicked: {0}")]
    WorkerPanicked(String),
}

impl HarvestError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, HarvestError::VenueNotFound(_))
    }

    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            HarvestError::Transport(_)
                | HarvestError::RetriesExhausted { .. }
                | HarvestError::Status { .. }
                | HarvestError::Decode { .. }
                | HarvestError::Auth(_)
        )
    }
}
