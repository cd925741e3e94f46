use std::path::PathBuf;
use thiserror::Error;

/// Failures scoped to a single annotation folder.
///
/// These are routed through the `--on-record-error` policy: either the run
/// stops on the first one, or the record is dropped and listed in the report.
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("failed to parse annotation details {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
    #[error("annotation {path} has no `{field}`")]
    MissingData { path: PathBuf, field: &'static str },
    #[error("annotation {path} has a screenshot but no boundingBox")]
    MissingBoundingBox { path: PathBuf },
    #[error("failed to list annotations in {path}: {reason}")]
    Listing { path: PathBuf, reason: String },
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("invalid Google Drive link format: {0}")]
pub struct LinkFormatError(pub String);

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },
    #[error("invalid response from {url}: {reason}")]
    Decode { url: String, reason: String },
    #[error("invalid API base URL: {0}")]
    InvalidUrl(String),
    #[error("response from {url} is missing `{field}`")]
    MissingField { url: String, field: &'static str },
    #[error("failed to read {path}: {source}")]
    LocalFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
