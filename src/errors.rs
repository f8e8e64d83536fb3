//! Error taxonomy for the archiving pipeline.
//!
//! Library code returns [`ArchiveResult`]; command handlers wrap these in
//! `anyhow` with the entry id and action that failed.

use std::{io, path::PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("recording source unavailable: {0}")]
    RemoteUnavailable(String),
    #[error("download of `{key}` failed: {reason}")]
    Download { key: String, reason: String },
    #[error("size of `{key}` does not match: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        key: String,
        expected: u64,
        actual: u64,
    },
    #[error("crc32 of `{key}` not found in the recording log")]
    ChecksumMismatch { key: String },
    #[error("upload of `{key}` failed: {reason}")]
    Upload { key: String, reason: String },
    #[error("{key}: E-Tag does not match")]
    EtagMismatch { key: String },
    #[error("remote delete of `{key}` failed: {reason}")]
    RemoteDelete { key: String, reason: String },
    #[error("storage delete of `{key}` failed: {reason}")]
    Delete { key: String, reason: String },
    #[error("entry `{0}` not found")]
    NotFound(String),
    #[error("entry `{key}`: {track} status cannot go from `{from}` to `{to}`")]
    InvalidTransition {
        key: String,
        track: &'static str,
        from: String,
        to: String,
    },
    #[error("entry `{0}` has no verified local copy")]
    NoLocalCopy(String),
    #[error("entry `{0}` is not uploaded")]
    NotArchived(String),
    #[error("entry `{0}` uses a legacy record format; run `migrate` first")]
    LegacyRecord(String),
    #[error("mediainfo failed: {0}")]
    MediaInfo(String),
    #[error("another invocation holds the lock at {}", .0.display())]
    Locked(PathBuf),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type ArchiveResult<T> = Result<T, ArchiveError>;

impl ArchiveError {
    /// Shortcut for transport or protocol failures talking to EPGStation.
    pub fn remote(err: impl std::fmt::Display) -> Self {
        Self::RemoteUnavailable(err.to_string())
    }

    /// True for the integrity failures raised after bytes were transferred.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            Self::SizeMismatch { .. } | Self::ChecksumMismatch { .. } | Self::EtagMismatch { .. }
        )
    }
}
