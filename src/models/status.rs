//! Status tracks of an entry and their transition tables.
//!
//! Each track moves forward independently. Error states can only be left by
//! retrying the in-progress state (or by an explicit re-verification), and
//! `deleted` is reachable from everywhere so forced deletes always succeed.
//! Writing the state an entry is already in is always allowed.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Recording-source track.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EpgStatus {
    /// Discovered, never attempted. Older records store this as `-`.
    #[default]
    #[serde(alias = "-")]
    New,
    Downloading,
    Downloaded,
    DownloadingError,
    Deleted,
}

impl EpgStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Downloading => "downloading",
            Self::Downloaded => "downloaded",
            Self::DownloadingError => "downloading_error",
            Self::Deleted => "deleted",
        }
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        use EpgStatus::*;
        self == next
            || matches!(
                (self, next),
                (New, Downloading)
                    | (Downloading, Downloaded)
                    | (Downloading, DownloadingError)
                    | (DownloadingError, Downloading)
                    | (DownloadingError, Downloaded)
                    | (Downloaded, DownloadingError)
                    | (_, Deleted)
            )
    }
}

/// Object-store track.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum S3Status {
    #[default]
    #[serde(rename = "-")]
    Unset,
    Uploading,
    Uploaded,
    UploadError,
    Deleted,
}

impl S3Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unset => "-",
            Self::Uploading => "uploading",
            Self::Uploaded => "uploaded",
            Self::UploadError => "upload_error",
            Self::Deleted => "deleted",
        }
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        use S3Status::*;
        self == next
            || matches!(
                (self, next),
                (Unset, Uploading)
                    | (Uploading, Uploaded)
                    | (Uploading, UploadError)
                    | (UploadError, Uploading)
                    | (UploadError, Uploaded)
                    | (Uploaded, Uploading)
                    | (Uploaded, UploadError)
                    | (Deleted, Uploading)
                    | (_, Deleted)
            )
    }
}

/// Local copy track.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LocalStatus {
    #[default]
    #[serde(rename = "-")]
    Unset,
    Downloaded,
    Uploaded,
    Deleted,
}

impl LocalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unset => "-",
            Self::Downloaded => "downloaded",
            Self::Uploaded => "uploaded",
            Self::Deleted => "deleted",
        }
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        use LocalStatus::*;
        self == next
            || matches!(
                (self, next),
                (Unset, Downloaded) | (Unset, Uploaded) | (Downloaded, Uploaded) | (_, Deleted)
            )
    }
}

macro_rules! impl_display {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        })*
    };
}

impl_display!(EpgStatus, S3Status, LocalStatus);
