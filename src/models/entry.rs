//! A tracked recording and the descriptors the recording source reports.

use crate::{
    errors::{ArchiveError, ArchiveResult},
    models::status::{EpgStatus, LocalStatus, S3Status},
};
use chrono::{DateTime, Utc};
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Version written into every canonical record. Records without it, or with
/// an older value, must go through `migrate` before the engine touches them.
pub const SCHEMA_VERSION: u32 = 2;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// One recording and its download, upload, and local-copy state.
///
/// The whole struct is written back to the store after every mutation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Entry {
    pub schema_version: u32,

    /// Identifier assigned by EPGStation.
    pub id: i64,

    /// Store key, `{prefix}_{id}`. Never recomputed once stored.
    pub key: String,

    /// URL-decoded base file name, relative to the working directory.
    pub filename: String,

    /// Byte length EPGStation reported at discovery time.
    pub filesize: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub source_file_url: String,

    /// Recording info URL, also the target of remote deletes.
    pub source_index_url: String,

    /// Object key, set when the first upload starts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_key: Option<String>,

    #[serde(default)]
    pub epg_status: EpgStatus,

    #[serde(default)]
    pub s3_status: S3Status,

    #[serde(default)]
    pub local_status: LocalStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloaded_on: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_on: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cdn_url: Option<String>,

    /// Every other field EPGStation reported (channel, times, description...).
    #[serde(flatten)]
    pub remote: Map<String, Value>,
}

impl Entry {
    /// Build a freshly discovered entry in the `new` state.
    pub fn discovered(
        key: String,
        item: RecordedItem,
        source_file_url: String,
        source_index_url: String,
    ) -> Option<Self> {
        let filename = sanitize_filename(item.filename.as_deref()?);
        if filename.is_empty() {
            return None;
        }
        Some(Self {
            schema_version: SCHEMA_VERSION,
            id: item.id,
            key,
            filename,
            filesize: item.filesize.unwrap_or_default(),
            name: item.name,
            source_file_url,
            source_index_url,
            storage_key: None,
            epg_status: EpgStatus::New,
            s3_status: S3Status::Unset,
            local_status: LocalStatus::Unset,
            downloaded_on: None,
            uploaded_on: None,
            origin_url: None,
            cdn_url: None,
            remote: item.extra,
        })
    }

    pub fn set_epg_status(&mut self, next: EpgStatus) -> ArchiveResult<()> {
        if !self.epg_status.can_transition_to(next) {
            return Err(self.invalid("epg", self.epg_status.as_str(), next.as_str()));
        }
        self.epg_status = next;
        Ok(())
    }

    pub fn set_s3_status(&mut self, next: S3Status) -> ArchiveResult<()> {
        if !self.s3_status.can_transition_to(next) {
            return Err(self.invalid("s3", self.s3_status.as_str(), next.as_str()));
        }
        self.s3_status = next;
        Ok(())
    }

    pub fn set_local_status(&mut self, next: LocalStatus) -> ArchiveResult<()> {
        if !self.local_status.can_transition_to(next) {
            return Err(self.invalid("local", self.local_status.as_str(), next.as_str()));
        }
        self.local_status = next;
        Ok(())
    }

    fn invalid(&self, track: &'static str, from: &str, to: &str) -> ArchiveError {
        ArchiveError::InvalidTransition {
            key: self.key.clone(),
            track,
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn local_path(&self, directory: &Path) -> PathBuf {
        directory.join(&self.filename)
    }

    /// A verified copy should be on disk: it was downloaded (or uploaded
    /// from here) and not deleted since.
    pub fn has_local_copy(&self) -> bool {
        self.local_status != LocalStatus::Deleted
            && (self.epg_status == EpgStatus::Downloaded
                || matches!(
                    self.local_status,
                    LocalStatus::Downloaded | LocalStatus::Uploaded
                ))
    }

    pub fn sidecar_filename(&self, kind: SidecarKind) -> String {
        format!("{}{}", self.filename, kind.suffix())
    }

    pub fn size_gb(&self) -> f64 {
        self.filesize as f64 / GIB
    }

    /// Display title, falling back to the file name.
    pub fn title(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.filename)
    }
}

/// Store key for a recording id.
pub fn entry_key(prefix: &str, id: i64) -> String {
    format!("{}_{}", prefix, id)
}

/// Decode an EPGStation file name (`+` and `%xx` escapes) and drop any
/// directory components so it is safe to use as a local path.
pub fn sanitize_filename(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    let decoded = percent_decode_str(&spaced).decode_utf8_lossy();
    let base = decoded.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    match base {
        "." | ".." => String::new(),
        other => other.to_string(),
    }
}

/// Auxiliary files uploaded next to a recording.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SidecarKind {
    /// Snapshot of the entry taken at download time.
    Metadata,
    /// CRC note plus the EPGStation log.
    Log,
    MediaInfo,
}

impl SidecarKind {
    pub const ALL: [SidecarKind; 3] = [Self::Metadata, Self::Log, Self::MediaInfo];

    pub fn suffix(self) -> &'static str {
        match self {
            Self::Metadata => ".json",
            Self::Log => ".log",
            Self::MediaInfo => ".mediainfo.json",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Metadata | Self::MediaInfo => "application/json",
            Self::Log => "text/plain; charset=utf-8",
        }
    }
}

/// One item of `GET /api/recorded/`.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct RecordedItem {
    pub id: i64,

    /// URL-encoded file name; absent while EPGStation has no file yet.
    #[serde(default)]
    pub filename: Option<String>,

    /// True while the recording is still in progress.
    #[serde(default)]
    pub recording: bool,

    #[serde(default)]
    pub filesize: Option<u64>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Deserialize, Debug)]
pub struct RecordedList {
    #[serde(default)]
    pub recorded: Vec<RecordedItem>,
}

/// `GET /api/storage`.
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct FreeSpace {
    pub free: u64,
    pub total: u64,
}

impl FreeSpace {
    pub fn summary(&self) -> String {
        let free_gb = self.free as f64 / GIB;
        let total_gb = self.total as f64 / GIB;
        let percent = if self.total == 0 {
            0.0
        } else {
            100.0 * self.free as f64 / self.total as f64
        };
        format!("Free: {percent:.2}%  {free_gb:.2}/{total_gb:.2} GB")
    }
}
