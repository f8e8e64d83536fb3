//! Upgrade of records written by older releases into the current schema.
//!
//! Older records differ in three ways: field names (`db_key`/`epg_key`,
//! `epg_file_url`, `epg_index_url`, `s3_key`, `web_origin_url`,
//! `web_cdn_url`), a combined `uploaded` value in `epg_status` that predates
//! the separate storage track, and missing derived fields. [`upgrade`] maps
//! any of these onto the canonical [`Entry`]; canonical records pass through
//! untouched, so upgrading twice yields the same record.

use crate::{
    errors::{ArchiveError, ArchiveResult},
    models::entry::{Entry, SCHEMA_VERSION},
    services::{
        entry_store::decode_entry, object_storage::ObjectStorage,
        recording_source::RecordingSource,
    },
};
use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde_json::{Map, Value};
use tracing::warn;

/// Fields that only ever held values derivable from other fields.
const DROPPED_FIELDS: [&str; 3] = ["db_key", "epg_key", "json_file"];

#[derive(Debug, Default)]
pub struct MigrationSummary {
    pub upgraded: Vec<String>,
    pub unchanged: usize,
    pub failed: Vec<(String, ArchiveError)>,
}

/// Convert the record stored under `key` into a canonical entry.
pub fn upgrade(
    key: &str,
    record: Value,
    source: &dyn RecordingSource,
    storage: &dyn ObjectStorage,
) -> ArchiveResult<Entry> {
    if record.get("schema_version").and_then(Value::as_u64) == Some(u64::from(SCHEMA_VERSION)) {
        return decode_entry(key, record);
    }

    let Value::Object(mut fields) = record else {
        return Err(malformed(key, "record is not an object"));
    };
    let id = fields
        .get("id")
        .and_then(Value::as_i64)
        .ok_or_else(|| malformed(key, "record has no integer id"))?;

    for name in DROPPED_FIELDS {
        fields.remove(name);
    }
    fields.insert("schema_version".into(), SCHEMA_VERSION.into());
    fields.insert("key".into(), key.into());
    if !fields.get("filesize").is_some_and(Value::is_u64) {
        fields.insert("filesize".into(), 0.into());
    }

    let file_url = take_string(&mut fields, &["source_file_url", "epg_file_url"])
        .unwrap_or_else(|| source.file_url(id));
    // Early releases stored the file URL as the index URL too.
    let index_url = take_string(&mut fields, &["source_index_url", "epg_index_url"])
        .filter(|url| !url.trim_end_matches('/').ends_with("/file"))
        .unwrap_or_else(|| source.index_url(id));
    fields.insert("source_file_url".into(), file_url.into());
    fields.insert("source_index_url".into(), index_url.into());

    split_combined_status(&mut fields);

    let storage_key = take_string(&mut fields, &["storage_key", "s3_key"]).or_else(|| {
        has_stored_object(&fields).then(|| {
            let filename = fields.get("filename").and_then(Value::as_str).unwrap_or_default();
            storage.key_for(filename)
        })
    });
    let origin_url = take_string(&mut fields, &["origin_url", "web_origin_url"]);
    let cdn_url = take_string(&mut fields, &["cdn_url", "web_cdn_url"]);
    if let Some(storage_key) = storage_key {
        let origin_url = origin_url.unwrap_or_else(|| storage.url_for(&storage_key));
        let cdn_url = cdn_url.unwrap_or_else(|| storage.cdn_url_for(&storage_key));
        fields.insert("origin_url".into(), origin_url.into());
        fields.insert("cdn_url".into(), cdn_url.into());
        fields.insert("storage_key".into(), storage_key.into());
    }

    for name in ["downloaded_on", "uploaded_on"] {
        normalize_timestamp(key, &mut fields, name);
    }

    Ok(serde_json::from_value(Value::Object(fields))?)
}

/// `epg_status = "uploaded"` meant downloaded and uploaded in one field.
fn split_combined_status(fields: &mut Map<String, Value>) {
    if fields.get("epg_status").and_then(Value::as_str) == Some("uploaded") {
        fields.insert("epg_status".into(), "downloaded".into());
        fields.insert("s3_status".into(), "uploaded".into());
        fields.insert("local_status".into(), "uploaded".into());
    }
    let uploaded = fields.get("s3_status").and_then(Value::as_str) == Some("uploaded");
    let local = fields.get("local_status").and_then(Value::as_str);
    if uploaded && matches!(local, None | Some("-") | Some("downloaded")) {
        fields.insert("local_status".into(), "uploaded".into());
    }
}

fn has_stored_object(fields: &Map<String, Value>) -> bool {
    matches!(
        fields.get("s3_status").and_then(Value::as_str),
        Some("uploading" | "uploaded" | "upload_error")
    )
}

/// Remove every alias and return the first non-empty string among them.
fn take_string(fields: &mut Map<String, Value>, names: &[&str]) -> Option<String> {
    let mut found = None;
    for name in names {
        if let Some(Value::String(value)) = fields.remove(*name) {
            if found.is_none() && !value.is_empty() {
                found = Some(value);
            }
        }
    }
    found
}

fn normalize_timestamp(key: &str, fields: &mut Map<String, Value>, name: &str) {
    let Some(value) = fields.remove(name) else {
        return;
    };
    let parsed = value
        .as_str()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|ts| ts.with_timezone(&Utc));
    match parsed {
        Some(ts) => {
            fields.insert(name.to_string(), ts.to_rfc3339().into());
        }
        None if value.is_null() => {}
        None => warn!(key = %key, field = name, value = %value, "dropping unreadable timestamp"),
    }
}

fn malformed(key: &str, reason: &str) -> ArchiveError {
    ArchiveError::Json(serde_json::Error::custom(format!("{}: {}", key, reason)))
}
