//! In-memory stand-ins for the recording source, object store and entry
//! store, plus a few fixtures shared by the unit tests.

use crate::{
    errors::{ArchiveError, ArchiveResult},
    models::entry::{Entry, FreeSpace, RecordedItem, SCHEMA_VERSION, entry_key},
    models::status::{EpgStatus, LocalStatus, S3Status},
    services::{
        entry_store::{EntryStore, decode_entry},
        lifecycle::{Confirmer, LifecycleEngine},
        object_storage::{ObjectStorage, StorageLayout},
        recording_source::RecordingSource,
        verification::multipart_etag,
    },
};
use async_trait::async_trait;
use futures::{StreamExt, stream::BoxStream};
use serde_json::{Map, Value, json};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tempfile::TempDir;

pub const EPG_BASE: &str = "http://epg.test";
pub const ORIGIN_BASE: &str = "https://origin.test";
pub const CDN_BASE: &str = "https://cdn.test";

/// Temporary working directory removed on drop.
pub struct TestDir(TempDir);

impl TestDir {
    pub fn new() -> Self {
        Self(TempDir::new().expect("create temp dir"))
    }

    pub fn path(&self) -> &Path {
        self.0.path()
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.0.path().join(name)
    }
}

/// A stored entry in the `new` state, pointing at [`FakeSource`] URLs.
pub fn sample_entry(id: i64, filename: &str, filesize: u64) -> Entry {
    Entry {
        schema_version: SCHEMA_VERSION,
        id,
        key: entry_key("epgd", id),
        filename: filename.to_string(),
        filesize,
        name: Some(format!("Recording {id}")),
        source_file_url: format!("{EPG_BASE}/api/recorded/{id}/file"),
        source_index_url: format!("{EPG_BASE}/api/recorded/{id}/"),
        storage_key: None,
        epg_status: EpgStatus::New,
        s3_status: S3Status::Unset,
        local_status: LocalStatus::Unset,
        downloaded_on: None,
        uploaded_on: None,
        origin_url: None,
        cdn_url: None,
        remote: Map::new(),
    }
}

/// Log text EPGStation would serve for a file with these bytes.
pub fn log_for(body: &[u8]) -> String {
    format!(
        "[2024-01-01 00:00:00] drop: 0\ncrc32: {:x}\n",
        crc32fast::hash(body)
    )
}

#[derive(Default)]
pub struct FakeSource {
    recordings: Mutex<Vec<RecordedItem>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    logs: Mutex<HashMap<String, String>>,
    deleted: Mutex<Vec<String>>,
    fetches: Mutex<Vec<String>>,
    failing_deletes: Mutex<HashSet<String>>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a finished recording whose declared size and log match `body`.
    pub fn add_recording(&self, id: i64, encoded_filename: &str, body: Vec<u8>) {
        let declared = body.len() as u64;
        self.add_recording_declaring(id, encoded_filename, body, declared);
    }

    /// Publish a finished recording that declares `declared` bytes.
    pub fn add_recording_declaring(
        &self,
        id: i64,
        encoded_filename: &str,
        body: Vec<u8>,
        declared: u64,
    ) {
        self.push_item(json!({
            "id": id,
            "filename": encoded_filename,
            "recording": false,
            "filesize": declared,
            "name": format!("Recording {id}"),
        }));
        self.set_log(id, &log_for(&body));
        self.files
            .lock()
            .unwrap()
            .insert(self.file_url(id), body);
    }

    pub fn add_in_progress(&self, id: i64, encoded_filename: &str) {
        self.push_item(json!({
            "id": id,
            "filename": encoded_filename,
            "recording": true,
        }));
    }

    pub fn set_log(&self, id: i64, log: &str) {
        self.logs
            .lock()
            .unwrap()
            .insert(self.index_url(id), log.to_string());
    }

    pub fn fail_deletes_for(&self, id: i64) {
        self.failing_deletes.lock().unwrap().insert(self.index_url(id));
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetches.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    fn push_item(&self, value: Value) {
        let item: RecordedItem = serde_json::from_value(value).expect("valid recorded item");
        self.recordings.lock().unwrap().push(item);
    }
}

#[async_trait]
impl RecordingSource for FakeSource {
    fn file_url(&self, id: i64) -> String {
        format!("{EPG_BASE}/api/recorded/{id}/file")
    }

    fn index_url(&self, id: i64) -> String {
        format!("{EPG_BASE}/api/recorded/{id}/")
    }

    async fn list_recordings(&self) -> ArchiveResult<Vec<RecordedItem>> {
        Ok(self.recordings.lock().unwrap().clone())
    }

    async fn fetch(&self, file_url: &str, destination: &Path) -> ArchiveResult<u64> {
        self.fetches.lock().unwrap().push(file_url.to_string());
        let body = self.files.lock().unwrap().get(file_url).cloned();
        let body = body.ok_or_else(|| ArchiveError::Download {
            key: file_url.to_string(),
            reason: "404 Not Found".into(),
        })?;
        tokio::fs::write(destination, &body).await?;
        Ok(body.len() as u64)
    }

    async fn fetch_log(&self, index_url: &str) -> ArchiveResult<String> {
        self.logs
            .lock()
            .unwrap()
            .get(index_url)
            .cloned()
            .ok_or_else(|| ArchiveError::remote(format!("no log at {index_url}")))
    }

    async fn delete(&self, index_url: &str) -> ArchiveResult<()> {
        if self.failing_deletes.lock().unwrap().contains(index_url) {
            return Err(ArchiveError::RemoteDelete {
                key: index_url.to_string(),
                reason: "500 Internal Server Error".into(),
            });
        }
        self.deleted.lock().unwrap().push(index_url.to_string());
        Ok(())
    }

    async fn free_space(&self) -> ArchiveResult<FreeSpace> {
        Ok(FreeSpace {
            free: 1 << 30,
            total: 4 << 30,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    pub etag: String,
    pub content_type: String,
    pub body: Vec<u8>,
}

pub struct FakeStorage {
    layout: StorageLayout,
    objects: Mutex<BTreeMap<String, StoredObject>>,
    validator_override: Mutex<Option<String>>,
    failing_uploads: Mutex<HashSet<String>>,
    deleted: Mutex<Vec<String>>,
}

impl FakeStorage {
    /// Storage with the `tv` key prefix.
    pub fn new() -> Self {
        Self {
            layout: StorageLayout::new(Some("tv".into()), ORIGIN_BASE, CDN_BASE),
            objects: Mutex::default(),
            validator_override: Mutex::default(),
            failing_uploads: Mutex::default(),
            deleted: Mutex::default(),
        }
    }

    /// Serve this ETag for every object instead of the real one.
    pub fn serve_validator(&self, etag: &str) {
        *self.validator_override.lock().unwrap() = Some(etag.to_string());
    }

    pub fn fail_uploads_to(&self, key: &str) {
        self.failing_uploads.lock().unwrap().insert(key.to_string());
    }

    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    fn key_for(&self, filename: &str) -> String {
        self.layout.key_for(filename)
    }

    fn url_for(&self, key: &str) -> String {
        self.layout.url_for(key)
    }

    fn cdn_url_for(&self, key: &str) -> String {
        self.layout.cdn_url_for(key)
    }

    async fn upload(&self, local_path: &Path, key: &str, content_type: &str) -> ArchiveResult<()> {
        let upload_error = |reason: String| ArchiveError::Upload {
            key: key.to_string(),
            reason,
        };
        if self.failing_uploads.lock().unwrap().contains(key) {
            return Err(upload_error("503 Slow Down".into()));
        }
        let body = tokio::fs::read(local_path)
            .await
            .map_err(|err| upload_error(err.to_string()))?;
        let etag = multipart_etag(local_path)
            .await
            .map_err(|err| upload_error(err.to_string()))?;
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                etag,
                content_type: content_type.to_string(),
                body,
            },
        );
        Ok(())
    }

    async fn download(&self, key: &str, destination: &Path) -> ArchiveResult<()> {
        let object = self.object(key).ok_or_else(|| ArchiveError::Download {
            key: key.to_string(),
            reason: "404 Not Found".into(),
        })?;
        tokio::fs::write(destination, object.body).await?;
        Ok(())
    }

    async fn content_validator(&self, url: &str) -> ArchiveResult<Option<String>> {
        let objects = self.objects.lock().unwrap();
        let found = objects
            .iter()
            .find(|(key, _)| self.layout.url_for(key) == url)
            .map(|(_, object)| object.etag.clone());
        let override_etag = self.validator_override.lock().unwrap().clone();
        Ok(found.map(|etag| override_etag.unwrap_or(etag)))
    }

    async fn delete(&self, key: &str) -> ArchiveResult<()> {
        self.objects.lock().unwrap().remove(key);
        self.deleted.lock().unwrap().push(key.to_string());
        Ok(())
    }
}

/// BTreeMap-backed entry store holding raw JSON, like the SQLite table.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<String, Value>>,
    writes: Mutex<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_raw(&self, key: &str, record: Value) {
        self.records.lock().unwrap().insert(key.to_string(), record);
    }

    pub fn raw(&self, key: &str) -> Option<Value> {
        self.records.lock().unwrap().get(key).cloned()
    }

    pub fn write_count(&self) -> usize {
        *self.writes.lock().unwrap()
    }
}

#[async_trait]
impl EntryStore for MemoryStore {
    async fn get(&self, key: &str) -> ArchiveResult<Entry> {
        let record = self
            .raw(key)
            .ok_or_else(|| ArchiveError::NotFound(key.to_string()))?;
        decode_entry(key, record)
    }

    async fn set(&self, entry: &Entry) -> ArchiveResult<()> {
        let value = serde_json::to_value(entry)?;
        self.records.lock().unwrap().insert(entry.key.clone(), value);
        *self.writes.lock().unwrap() += 1;
        Ok(())
    }

    async fn exists(&self, key: &str) -> ArchiveResult<bool> {
        Ok(self.records.lock().unwrap().contains_key(key))
    }

    fn scan<'a>(&'a self, prefix: &'a str) -> BoxStream<'a, ArchiveResult<Entry>> {
        let decoded: Vec<_> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| decode_entry(key, value.clone()))
            .collect();
        futures::stream::iter(decoded).boxed()
    }

    async fn scan_raw(&self, prefix: &str) -> ArchiveResult<Vec<(String, Value)>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }
}

/// Fixed answer to every confirmation prompt; records the prompts asked.
#[derive(Default)]
pub struct Answer {
    yes: bool,
    asked: Mutex<Vec<String>>,
}

impl Answer {
    pub fn yes() -> Self {
        Self {
            yes: true,
            ..Self::default()
        }
    }

    pub fn no() -> Self {
        Self::default()
    }

    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().unwrap().clone()
    }
}

impl Confirmer for Answer {
    fn confirm(&self, prompt: &str) -> bool {
        self.asked.lock().unwrap().push(prompt.to_string());
        self.yes
    }
}

/// An engine wired to fresh fakes and a temporary working directory.
pub struct Harness {
    pub source: Arc<FakeSource>,
    pub storage: Arc<FakeStorage>,
    pub store: Arc<MemoryStore>,
    pub dir: TestDir,
    pub engine: LifecycleEngine,
}

impl Harness {
    pub fn new() -> Self {
        let source = Arc::new(FakeSource::new());
        let storage = Arc::new(FakeStorage::new());
        let store = Arc::new(MemoryStore::new());
        let dir = TestDir::new();
        let engine = LifecycleEngine::new(
            source.clone(),
            storage.clone(),
            store.clone(),
            dir.path(),
            "epgd",
        );
        Self {
            source,
            storage,
            store,
            dir,
            engine,
        }
    }

    pub async fn stored(&self, key: &str) -> Entry {
        self.store.get(key).await.expect("entry is stored")
    }
}
