//! The entry lifecycle engine.
//!
//! Owns every write to the entry store. Each mutating step persists the
//! in-progress status before touching the network or disk, and an explicit
//! error status when the step fails, so re-running a command after a crash
//! or a failure resumes from the last persisted state.

use crate::{
    errors::{ArchiveError, ArchiveResult},
    models::{
        entry::{Entry, FreeSpace, RecordedItem, SidecarKind, entry_key},
        status::{EpgStatus, LocalStatus, S3Status},
    },
    services::{
        entry_store::EntryStore,
        mediainfo::MediaInfoTool,
        migration::{self, MigrationSummary},
        object_storage::ObjectStorage,
        recording_source::RecordingSource,
        report::{self, IndexItem},
        verification::{
            content_hash_matches, crc_in_log, crc32_of_file, local_checksum_matches_log,
        },
    },
};
use chrono::Utc;
use futures::{
    StreamExt, TryStreamExt,
    stream::{self, BoxStream},
};
use serde_json::Value;
use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::fs;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// File name of the generated index, locally and in the bucket.
pub const INDEX_FILENAME: &str = "uploads.html";

/// Yes/no prompt used before destructive steps that were not forced.
pub trait Confirmer: Send + Sync {
    fn confirm(&self, prompt: &str) -> bool;
}

/// Outcome of a secondary step whose failure never fails the entry.
#[derive(Debug)]
pub enum BestEffort {
    Done,
    /// Nothing to do (the sidecar file does not exist).
    Skipped,
    Ignored(ArchiveError),
}

/// An entry after an operation, with what happened to its sidecars.
#[derive(Debug)]
pub struct EntryReport {
    pub entry: Entry,
    pub sidecars: Vec<(SidecarKind, BestEffort)>,
}

/// One line of `ls`: ordered `(column, value)` pairs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListRow {
    pub key: String,
    pub columns: Vec<(String, String)>,
}

impl ListRow {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }
}

/// Per-identifier results of a batch command.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, ArchiveError)>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct SweepReport {
    pub downloaded: Vec<String>,
    pub uploaded: Vec<String>,
    pub failed: Vec<(String, ArchiveError)>,
    /// Local path of the regenerated index, when one was published.
    pub index: Option<PathBuf>,
}

pub struct LifecycleEngine {
    source: Arc<dyn RecordingSource>,
    storage: Arc<dyn ObjectStorage>,
    store: Arc<dyn EntryStore>,
    mediainfo: Option<MediaInfoTool>,
    directory: PathBuf,
    key_prefix: String,
}

impl LifecycleEngine {
    pub fn new(
        source: Arc<dyn RecordingSource>,
        storage: Arc<dyn ObjectStorage>,
        store: Arc<dyn EntryStore>,
        directory: impl Into<PathBuf>,
        key_prefix: impl Into<String>,
    ) -> Self {
        Self {
            source,
            storage,
            store,
            mediainfo: None,
            directory: directory.into(),
            key_prefix: key_prefix.into(),
        }
    }

    /// Produce `<file>.mediainfo.json` after every successful download.
    pub fn with_mediainfo(mut self, tool: MediaInfoTool) -> Self {
        self.mediainfo = Some(tool);
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Store key for a numeric id, or the identifier itself when it is
    /// already a key.
    pub fn key_for_identifier(&self, identifier: &str) -> String {
        match identifier.trim().parse::<i64>() {
            Ok(id) => entry_key(&self.key_prefix, id),
            Err(_) => identifier.to_string(),
        }
    }

    pub async fn get_entry(&self, identifier: &str) -> ArchiveResult<Entry> {
        self.store.get(&self.key_for_identifier(identifier)).await
    }

    pub async fn free_space(&self) -> ArchiveResult<FreeSpace> {
        self.source.free_space().await
    }

    fn scan_prefix(&self) -> String {
        format!("{}_", self.key_prefix)
    }

    /// Every stored entry, ordered by key. Collected up front so callers can
    /// write while iterating.
    async fn all_entries(&self) -> ArchiveResult<Vec<Entry>> {
        let prefix = self.scan_prefix();
        self.store.scan(&prefix).try_collect().await
    }

    async fn persist(&self, entry: &Entry) -> ArchiveResult<()> {
        self.store.set(entry).await
    }

    fn sidecar_path(&self, entry: &Entry, kind: SidecarKind) -> PathBuf {
        self.directory.join(entry.sidecar_filename(kind))
    }

    // --- discovery ---

    /// Recordings that finished on the source and were never seen before.
    /// Each one is stored with status `new` as the stream yields it, so a
    /// second pass over an unchanged source yields nothing.
    pub fn discover_pending(&self) -> BoxStream<'_, ArchiveResult<Entry>> {
        stream::once(self.source.list_recordings())
            .map_ok(|items| stream::iter(items.into_iter().map(Ok::<_, ArchiveError>)))
            .try_flatten()
            .try_filter_map(move |item| self.register(item))
            .boxed()
    }

    async fn register(&self, item: RecordedItem) -> ArchiveResult<Option<Entry>> {
        if item.recording {
            debug!(id = item.id, "skipping recording in progress");
            return Ok(None);
        }
        let key = entry_key(&self.key_prefix, item.id);
        if self.store.exists(&key).await? {
            debug!(key = %key, "already registered");
            return Ok(None);
        }

        let id = item.id;
        let file_url = self.source.file_url(id);
        let index_url = self.source.index_url(id);
        let Some(entry) = Entry::discovered(key, item, file_url, index_url) else {
            warn!(id, "recording has no usable file name; skipping");
            return Ok(None);
        };
        self.persist(&entry).await?;
        info!(key = %entry.key, filename = %entry.filename, "registered recording");
        Ok(Some(entry))
    }

    /// Discover new recordings, then return every entry whose download has
    /// not completed. Failed downloads are included only on request.
    pub async fn entries_needing_download(&self, retry_failed: bool) -> ArchiveResult<Vec<Entry>> {
        let discovered: Vec<Entry> = self.discover_pending().try_collect().await?;
        debug!("discovered {} new recordings", discovered.len());

        Ok(self
            .all_entries()
            .await?
            .into_iter()
            .filter(|entry| match entry.epg_status {
                EpgStatus::New | EpgStatus::Downloading => true,
                EpgStatus::DownloadingError => retry_failed,
                EpgStatus::Downloaded | EpgStatus::Deleted => false,
            })
            .collect())
    }

    // --- download ---

    /// Download, verify, and record one entry.
    ///
    /// The bytes land in a temporary file next to the target. The `.log` and
    /// `.json` sidecars are written once the size and CRC checks pass, and
    /// the file is renamed into place last. Any failure removes what was
    /// written, marks the entry `downloading_error`, and is returned.
    #[instrument(skip(self))]
    pub async fn download(&self, key: &str) -> ArchiveResult<Entry> {
        let mut entry = self.store.get(key).await?;
        entry.set_epg_status(EpgStatus::Downloading)?;
        self.persist(&entry).await?;
        info!(filename = %entry.filename, "downloading");

        self.clear_stale_partials(&entry.key).await;
        let target = entry.local_path(&self.directory);
        let partial = self.partial_path(&entry);

        let finished = match self.complete_download(&entry, &partial, &target).await {
            Ok(finished) => finished,
            Err(err) => {
                let written = [
                    partial,
                    self.sidecar_path(&entry, SidecarKind::Log),
                    self.sidecar_path(&entry, SidecarKind::Metadata),
                ];
                for path in &written {
                    if let Err(cleanup) = remove_if_exists(path).await {
                        warn!(path = %path.display(), error = %cleanup, "could not clean up after failed download");
                    }
                }
                entry.set_epg_status(EpgStatus::DownloadingError)?;
                self.persist(&entry).await?;
                if err.is_integrity_failure() {
                    warn!(filename = %entry.filename, error = %err, "download failed verification");
                } else {
                    warn!(filename = %entry.filename, error = %err, "download failed");
                }
                return Err(err);
            }
        };

        let entry = finished;
        self.persist(&entry).await?;
        info!(filename = %entry.filename, "download verified");

        if let Some(tool) = &self.mediainfo {
            let sidecar = self.sidecar_path(&entry, SidecarKind::MediaInfo);
            if let Err(err) = tool.write_sidecar(&target, &sidecar).await {
                warn!(filename = %entry.filename, error = %err, "no mediainfo report");
            }
        }
        Ok(entry)
    }

    /// Everything between the fetch and the rename. Returns the entry as it
    /// should be stored once the file is in place.
    async fn complete_download(
        &self,
        entry: &Entry,
        partial: &Path,
        target: &Path,
    ) -> ArchiveResult<Entry> {
        let (crc, log) = self.fetch_verified(entry, partial).await?;

        let mut finished = entry.clone();
        finished.set_epg_status(EpgStatus::Downloaded)?;
        if finished.local_status.can_transition_to(LocalStatus::Downloaded) {
            finished.set_local_status(LocalStatus::Downloaded)?;
        }
        finished.downloaded_on = Some(Utc::now());

        let note = format!("crc32: {:x}\n\n{}", crc, log);
        fs::write(self.sidecar_path(&finished, SidecarKind::Log), note).await?;
        fs::write(
            self.sidecar_path(&finished, SidecarKind::Metadata),
            serde_json::to_vec_pretty(&finished)?,
        )
        .await?;

        fs::rename(partial, target).await?;
        Ok(finished)
    }

    /// Fetch into `partial` and check its size and CRC.
    async fn fetch_verified(&self, entry: &Entry, partial: &Path) -> ArchiveResult<(u32, String)> {
        self.source.fetch(&entry.source_file_url, partial).await?;

        let actual = fs::metadata(partial).await?.len();
        if actual != entry.filesize {
            return Err(ArchiveError::SizeMismatch {
                key: entry.key.clone(),
                expected: entry.filesize,
                actual,
            });
        }

        let crc = crc32_of_file(partial).await?;
        let log = self.source.fetch_log(&entry.source_index_url).await?;
        if !crc_in_log(crc, &log) {
            return Err(ArchiveError::ChecksumMismatch {
                key: entry.key.clone(),
            });
        }

        Ok((crc, log))
    }

    /// `.{key}.{uuid}.part` in the working directory.
    fn partial_path(&self, entry: &Entry) -> PathBuf {
        self.directory
            .join(format!(".{}.{}.part", entry.key, Uuid::new_v4()))
    }

    /// Remove temporary files an interrupted run left behind for `key`.
    async fn clear_stale_partials(&self, key: &str) {
        let prefix = format!(".{}.", key);
        let mut dir = match fs::read_dir(&self.directory).await {
            Ok(dir) => dir,
            Err(err) => {
                warn!(error = %err, "cannot look for stale partial downloads");
                return;
            }
        };
        while let Ok(Some(item)) = dir.next_entry().await {
            let name = item.file_name();
            let name = name.to_string_lossy();
            if !(name.starts_with(&prefix) && name.ends_with(".part")) {
                continue;
            }
            match fs::remove_file(item.path()).await {
                Ok(()) => info!(file = %name, "removed stale partial download"),
                Err(err) => warn!(file = %name, error = %err, "could not remove stale partial download"),
            }
        }
    }

    /// Re-run the CRC check on the local copy and record the verdict.
    #[instrument(skip(self))]
    pub async fn check_download(&self, key: &str) -> ArchiveResult<bool> {
        let mut entry = self.store.get(key).await?;
        let path = entry.local_path(&self.directory);
        let valid =
            local_checksum_matches_log(self.source.as_ref(), &path, &entry.source_index_url)
                .await?;

        if valid {
            entry.set_epg_status(EpgStatus::Downloaded)?;
            if entry.local_status.can_transition_to(LocalStatus::Downloaded) {
                entry.set_local_status(LocalStatus::Downloaded)?;
            }
        } else {
            entry.set_epg_status(EpgStatus::DownloadingError)?;
        }
        self.persist(&entry).await?;
        info!(valid, "checked download");
        Ok(valid)
    }

    // --- upload ---

    /// Entries with a verified local copy that still need uploading.
    pub async fn entries_needing_upload(&self, force: bool) -> ArchiveResult<Vec<Entry>> {
        Ok(self
            .all_entries()
            .await?
            .into_iter()
            .filter(|entry| {
                entry.has_local_copy() && (force || entry.s3_status != S3Status::Uploaded)
            })
            .collect())
    }

    /// Upload one entry and its sidecars, then verify the stored object.
    ///
    /// An entry that is already `uploaded` is left alone unless `force` is
    /// set, and `Ok(None)` is returned. An entry without a verified local
    /// copy is refused before anything is written.
    ///
    /// Sidecar failures are reported, never raised. A failed primary upload
    /// or an ETag that does not match the local file marks the entry
    /// `upload_error` and is returned to the caller.
    #[instrument(skip(self))]
    pub async fn upload(&self, key: &str, force: bool) -> ArchiveResult<Option<EntryReport>> {
        let mut entry = self.store.get(key).await?;
        if entry.s3_status == S3Status::Uploaded && !force {
            info!(key, "already uploaded");
            return Ok(None);
        }
        if !entry.has_local_copy() {
            return Err(ArchiveError::NoLocalCopy(entry.key));
        }

        let storage_key = self.storage.key_for(&entry.filename);
        entry.set_s3_status(S3Status::Uploading)?;
        entry.storage_key = Some(storage_key.clone());
        self.persist(&entry).await?;
        info!(storage_key = %storage_key, "uploading");

        let mut sidecars = Vec::with_capacity(SidecarKind::ALL.len());
        for kind in SidecarKind::ALL {
            let outcome = self.upload_sidecar(&entry, kind, &storage_key).await;
            sidecars.push((kind, outcome));
        }

        let local = entry.local_path(&self.directory);
        if let Err(err) = self
            .storage
            .upload(&local, &storage_key, content_type_for(&entry.filename))
            .await
        {
            return Err(self.fail_upload(entry, err).await);
        }

        let origin_url = self.storage.url_for(&storage_key);
        entry.origin_url = Some(origin_url.clone());
        entry.cdn_url = Some(self.storage.cdn_url_for(&storage_key));

        match content_hash_matches(self.storage.as_ref(), &local, &origin_url).await {
            Ok(true) => {}
            Ok(false) => {
                let err = ArchiveError::EtagMismatch {
                    key: entry.key.clone(),
                };
                return Err(self.fail_upload(entry, err).await);
            }
            Err(err) => return Err(self.fail_upload(entry, err).await),
        }

        entry.set_s3_status(S3Status::Uploaded)?;
        if entry.local_status.can_transition_to(LocalStatus::Uploaded) {
            entry.set_local_status(LocalStatus::Uploaded)?;
        }
        entry.uploaded_on = Some(Utc::now());
        self.persist(&entry).await?;
        info!(url = %origin_url, "upload verified");

        Ok(Some(EntryReport { entry, sidecars }))
    }

    async fn upload_sidecar(&self, entry: &Entry, kind: SidecarKind, storage_key: &str) -> BestEffort {
        let path = self.sidecar_path(entry, kind);
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return BestEffort::Skipped;
        }
        let key = format!("{}{}", storage_key, kind.suffix());
        match self.storage.upload(&path, &key, kind.content_type()).await {
            Ok(()) => BestEffort::Done,
            Err(err) => {
                warn!(key = %key, error = %err, "ignoring sidecar upload failure");
                BestEffort::Ignored(err)
            }
        }
    }

    /// Record `upload_error` and hand back the error to raise.
    async fn fail_upload(&self, mut entry: Entry, err: ArchiveError) -> ArchiveError {
        warn!(key = %entry.key, error = %err, "upload failed");
        if let Err(status_err) = entry.set_s3_status(S3Status::UploadError) {
            return status_err;
        }
        match self.persist(&entry).await {
            Ok(()) => err,
            Err(store_err) => {
                error!(key = %entry.key, error = %store_err, "could not record upload failure");
                store_err
            }
        }
    }

    /// Compare the stored object's ETag with the local file again and
    /// record the verdict.
    #[instrument(skip(self))]
    pub async fn check_upload(&self, key: &str) -> ArchiveResult<bool> {
        let mut entry = self.store.get(key).await?;
        let storage_key = entry
            .storage_key
            .clone()
            .unwrap_or_else(|| self.storage.key_for(&entry.filename));
        let origin_url = entry
            .origin_url
            .clone()
            .unwrap_or_else(|| self.storage.url_for(&storage_key));
        let local = entry.local_path(&self.directory);
        let valid = content_hash_matches(self.storage.as_ref(), &local, &origin_url).await?;

        if valid {
            entry.set_s3_status(S3Status::Uploaded)?;
            if entry.local_status.can_transition_to(LocalStatus::Uploaded) {
                entry.set_local_status(LocalStatus::Uploaded)?;
            }
            if entry.cdn_url.is_none() {
                entry.cdn_url = Some(self.storage.cdn_url_for(&storage_key));
            }
            entry.origin_url = Some(origin_url);
            entry.storage_key = Some(storage_key);
        } else {
            entry.set_s3_status(S3Status::UploadError)?;
        }
        self.persist(&entry).await?;
        info!(valid, "checked upload");
        Ok(valid)
    }

    /// Rebuild the `.log` sidecar of an archived entry from the stored
    /// object: fetch it into a temporary file, check it against the served
    /// ETag, write `crc32: <hex>`, upload the note, and drop the temporary
    /// copy. Returns `None` when the sidecar already exists locally.
    ///
    /// Never changes the entry's status.
    #[instrument(skip(self))]
    pub async fn restore_crc_note(&self, key: &str) -> ArchiveResult<Option<u32>> {
        let entry = self.store.get(key).await?;
        let note_path = self.sidecar_path(&entry, SidecarKind::Log);
        if fs::try_exists(&note_path).await.unwrap_or(false) {
            debug!(path = %note_path.display(), "crc note exists");
            return Ok(None);
        }
        if entry.s3_status != S3Status::Uploaded {
            return Err(ArchiveError::NotArchived(entry.key));
        }

        let storage_key = entry
            .storage_key
            .clone()
            .unwrap_or_else(|| self.storage.key_for(&entry.filename));
        self.clear_stale_partials(&entry.key).await;
        let partial = self.partial_path(&entry);

        let result = self
            .write_crc_note(&entry, &storage_key, &partial, &note_path)
            .await;
        let mut leftovers = vec![partial];
        if result.is_err() {
            leftovers.push(note_path);
        }
        for path in &leftovers {
            if let Err(err) = remove_if_exists(path).await {
                warn!(path = %path.display(), error = %err, "could not remove temporary file");
            }
        }
        let crc = result?;
        info!(crc = %format!("{:x}", crc), "restored crc note");
        Ok(Some(crc))
    }

    async fn write_crc_note(
        &self,
        entry: &Entry,
        storage_key: &str,
        partial: &Path,
        note_path: &Path,
    ) -> ArchiveResult<u32> {
        self.storage.download(storage_key, partial).await?;
        let url = entry
            .origin_url
            .clone()
            .unwrap_or_else(|| self.storage.url_for(storage_key));
        if !content_hash_matches(self.storage.as_ref(), partial, &url).await? {
            return Err(ArchiveError::EtagMismatch {
                key: entry.key.clone(),
            });
        }

        let crc = crc32_of_file(partial).await?;
        fs::write(note_path, format!("crc32: {:x}\n", crc)).await?;
        let note_key = format!("{}{}", storage_key, SidecarKind::Log.suffix());
        self.storage
            .upload(note_path, &note_key, SidecarKind::Log.content_type())
            .await?;
        Ok(crc)
    }

    // --- deletion ---

    /// Remove the local copy. A missing file is fine; the status always
    /// ends up `deleted`.
    #[instrument(skip(self))]
    pub async fn delete_local(&self, key: &str) -> ArchiveResult<Entry> {
        let mut entry = self.store.get(key).await?;
        let path = entry.local_path(&self.directory);
        if remove_if_exists(&path).await? {
            info!(path = %path.display(), "deleted local copy");
        } else {
            debug!(path = %path.display(), "local copy already gone");
        }
        entry.set_local_status(LocalStatus::Deleted)?;
        self.persist(&entry).await?;
        Ok(entry)
    }

    /// Delete the recording on EPGStation unless it is already marked
    /// deleted. `force` always issues the request.
    #[instrument(skip(self))]
    pub async fn delete_remote_source(&self, key: &str, force: bool) -> ArchiveResult<Entry> {
        let mut entry = self.store.get(key).await?;
        if force || entry.epg_status != EpgStatus::Deleted {
            self.source.delete(&entry.source_index_url).await?;
            info!(id = entry.id, "deleted recording on EPGStation");
        } else {
            info!(id = entry.id, "already deleted on EPGStation");
        }
        entry.set_epg_status(EpgStatus::Deleted)?;
        self.persist(&entry).await?;
        Ok(entry)
    }

    /// Delete the stored object and, best-effort, its sidecar objects.
    /// Entries with no upload on record are only marked, unless forced.
    #[instrument(skip(self))]
    pub async fn delete_remote_storage(&self, key: &str, force: bool) -> ArchiveResult<EntryReport> {
        let mut entry = self.store.get(key).await?;
        let stored = matches!(
            entry.s3_status,
            S3Status::Uploading | S3Status::Uploaded | S3Status::UploadError
        );

        let mut sidecars = Vec::new();
        if force || stored {
            let storage_key = entry
                .storage_key
                .clone()
                .unwrap_or_else(|| self.storage.key_for(&entry.filename));
            self.storage.delete(&storage_key).await?;
            info!(storage_key = %storage_key, "deleted stored object");

            for kind in SidecarKind::ALL {
                let sidecar_key = format!("{}{}", storage_key, kind.suffix());
                let outcome = match self.storage.delete(&sidecar_key).await {
                    Ok(()) => BestEffort::Done,
                    Err(err) => {
                        warn!(key = %sidecar_key, error = %err, "ignoring sidecar delete failure");
                        BestEffort::Ignored(err)
                    }
                };
                sidecars.push((kind, outcome));
            }
        } else {
            info!(status = %entry.s3_status, "nothing stored");
        }

        entry.set_s3_status(S3Status::Deleted)?;
        self.persist(&entry).await?;
        Ok(EntryReport { entry, sidecars })
    }

    // --- queries ---

    /// Projection of every entry, ordered by key. `status_filter` matches
    /// either track; `"all"` keeps everything. The `size` field is shown in
    /// GB and missing fields as `-`.
    pub async fn list(
        &self,
        status_filter: &str,
        fields: &[String],
        show_status: bool,
    ) -> ArchiveResult<Vec<ListRow>> {
        let mut rows = Vec::new();
        for entry in self.all_entries().await? {
            if status_filter != "all"
                && entry.epg_status.as_str() != status_filter
                && entry.s3_status.as_str() != status_filter
            {
                continue;
            }

            let mut columns = vec![("id".to_string(), entry.id.to_string())];
            if show_status {
                columns.push(("epg".into(), entry.epg_status.to_string()));
                columns.push(("s3".into(), entry.s3_status.to_string()));
                columns.push(("local".into(), entry.local_status.to_string()));
            }
            let record = serde_json::to_value(&entry)?;
            for field in fields {
                columns.push((field.clone(), field_value(&entry, &record, field)));
            }
            rows.push(ListRow {
                key: entry.key,
                columns,
            });
        }
        Ok(rows)
    }

    // --- migration ---

    /// Rewrite every record that is not yet in the canonical schema.
    /// Records that are already canonical are not written.
    pub async fn reconcile_legacy_records(&self) -> ArchiveResult<MigrationSummary> {
        let records = self.store.scan_raw(&self.scan_prefix()).await?;
        let mut summary = MigrationSummary::default();

        for (key, raw) in records {
            let upgraded =
                migration::upgrade(&key, raw.clone(), self.source.as_ref(), self.storage.as_ref())
                    .and_then(|entry| Ok((serde_json::to_value(&entry)?, entry)));
            match upgraded {
                Ok((value, _)) if value == raw => summary.unchanged += 1,
                Ok((_, entry)) => {
                    self.persist(&entry).await?;
                    info!(key = %key, "upgraded record");
                    summary.upgraded.push(key);
                }
                Err(err) => {
                    error!(key = %key, error = %err, "cannot upgrade record");
                    summary.failed.push((key, err));
                }
            }
        }
        Ok(summary)
    }

    // --- orchestration ---

    /// Download, upload, then (forced or confirmed) delete the local copy and
    /// the EPGStation recording, one identifier at a time. A failure stops
    /// that identifier only.
    pub async fn pipeline(
        &self,
        identifiers: &[String],
        force: bool,
        confirmer: &dyn Confirmer,
    ) -> BatchReport {
        let mut report = BatchReport::default();
        for identifier in identifiers {
            match self.pipeline_one(identifier, force, confirmer).await {
                Ok(()) => report.succeeded.push(identifier.clone()),
                Err(err) => {
                    error!(id = %identifier, error = %err, "pipeline stopped");
                    report.failed.push((identifier.clone(), err));
                }
            }
        }
        report
    }

    async fn pipeline_one(
        &self,
        identifier: &str,
        force: bool,
        confirmer: &dyn Confirmer,
    ) -> ArchiveResult<()> {
        let entry = self.get_entry(identifier).await?;
        let key = entry.key.as_str();

        match entry.epg_status {
            EpgStatus::Downloaded => info!(key, "already downloaded"),
            EpgStatus::Deleted => info!(key, "recording already deleted on EPGStation"),
            EpgStatus::New | EpgStatus::Downloading | EpgStatus::DownloadingError => {
                self.download(key).await?;
            }
        }

        self.upload(key, force).await?;

        let local_prompt = format!("Do you really want to delete {} locally?", entry.filename);
        if force || confirmer.confirm(&local_prompt) {
            self.delete_local(key).await?;
        }
        let remote_prompt = format!(
            "Do you really want to delete {} from EPGStation?",
            entry.filename
        );
        if force || confirmer.confirm(&remote_prompt) {
            self.delete_remote_source(key, false).await?;
        }
        Ok(())
    }

    /// Download everything pending, upload everything downloaded, and
    /// regenerate the index when anything was uploaded. With `purge`, each
    /// uploaded entry also loses its local copy and its EPGStation recording.
    pub async fn sweep(&self, retry_failed: bool, purge: bool) -> ArchiveResult<SweepReport> {
        let mut report = SweepReport::default();

        for entry in self.entries_needing_download(retry_failed).await? {
            match self.download(&entry.key).await {
                Ok(_) => report.downloaded.push(entry.key),
                Err(err) => {
                    error!(key = %entry.key, error = %err, "download failed; continuing");
                    report.failed.push((entry.key, err));
                }
            }
        }

        for entry in self.entries_needing_upload(false).await? {
            match self.archive_one(&entry.key, purge).await {
                Ok(()) => report.uploaded.push(entry.key),
                Err(err) => {
                    error!(key = %entry.key, error = %err, "upload failed; continuing");
                    report.failed.push((entry.key, err));
                }
            }
        }

        if !report.uploaded.is_empty() {
            match self.publish_index().await {
                Ok(path) => report.index = Some(path),
                Err(err) => {
                    error!(error = %err, "could not publish index");
                    report.failed.push((INDEX_FILENAME.to_string(), err));
                }
            }
        }
        Ok(report)
    }

    async fn archive_one(&self, key: &str, purge: bool) -> ArchiveResult<()> {
        self.upload(key, false).await?;
        if purge {
            self.delete_local(key).await?;
            self.delete_remote_source(key, false).await?;
        }
        Ok(())
    }

    /// Write `uploads.html` listing every uploaded entry and upload it.
    pub async fn publish_index(&self) -> ArchiveResult<PathBuf> {
        let mut items = Vec::new();
        for entry in self.all_entries().await? {
            if entry.s3_status != S3Status::Uploaded {
                continue;
            }
            let has_mediainfo = fs::try_exists(self.sidecar_path(&entry, SidecarKind::MediaInfo))
                .await
                .unwrap_or(false);
            match IndexItem::from_entry(&entry, has_mediainfo) {
                Some(item) => items.push(item),
                None => warn!(key = %entry.key, "uploaded entry has no public url"),
            }
        }

        let path = self.directory.join(INDEX_FILENAME);
        fs::write(&path, report::render_index(&items)).await?;
        self.storage
            .upload(
                &path,
                &self.storage.key_for(INDEX_FILENAME),
                "text/html; charset=utf-8",
            )
            .await?;
        info!(entries = items.len(), "published index");
        Ok(path)
    }
}

fn field_value(entry: &Entry, record: &Value, field: &str) -> String {
    if field == "size" {
        return format!("{:.2}", entry.size_gb());
    }
    match record.get(field) {
        None | Some(Value::Null) => "-".to_string(),
        Some(Value::String(value)) => value.clone(),
        Some(other) => other.to_string(),
    }
}

fn content_type_for(filename: &str) -> &'static str {
    let extension = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("ts" | "m2ts") => "video/mp2t",
        Some("mp4") => "video/mp4",
        _ => "application/octet-stream",
    }
}

/// `Ok(false)` when there was nothing to remove.
async fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}
