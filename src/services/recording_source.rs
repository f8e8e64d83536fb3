//! EPGStation access: listing, streaming downloads, logs, deletes, and free
//! space. Stateless request/response wrappers; nothing here touches the store.

use crate::{
    config::AppConfig,
    errors::{ArchiveError, ArchiveResult},
    models::entry::{FreeSpace, RecordedItem, RecordedList},
};
use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::{Client, Method, RequestBuilder, Response};
use std::{io, path::Path, time::Duration};
use tokio::{
    fs::File,
    io::{AsyncWriteExt, BufWriter},
};
use tokio_util::io::StreamReader;
use tracing::{debug, instrument};

/// Write buffer for streamed downloads.
const DOWNLOAD_CHUNK_SIZE: usize = 8192;

#[async_trait]
pub trait RecordingSource: Send + Sync {
    /// URL of the recording bytes.
    fn file_url(&self, id: i64) -> String;

    /// URL of the recording info resource (also used for deletes).
    fn index_url(&self, id: i64) -> String;

    async fn list_recordings(&self) -> ArchiveResult<Vec<RecordedItem>>;

    /// Stream `file_url` into `destination`, returning the bytes written.
    /// On error the destination may hold a partial file.
    async fn fetch(&self, file_url: &str, destination: &Path) -> ArchiveResult<u64>;

    /// Text of the recording log that carries the CRC32 of the file.
    async fn fetch_log(&self, index_url: &str) -> ArchiveResult<String>;

    async fn delete(&self, index_url: &str) -> ArchiveResult<()>;

    async fn free_space(&self) -> ArchiveResult<FreeSpace>;
}

/// Basic-auth client for the EPGStation REST API.
#[derive(Clone)]
pub struct EpgStationClient {
    client: Client,
    base_url: String,
    user: String,
    password: String,
}

impl std::fmt::Debug for EpgStationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpgStationClient")
            .field("base_url", &self.base_url)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

impl EpgStationClient {
    pub fn new(cfg: &AppConfig) -> ArchiveResult<Self> {
        Self::with_base_url(
            cfg.epg_base_url(),
            cfg.epg_user.clone(),
            cfg.epg_password.clone(),
            Duration::from_secs(cfg.http_timeout_secs),
        )
    }

    /// Build a client against an explicit base URL (`scheme://host[:port]`).
    pub fn with_base_url(
        base_url: impl Into<String>,
        user: String,
        password: String,
        timeout: Duration,
    ) -> ArchiveResult<Self> {
        // Only connect and per-read stalls are bounded; a whole recording can
        // legitimately take hours.
        let client = Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()
            .map_err(ArchiveError::remote)?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user,
            password,
        })
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .basic_auth(&self.user, Some(&self.password))
    }

    async fn send(&self, method: Method, url: &str) -> ArchiveResult<Response> {
        self.request(method, url)
            .send()
            .await
            .and_then(Response::error_for_status)
            .map_err(ArchiveError::remote)
    }
}

#[async_trait]
impl RecordingSource for EpgStationClient {
    fn file_url(&self, id: i64) -> String {
        format!("{}/api/recorded/{}/file", self.base_url, id)
    }

    fn index_url(&self, id: i64) -> String {
        format!("{}/api/recorded/{}/", self.base_url, id)
    }

    #[instrument(skip(self))]
    async fn list_recordings(&self) -> ArchiveResult<Vec<RecordedItem>> {
        let url = format!("{}/api/recorded/", self.base_url);
        let list: RecordedList = self
            .send(Method::GET, &url)
            .await?
            .json()
            .await
            .map_err(ArchiveError::remote)?;
        debug!("EPGStation lists {} recordings", list.recorded.len());
        Ok(list.recorded)
    }

    #[instrument(skip(self, destination), fields(destination = %destination.display()))]
    async fn fetch(&self, file_url: &str, destination: &Path) -> ArchiveResult<u64> {
        let download_error = |reason: String| ArchiveError::Download {
            key: file_url.to_string(),
            reason,
        };

        let response = self
            .request(Method::GET, file_url)
            .send()
            .await
            .and_then(Response::error_for_status)
            .map_err(|err| download_error(err.to_string()))?;

        let stream = response.bytes_stream().map_err(io::Error::other);
        let mut reader = StreamReader::new(Box::pin(stream));
        let file = File::create(destination).await?;
        let mut writer = BufWriter::with_capacity(DOWNLOAD_CHUNK_SIZE, file);

        let written = tokio::io::copy(&mut reader, &mut writer)
            .await
            .map_err(|err| download_error(err.to_string()))?;
        writer.flush().await?;
        writer.into_inner().sync_all().await?;

        debug!("wrote {} bytes", written);
        Ok(written)
    }

    #[instrument(skip(self))]
    async fn fetch_log(&self, index_url: &str) -> ArchiveResult<String> {
        let url = format!("{}/log", index_url.trim_end_matches('/'));
        self.send(Method::GET, &url)
            .await?
            .text()
            .await
            .map_err(ArchiveError::remote)
    }

    #[instrument(skip(self))]
    async fn delete(&self, index_url: &str) -> ArchiveResult<()> {
        self.request(Method::DELETE, index_url)
            .send()
            .await
            .and_then(Response::error_for_status)
            .map_err(|err| ArchiveError::RemoteDelete {
                key: index_url.to_string(),
                reason: err.to_string(),
            })?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn free_space(&self) -> ArchiveResult<FreeSpace> {
        let url = format!("{}/api/storage", self.base_url);
        self.send(Method::GET, &url)
            .await?
            .json()
            .await
            .map_err(ArchiveError::remote)
    }
}
