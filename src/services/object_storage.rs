//! S3-compatible object storage for archived recordings and their sidecars.

use crate::{
    config::AppConfig,
    errors::{ArchiveError, ArchiveResult},
    services::verification::MULTIPART_CHUNK_SIZE,
};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::{
    Client,
    config::Credentials,
    error::DisplayErrorContext,
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart, ObjectCannedAcl},
};
use base64::{Engine as _, engine::general_purpose};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::header::ETAG;
use std::{path::Path, time::Duration};
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncWriteExt},
};
use tracing::{debug, instrument, warn};

/// Characters left unescaped in public object URLs (keys keep their `/`).
const URL_KEY_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Object key for a local file name.
    fn key_for(&self, filename: &str) -> String;

    /// Public origin URL of an object.
    fn url_for(&self, key: &str) -> String;

    /// Public CDN URL of an object.
    fn cdn_url_for(&self, key: &str) -> String;

    /// Upload `local_path` as a publicly readable object.
    async fn upload(&self, local_path: &Path, key: &str, content_type: &str) -> ArchiveResult<()>;

    /// Fetch the object at `key` into `destination`.
    async fn download(&self, key: &str, destination: &Path) -> ArchiveResult<()>;

    /// ETag header served for `url`, or `None` when the object is not there.
    async fn content_validator(&self, url: &str) -> ArchiveResult<Option<String>>;

    async fn delete(&self, key: &str) -> ArchiveResult<()>;
}

/// Pure key and URL construction shared by every storage implementation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageLayout {
    prefix: Option<String>,
    origin_base: String,
    cdn_base: String,
}

impl StorageLayout {
    pub fn new(prefix: Option<String>, origin_base: &str, cdn_base: &str) -> Self {
        Self {
            prefix: prefix
                .map(|p| p.trim_matches('/').to_string())
                .filter(|p| !p.is_empty()),
            origin_base: origin_base.trim_end_matches('/').to_string(),
            cdn_base: cdn_base.trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(cfg: &AppConfig) -> Self {
        Self::new(
            cfg.s3_prefix.clone(),
            &cfg.s3_endpoint_url,
            &cfg.cdn_endpoint_url,
        )
    }

    pub fn key_for(&self, filename: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}/{}", prefix, filename),
            None => filename.to_string(),
        }
    }

    pub fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.origin_base, utf8_percent_encode(key, URL_KEY_SET))
    }

    pub fn cdn_url_for(&self, key: &str) -> String {
        format!("{}/{}", self.cdn_base, utf8_percent_encode(key, URL_KEY_SET))
    }
}

/// Bucket-backed storage using the AWS SDK.
pub struct S3Archive {
    client: Client,
    http: reqwest::Client,
    bucket: String,
    layout: StorageLayout,
}

impl std::fmt::Debug for S3Archive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Archive")
            .field("bucket", &self.bucket)
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

impl S3Archive {
    pub async fn new(cfg: &AppConfig) -> ArchiveResult<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(cfg.aws_region.clone()))
            .endpoint_url(&cfg.s3_endpoint_url);

        // Explicit keys win; otherwise the ambient AWS credential chain applies.
        if let (Some(key_id), Some(secret)) = (&cfg.aws_access_key_id, &cfg.aws_secret_access_key)
        {
            loader = loader.credentials_provider(Credentials::new(
                key_id.clone(),
                secret.clone(),
                None,
                None,
                "epg-downloader-config",
            ));
        }
        let shared = loader.load().await;

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(cfg.http_timeout_secs))
            .timeout(Duration::from_secs(cfg.http_timeout_secs))
            .build()
            .map_err(ArchiveError::remote)?;

        Ok(Self::from_parts(
            Client::new(&shared),
            http,
            cfg.s3_bucket.clone(),
            StorageLayout::from_config(cfg),
        ))
    }

    /// Assemble an archive from already-configured clients. `http` serves
    /// the public-URL HEAD requests used for ETag checks.
    pub fn from_parts(
        client: Client,
        http: reqwest::Client,
        bucket: String,
        layout: StorageLayout,
    ) -> Self {
        Self {
            client,
            http,
            bucket,
            layout,
        }
    }

    fn upload_error(key: &str, reason: impl std::fmt::Display) -> ArchiveError {
        ArchiveError::Upload {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }

    async fn put_single(&self, local_path: &Path, key: &str, content_type: &str) -> ArchiveResult<()> {
        let body = fs::read(local_path)
            .await
            .map_err(|err| Self::upload_error(key, err))?;
        let content_md5 = general_purpose::STANDARD.encode(md5::compute(&body).0);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .acl(ObjectCannedAcl::PublicRead)
            .content_type(content_type)
            .content_md5(content_md5)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|err| Self::upload_error(key, DisplayErrorContext(err)))?;
        Ok(())
    }

    /// Upload in fixed 8 MiB parts so the resulting ETag is the multipart
    /// hash computed by `verification::multipart_etag`.
    async fn put_multipart(&self, local_path: &Path, key: &str, content_type: &str) -> ArchiveResult<()> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .acl(ObjectCannedAcl::PublicRead)
            .content_type(content_type)
            .send()
            .await
            .map_err(|err| Self::upload_error(key, DisplayErrorContext(err)))?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| Self::upload_error(key, "store did not return an upload id"))?
            .to_string();

        match self.upload_parts(local_path, key, &upload_id).await {
            Ok(parts) => {
                self.client
                    .complete_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .multipart_upload(
                        CompletedMultipartUpload::builder()
                            .set_parts(Some(parts))
                            .build(),
                    )
                    .send()
                    .await
                    .map_err(|err| Self::upload_error(key, DisplayErrorContext(err)))?;
                Ok(())
            }
            Err(err) => {
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(
                        key = %key,
                        "failed to abort multipart upload: {}",
                        DisplayErrorContext(abort_err)
                    );
                }
                Err(err)
            }
        }
    }

    async fn upload_parts(
        &self,
        local_path: &Path,
        key: &str,
        upload_id: &str,
    ) -> ArchiveResult<Vec<CompletedPart>> {
        let mut file = File::open(local_path)
            .await
            .map_err(|err| Self::upload_error(key, err))?;
        let mut parts = Vec::new();
        let mut part_number: i32 = 1;

        loop {
            let mut chunk = Vec::with_capacity(MULTIPART_CHUNK_SIZE);
            (&mut file)
                .take(MULTIPART_CHUNK_SIZE as u64)
                .read_to_end(&mut chunk)
                .await
                .map_err(|err| Self::upload_error(key, err))?;
            if chunk.is_empty() {
                break;
            }

            let content_md5 = general_purpose::STANDARD.encode(md5::compute(&chunk).0);
            let output = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .content_md5(content_md5)
                .body(ByteStream::from(chunk))
                .send()
                .await
                .map_err(|err| Self::upload_error(key, DisplayErrorContext(err)))?;

            debug!(key = %key, part_number, "uploaded part");
            parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .set_e_tag(output.e_tag().map(str::to_string))
                    .build(),
            );
            part_number += 1;
        }

        Ok(parts)
    }
}

#[async_trait]
impl ObjectStorage for S3Archive {
    fn key_for(&self, filename: &str) -> String {
        self.layout.key_for(filename)
    }

    fn url_for(&self, key: &str) -> String {
        self.layout.url_for(key)
    }

    fn cdn_url_for(&self, key: &str) -> String {
        self.layout.cdn_url_for(key)
    }

    #[instrument(skip(self, local_path), fields(backend = "s3"))]
    async fn upload(&self, local_path: &Path, key: &str, content_type: &str) -> ArchiveResult<()> {
        let size = fs::metadata(local_path)
            .await
            .map_err(|err| Self::upload_error(key, err))?
            .len();

        if size > MULTIPART_CHUNK_SIZE as u64 {
            self.put_multipart(local_path, key, content_type).await
        } else {
            self.put_single(local_path, key, content_type).await
        }
    }

    #[instrument(skip(self, destination), fields(backend = "s3"))]
    async fn download(&self, key: &str, destination: &Path) -> ArchiveResult<()> {
        let download_error = |reason: String| ArchiveError::Download {
            key: key.to_string(),
            reason,
        };

        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| download_error(DisplayErrorContext(err).to_string()))?;

        let mut reader = output.body.into_async_read();
        let mut file = File::create(destination).await?;
        let written = tokio::io::copy(&mut reader, &mut file)
            .await
            .map_err(|err| download_error(err.to_string()))?;
        file.flush().await?;
        file.sync_all().await?;

        debug!(key = %key, "fetched {} bytes", written);
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn content_validator(&self, url: &str) -> ArchiveResult<Option<String>> {
        let response = self
            .http
            .head(url)
            .send()
            .await
            .map_err(|err| Self::upload_error(url, err))?;
        if !response.status().is_success() {
            debug!(status = %response.status(), "validator lookup missed");
            return Ok(None);
        }
        Ok(response
            .headers()
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string))
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn delete(&self, key: &str) -> ArchiveResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| ArchiveError::Delete {
                key: key.to_string(),
                reason: DisplayErrorContext(err).to_string(),
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::verification::content_hash_matches;
    use mockito::Server;
    use tempfile::TempDir;

    /// Archive whose HEAD requests go to `server`. The SDK client is never
    /// called by these tests.
    fn archive(server: &Server) -> S3Archive {
        let sdk = Client::from_conf(
            aws_sdk_s3::Config::builder()
                .behavior_version(BehaviorVersion::latest())
                .region(Region::new("us-east-1"))
                .build(),
        );
        S3Archive::from_parts(
            sdk,
            reqwest::Client::new(),
            "bucket".into(),
            StorageLayout::new(Some("tv".into()), &server.url(), "https://cdn.test"),
        )
    }

    // md5("hello")
    const HELLO_MD5: &str = "5d41402abc4b2a76b9719d911017c592";

    #[tokio::test]
    async fn validator_is_the_etag_header_as_served() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("HEAD", "/tv/a.ts")
            .with_header("etag", &format!("\"{}\"", HELLO_MD5))
            .create_async()
            .await;

        let s3 = archive(&server);
        let url = s3.url_for(&s3.key_for("a.ts"));
        let validator = s3.content_validator(&url).await.unwrap();
        mock.assert_async().await;
        assert_eq!(validator, Some(format!("\"{}\"", HELLO_MD5)));
    }

    #[tokio::test]
    async fn unquoted_etag_still_verifies_the_local_file() {
        let mut server = Server::new_async().await;
        server
            .mock("HEAD", "/tv/a.ts")
            .with_header("etag", HELLO_MD5)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let local = dir.path().join("a.ts");
        tokio::fs::write(&local, b"hello").await.unwrap();

        let s3 = archive(&server);
        let url = s3.url_for("tv/a.ts");
        assert!(content_hash_matches(&s3, &local, &url).await.unwrap());

        tokio::fs::write(&local, b"jello").await.unwrap();
        assert!(!content_hash_matches(&s3, &local, &url).await.unwrap());
    }

    #[tokio::test]
    async fn missing_object_has_no_validator() {
        let mut server = Server::new_async().await;
        server
            .mock("HEAD", "/tv/gone.ts")
            .with_status(404)
            .create_async()
            .await;
        server
            .mock("HEAD", "/tv/bare.ts")
            .create_async()
            .await;

        let s3 = archive(&server);
        assert_eq!(s3.content_validator(&s3.url_for("tv/gone.ts")).await.unwrap(), None);
        assert_eq!(s3.content_validator(&s3.url_for("tv/bare.ts")).await.unwrap(), None);
    }

    #[test]
    fn key_applies_prefix_with_single_slash() {
        let layout = StorageLayout::new(Some("tv/".into()), "https://o", "https://c");
        assert_eq!(layout.key_for("Show A.ts"), "tv/Show A.ts");

        let bare = StorageLayout::new(None, "https://o", "https://c");
        assert_eq!(bare.key_for("Show A.ts"), "Show A.ts");

        let empty = StorageLayout::new(Some(String::new()), "https://o", "https://c");
        assert_eq!(empty.key_for("a.ts"), "a.ts");
    }

    #[test]
    fn urls_quote_key_but_keep_slashes() {
        let layout = StorageLayout::new(
            Some("tv".into()),
            "https://sgp1.digitaloceanspaces.com/",
            "https://cdn.example.com",
        );
        let key = layout.key_for("Show A (1).ts");
        assert_eq!(
            layout.url_for(&key),
            "https://sgp1.digitaloceanspaces.com/tv/Show%20A%20%281%29.ts"
        );
        assert_eq!(
            layout.cdn_url_for(&key),
            "https://cdn.example.com/tv/Show%20A%20%281%29.ts"
        );
        assert_eq!(
            layout.url_for("テスト.ts"),
            "https://sgp1.digitaloceanspaces.com/%E3%83%86%E3%82%B9%E3%83%88.ts"
        );
    }
}
