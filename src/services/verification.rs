//! Integrity checks for downloaded and uploaded recordings.
//!
//! Downloads are checked by finding the file's CRC32 in the EPGStation log.
//! Uploads are checked by recomputing the S3 multipart ETag locally and
//! comparing it with the ETag the store serves for the object.

use crate::{
    errors::ArchiveResult,
    services::{object_storage::ObjectStorage, recording_source::RecordingSource},
};
use md5::{Context, Digest};
use std::{io, path::Path};
use tokio::{fs::File, io::AsyncReadExt};
use tracing::debug;

/// Part size used for multipart uploads and the matching ETag computation.
pub const MULTIPART_CHUNK_SIZE: usize = 8 * 1024 * 1024;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// CRC32 (IEEE) of a whole file.
pub async fn crc32_of_file(path: &Path) -> io::Result<u32> {
    let mut file = File::open(path).await?;
    let mut hasher = crc32fast::Hasher::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

/// Whether the lowercase hex CRC appears anywhere in the log text.
pub fn crc_in_log(crc: u32, log: &str) -> bool {
    log.to_ascii_lowercase().contains(&format!("{:x}", crc))
}

/// S3-style ETag of a file uploaded in [`MULTIPART_CHUNK_SIZE`] parts,
/// including the surrounding quotes:
///
/// - no bytes: `""`
/// - one part: `"<md5>"`
/// - n parts: `"<md5 of concatenated part digests>-n"`
pub async fn multipart_etag(path: &Path) -> io::Result<String> {
    let mut file = File::open(path).await?;
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut digests: Vec<Digest> = Vec::new();
    let mut context = Context::new();
    let mut in_chunk = 0usize;

    loop {
        let want = (MULTIPART_CHUNK_SIZE - in_chunk).min(buf.len());
        let n = file.read(&mut buf[..want]).await?;
        if n == 0 {
            break;
        }
        context.consume(&buf[..n]);
        in_chunk += n;
        if in_chunk == MULTIPART_CHUNK_SIZE {
            digests.push(std::mem::replace(&mut context, Context::new()).compute());
            in_chunk = 0;
        }
    }
    if in_chunk > 0 {
        digests.push(context.compute());
    }

    Ok(match digests.as_slice() {
        [] => "\"\"".to_string(),
        [single] => format!("\"{:x}\"", single),
        parts => {
            let joined: Vec<u8> = parts.iter().flat_map(|d| d.0).collect();
            format!("\"{:x}-{}\"", md5::compute(joined), parts.len())
        }
    })
}

/// Compare a computed (quoted) ETag with the header a store returned.
/// Stores differ on whether they keep the quotes, so both forms match.
pub fn etag_matches(computed: &str, validator: &str) -> bool {
    let bare = computed.trim_matches('"');
    validator.contains(computed) || (!bare.is_empty() && validator.trim_matches('"') == bare)
}

/// CRC32 of the local file is present in the recording's EPGStation log.
pub async fn local_checksum_matches_log(
    source: &dyn RecordingSource,
    path: &Path,
    index_url: &str,
) -> ArchiveResult<bool> {
    let crc = crc32_of_file(path).await?;
    let log = source.fetch_log(index_url).await?;
    let found = crc_in_log(crc, &log);
    debug!(crc = %format!("{:x}", crc), found, "checked crc against log");
    Ok(found)
}

/// The object served at `url` carries the ETag computed from the local file.
pub async fn content_hash_matches(
    storage: &dyn ObjectStorage,
    path: &Path,
    url: &str,
) -> ArchiveResult<bool> {
    let computed = multipart_etag(path).await?;
    let validator = storage.content_validator(url).await?;
    debug!(computed = %computed, validator = ?validator, "checked etag");
    Ok(validator.is_some_and(|value| etag_matches(&computed, &value)))
}
