//! Handlers that move bytes: downloads, uploads, and the flows built on them.

use super::{StdinConfirmer, finish, record};
use crate::{
    errors::ArchiveResult,
    services::lifecycle::{BatchReport, BestEffort, EntryReport, LifecycleEngine},
};
use anyhow::{Context, Result};

pub async fn download(engine: &LifecycleEngine, ids: &[String]) -> Result<()> {
    let mut report = BatchReport::default();
    for id in ids {
        let key = engine.key_for_identifier(id);
        println!("Downloading {}", id);
        if record(&mut report, id, "download", engine.download(&key).await).is_some() {
            println!("Download verified {}", id);
        }
    }
    finish(report)
}

pub async fn download_all(engine: &LifecycleEngine, retry_failed: bool) -> Result<()> {
    println!("Downloading to {}", engine.directory().display());
    let entries = engine
        .entries_needing_download(retry_failed)
        .await
        .context("listing pending downloads failed")?;

    let mut report = BatchReport::default();
    for entry in entries {
        println!("Downloading {} {}", entry.id, entry.filename);
        record(&mut report, &entry.id.to_string(), "download", engine.download(&entry.key).await);
    }
    finish(report)
}

pub async fn upload(
    engine: &LifecycleEngine,
    ids: &[String],
    force: bool,
    test: bool,
) -> Result<()> {
    println!("Uploading to S3");
    let mut report = BatchReport::default();
    for id in ids {
        let result = upload_one(engine, id, force, test).await;
        record(&mut report, id, "upload", result);
    }
    finish(report)
}

async fn upload_one(
    engine: &LifecycleEngine,
    id: &str,
    force: bool,
    test: bool,
) -> ArchiveResult<()> {
    let entry = engine.get_entry(id).await?;
    println!("Uploading {} {}", entry.id, entry.filename);
    if test {
        return Ok(());
    }
    match engine.upload(&entry.key, force).await? {
        Some(done) => print_sidecar_warnings(&done),
        None => println!("Skip {}: already uploaded", id),
    }
    Ok(())
}

pub async fn upload_all(engine: &LifecycleEngine, force: bool, test: bool) -> Result<()> {
    println!("Uploading to S3");
    let entries = engine
        .entries_needing_upload(force)
        .await
        .context("listing pending uploads failed")?;

    let mut report = BatchReport::default();
    for entry in entries {
        println!("Uploading {} {}", entry.id, entry.filename);
        if test {
            continue;
        }
        let id = entry.id.to_string();
        let result = engine.upload(&entry.key, force).await;
        if let Some(Some(done)) = record(&mut report, &id, "upload", result) {
            print_sidecar_warnings(&done);
        }
    }
    finish(report)
}

/// `get-crc`: rebuild missing `.log` notes from the archived objects.
pub async fn get_crc(engine: &LifecycleEngine, ids: &[String]) -> Result<()> {
    let mut report = BatchReport::default();
    for id in ids {
        let key = engine.key_for_identifier(id);
        match record(&mut report, id, "get-crc", engine.restore_crc_note(&key).await) {
            Some(Some(crc)) => println!("{}: crc32 {:x}", id, crc),
            Some(None) => println!("Skip {}: log exists", id),
            None => {}
        }
    }
    finish(report)
}

/// `pipeline`: download, upload, and clean up each id in turn.
pub async fn pipeline(engine: &LifecycleEngine, ids: &[String], force: bool) -> Result<()> {
    let report = engine.pipeline(ids, force, &StdinConfirmer).await;
    for id in &report.succeeded {
        println!("Archived {}", id);
    }
    for (id, err) in &report.failed {
        eprintln!("{}: pipeline failed: {}", id, err);
    }
    finish(report)
}

/// `auto`: the unattended sweep.
pub async fn auto(engine: &LifecycleEngine, purge: bool, retry_failed: bool) -> Result<()> {
    let sweep = engine
        .sweep(retry_failed, purge)
        .await
        .context("sweep failed")?;

    println!(
        "Downloaded {}, uploaded {}, failed {}",
        sweep.downloaded.len(),
        sweep.uploaded.len(),
        sweep.failed.len()
    );
    if let Some(index) = &sweep.index {
        println!("Generated {}", index.display());
    }
    for (key, err) in &sweep.failed {
        eprintln!("{}: auto failed: {}", key, err);
    }
    finish(BatchReport {
        succeeded: sweep.uploaded,
        failed: sweep.failed,
    })
}

/// `check`: re-verify downloads (the default) and/or uploads.
pub async fn check(
    engine: &LifecycleEngine,
    ids: &[String],
    download: bool,
    upload: bool,
) -> Result<()> {
    let download = download || !upload;
    let mut report = BatchReport::default();
    for id in ids {
        let key = engine.key_for_identifier(id);
        if download {
            if let Some(good) = record(&mut report, id, "check dl", engine.check_download(&key).await) {
                println!("{} dl: {}", id, verdict(good));
            }
        }
        if upload {
            if let Some(good) = record(&mut report, id, "check ul", engine.check_upload(&key).await) {
                println!("{} ul: {}", id, verdict(good));
            }
        }
    }
    finish(report)
}

fn verdict(good: bool) -> &'static str {
    if good { "Good" } else { "Bad" }
}

fn print_sidecar_warnings(report: &EntryReport) {
    for (kind, outcome) in &report.sidecars {
        if let BestEffort::Ignored(err) = outcome {
            eprintln!(
                "{}: {} not uploaded: {}",
                report.entry.id,
                report.entry.sidecar_filename(*kind),
                err
            );
        }
    }
}
