//! Handlers that inspect, register, delete, or re-shape stored entries.

use super::{StdinConfirmer, finish, record};
use crate::{
    models::status::{EpgStatus, S3Status},
    services::lifecycle::{BatchReport, Confirmer, LifecycleEngine, ListRow},
};
use anyhow::{Context, Result, bail};
use futures::TryStreamExt;

/// `ls`: one table row per entry.
pub async fn list(
    engine: &LifecycleEngine,
    status: &str,
    fields: &[String],
    hide_status: bool,
) -> Result<()> {
    let rows = engine
        .list(status, fields, !hide_status)
        .await
        .context("listing entries failed")?;
    print!("{}", render_table(&rows));
    Ok(())
}

/// `info`: the stored record as pretty JSON.
pub async fn info(engine: &LifecycleEngine, ids: &[String]) -> Result<()> {
    let mut report = BatchReport::default();
    for id in ids {
        if let Some(entry) = record(&mut report, id, "info", engine.get_entry(id).await) {
            println!("{}", serde_json::to_string_pretty(&entry)?);
        }
    }
    finish(report)
}

/// `pending`: register new recordings and show everything still to download.
pub async fn pending(engine: &LifecycleEngine) -> Result<()> {
    let registered: Vec<_> = engine
        .discover_pending()
        .try_collect()
        .await
        .context("registering new recordings failed")?;
    for entry in &registered {
        println!("Registered {} {}", entry.id, entry.filename);
    }

    let pending = engine
        .entries_needing_download(false)
        .await
        .context("listing pending downloads failed")?;
    for entry in pending {
        println!("{} {} [{}]", entry.id, entry.filename, entry.epg_status);
    }
    Ok(())
}

/// `free`: remaining space on EPGStation.
pub async fn free(engine: &LifecycleEngine) -> Result<()> {
    let space = engine
        .free_space()
        .await
        .context("reading EPGStation free space failed")?;
    println!("{}", space.summary());
    Ok(())
}

/// `delete`: the local copy always (after confirmation), EPGStation and the
/// bucket only when asked for. Without `force`, remote deletes are offered
/// only for entries that were downloaded (EPGStation) or uploaded (bucket).
pub async fn delete(
    engine: &LifecycleEngine,
    ids: &[String],
    force: bool,
    epg: bool,
    s3: bool,
) -> Result<()> {
    let mut report = BatchReport::default();
    for id in ids {
        let result = delete_one(engine, id, force, epg, s3, &StdinConfirmer).await;
        record(&mut report, id, "delete", result);
    }
    finish(report)
}

async fn delete_one(
    engine: &LifecycleEngine,
    id: &str,
    force: bool,
    epg: bool,
    s3: bool,
    confirmer: &dyn Confirmer,
) -> crate::errors::ArchiveResult<()> {
    let entry = engine.get_entry(id).await?;
    let filename = &entry.filename;
    let ask = |prompt: String| force || confirmer.confirm(&prompt);

    if ask(format!("Do you really want to delete {} locally?", filename)) {
        println!("Deleting {}", filename);
        engine.delete_local(&entry.key).await?;
    }
    if epg
        && (force || entry.epg_status == EpgStatus::Downloaded)
        && ask(format!("Do you really want to delete {} from EPGStation?", filename))
    {
        println!("Deleting {} {} from EPGStation", entry.id, filename);
        engine.delete_remote_source(&entry.key, force).await?;
    }
    if s3
        && (force || entry.s3_status == S3Status::Uploaded)
        && ask(format!("Do you really want to delete {} from S3 / Spaces?", filename))
    {
        println!("Deleting {} {} from S3 / Spaces", entry.id, filename);
        engine.delete_remote_storage(&entry.key, force).await?;
    }
    Ok(())
}

/// `migrate`: upgrade legacy records in place.
pub async fn migrate(engine: &LifecycleEngine) -> Result<()> {
    println!("Migrating data");
    let summary = engine
        .reconcile_legacy_records()
        .await
        .context("migration failed")?;
    for key in &summary.upgraded {
        println!("Upgraded {}", key);
    }
    for (key, err) in &summary.failed {
        eprintln!("{}: migrate failed: {}", key, err);
    }
    println!(
        "Done: {} upgraded, {} already current, {} failed",
        summary.upgraded.len(),
        summary.unchanged,
        summary.failed.len()
    );
    if !summary.failed.is_empty() {
        bail!("{} records could not be upgraded", summary.failed.len());
    }
    Ok(())
}

/// `generate`: write and upload `uploads.html`.
pub async fn generate(engine: &LifecycleEngine) -> Result<()> {
    let path = engine
        .publish_index()
        .await
        .context("generating the index failed")?;
    println!("Generated {}", path.display());
    Ok(())
}

/// Left-aligned columns under a dashed header, two spaces apart.
fn render_table(rows: &[ListRow]) -> String {
    let Some(first) = rows.first() else {
        return String::new();
    };
    let headers: Vec<&str> = first.columns.iter().map(|(name, _)| name.as_str()).collect();
    let cell = |row: &ListRow, column: &str| row.get(column).unwrap_or("-").to_string();

    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, header) in headers.iter().enumerate() {
            widths[i] = widths[i].max(cell(row, header).chars().count());
        }
    }

    let line = |cells: Vec<String>| {
        let padded: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(value, width)| {
                let pad = width.saturating_sub(value.chars().count());
                format!("{}{}", value, " ".repeat(pad))
            })
            .collect();
        format!("{}\n", padded.join("  ").trim_end())
    };

    let mut out = line(headers.iter().map(|h| h.to_string()).collect());
    out.push_str(&line(widths.iter().map(|w| "-".repeat(*w)).collect()));
    for row in rows {
        out.push_str(&line(headers.iter().map(|h| cell(row, h)).collect()));
    }
    out
}
