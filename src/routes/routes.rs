//! Maps each parsed subcommand onto its handler.
//!
//! ## Commands
//! - **Inspection**: `ls`/`list`, `info`, `free`/`show-free`
//! - **Registration**: `pending`
//! - **Transfers**: `download`/`dl`, `download-all`, `upload`, `upload-all`, `check`
//! - **Removal**: `delete`/`del`/`rm`
//! - **Flows**: `pipeline`, `auto`
//! - **Maintenance**: `migrate`, `generate`/`generate-html`, `get-crc`

use crate::{
    config::Command,
    handlers::{
        entry_handlers::{delete, free, generate, info, list, migrate, pending},
        transfer_handlers::{
            auto, check, download, download_all, get_crc, pipeline, upload, upload_all,
        },
    },
    services::lifecycle::LifecycleEngine,
};
use anyhow::Result;

/// Run `command` against `engine`. An error means at least one entry (or
/// the whole command) failed.
pub async fn dispatch(engine: &LifecycleEngine, command: Command) -> Result<()> {
    match command {
        Command::Ls {
            status,
            fields,
            hide_status,
        } => list(engine, &status, &fields, hide_status).await,
        Command::Info { ids } => info(engine, &ids).await,
        Command::Pending => pending(engine).await,
        Command::Download { ids } => download(engine, &ids).await,
        Command::DownloadAll { retry_failed } => download_all(engine, retry_failed).await,
        Command::Upload { ids, force, test } => upload(engine, &ids, force, test).await,
        Command::UploadAll { force, test } => upload_all(engine, force, test).await,
        Command::Delete {
            ids,
            force,
            epg,
            s3,
        } => delete(engine, &ids, force, epg, s3).await,
        Command::Free => free(engine).await,
        Command::Pipeline { ids, force } => pipeline(engine, &ids, force).await,
        Command::Auto {
            purge,
            retry_failed,
        } => auto(engine, purge, retry_failed).await,
        Command::Migrate => migrate(engine).await,
        Command::Check {
            ids,
            download: dl,
            upload: ul,
        } => check(engine, &ids, dl, ul).await,
        Command::GetCrc { ids } => get_crc(engine, &ids).await,
        Command::Generate => generate(engine).await,
    }
}
