//! `<file>.mediainfo.json` sidecar produced by the external `mediainfo` tool.

use crate::errors::{ArchiveError, ArchiveResult};
use serde_json::Value;
use std::path::Path;
use tracing::debug;

#[derive(Clone, Debug)]
pub struct MediaInfoTool {
    program: String,
}

impl Default for MediaInfoTool {
    fn default() -> Self {
        Self::new("mediainfo")
    }
}

impl MediaInfoTool {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Run `mediainfo --Output=JSON` on `media` and store the pretty-printed
    /// report at `sidecar`. Nothing is written unless the tool succeeds and
    /// prints valid JSON.
    pub async fn write_sidecar(&self, media: &Path, sidecar: &Path) -> ArchiveResult<()> {
        let output = tokio::process::Command::new(&self.program)
            .arg("--Output=JSON")
            .arg(media)
            .output()
            .await
            .map_err(|e| {
                ArchiveError::MediaInfo(format!("failed to execute {}: {}", self.program, e))
            })?;

        if !output.status.success() {
            return Err(ArchiveError::MediaInfo(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let report: Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| ArchiveError::MediaInfo(format!("unreadable report: {}", e)))?;
        tokio::fs::write(sidecar, serde_json::to_vec_pretty(&report)?).await?;
        debug!(sidecar = %sidecar.display(), "wrote mediainfo report");
        Ok(())
    }
}
