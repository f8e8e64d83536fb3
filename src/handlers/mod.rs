//! Command handlers: everything the user sees on stdout lives here.
//! The engine does the work; handlers resolve identifiers, ask for
//! confirmation, print results, and turn batch failures into an error.

pub mod entry_handlers;
pub mod transfer_handlers;

use crate::{
    errors::ArchiveResult,
    services::lifecycle::{BatchReport, Confirmer},
};
use anyhow::{Result, bail};
use std::io::{self, BufRead, Write};
use tracing::error;

/// Asks on the terminal; anything but `y`/`yes` is a no.
pub struct StdinConfirmer;

impl Confirmer for StdinConfirmer {
    fn confirm(&self, prompt: &str) -> bool {
        let mut stdout = io::stdout().lock();
        if write!(stdout, "{} [y/N]: ", prompt)
            .and_then(|_| stdout.flush())
            .is_err()
        {
            return false;
        }
        drop(stdout);

        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(_) => is_yes(&answer),
            Err(_) => false,
        }
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Add one identifier's outcome to `report`, printing a failure as
/// `<id>: <action> failed: <reason>`.
pub fn record<T>(
    report: &mut BatchReport,
    id: &str,
    action: &str,
    result: ArchiveResult<T>,
) -> Option<T> {
    match result {
        Ok(value) => {
            report.succeeded.push(id.to_string());
            Some(value)
        }
        Err(err) => {
            eprintln!("{}: {} failed: {}", id, action, err);
            error!(id, action, error = %err, "command failed for entry");
            report.failed.push((id.to_string(), err));
            None
        }
    }
}

/// Fail the command when any identifier failed.
pub fn finish(report: BatchReport) -> Result<()> {
    if report.is_success() {
        return Ok(());
    }
    let ids: Vec<&str> = report.failed.iter().map(|(id, _)| id.as_str()).collect();
    bail!(
        "{} of {} failed: {}",
        report.failed.len(),
        report.failed.len() + report.succeeded.len(),
        ids.join(", ")
    )
}
