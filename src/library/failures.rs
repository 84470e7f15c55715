//! Failure report CSV
//!
//! After a run with failures, a `<playlist>_not_found.csv` lands next to
//! the output folder so the user can retry or source those tracks manually.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct FailureRow {
    #[serde(rename = "Track Name")]
    pub title: String,
    #[serde(rename = "Artist Name(s)")]
    pub artists: String,
    #[serde(rename = "Album Name")]
    pub album: String,
    #[serde(rename = "Track Number")]
    pub index: usize,
    #[serde(rename = "Error")]
    pub error: String,
}

/// Write the failure report. No file is written when `failures` is empty.
pub fn write_failure_report(
    out_dir: &Path,
    playlist_name: &str,
    failures: &[FailureRow],
) -> Result<Option<PathBuf>> {
    if failures.is_empty() {
        return Ok(None);
    }

    let path = out_dir.join(format!("{playlist_name}_not_found.csv"));
    let mut writer = csv::Writer::from_path(&path)
        .with_context(|| format!("Failed to create failure report: {}", path.display()))?;
    for row in failures {
        writer.serialize(row).context("Failed to write failure row")?;
    }
    writer.flush().context("Failed to flush failure report")?;

    info!("Wrote failure report: {}", path.display());
    Ok(Some(path))
}
