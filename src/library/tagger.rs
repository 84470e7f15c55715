//! Best-effort metadata tagging of downloaded files

use crate::input::TrackJob;
use anyhow::{Context, Result};
use lofty::config::WriteOptions;
use lofty::prelude::*;
use lofty::probe::Probe;
use lofty::tag::Tag;
use std::path::Path;
use tracing::{debug, warn};

/// Write title, artist, album, and track number tags from the source row.
///
/// Overrides whatever the downloader embedded, since the playlist metadata
/// is authoritative for these fields.
pub fn write_tags(path: &Path, job: &TrackJob) -> Result<()> {
    let mut tagged_file = Probe::open(path)
        .with_context(|| format!("Failed to open audio file: {}", path.display()))?
        .read()
        .context("Failed to read audio file tags")?;

    let tag = match tagged_file.primary_tag_mut() {
        Some(tag) => tag,
        None => {
            if let Some(tag) = tagged_file.first_tag_mut() {
                tag
            } else {
                let tag_type = tagged_file.primary_tag_type();
                tagged_file.insert_tag(Tag::new(tag_type));
                tagged_file
                    .primary_tag_mut()
                    .context("Failed to create tag")?
            }
        }
    };

    if !job.title.is_empty() {
        tag.set_title(job.title.clone());
    }
    if !job.artists.is_empty() {
        tag.set_artist(job.artists.clone());
    }
    if !job.album.is_empty() {
        tag.set_album(job.album.clone());
    }
    tag.set_track(job.index as u32);

    tagged_file
        .save_to_path(path, WriteOptions::default())
        .context("Failed to save tags")?;
    debug!("Tagged {}", path.display());
    Ok(())
}

/// Tag a file, logging and swallowing any failure. A download that cannot
/// be tagged is still a successful download.
pub fn write_tags_best_effort(path: &Path, job: &TrackJob) {
    if let Err(e) = write_tags(path, job) {
        warn!("Could not tag {}: {e:#}", path.display());
    }
}
