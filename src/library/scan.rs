//! Existing-output scan
//!
//! Builds the set of identity keys already satisfied in a destination
//! folder: manifest keys, keys derived from embedded tags, and keys
//! derived from filenames as a last resort. Unreadable files are skipped;
//! the scan never fails a run.

use crate::identity::{self, IdentityKey};
use crate::input::job::primary_artist;
use crate::library::manifest::Manifest;
use anyhow::{Context, Result};
use lofty::prelude::*;
use lofty::probe::Probe;
use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;
use tracing::debug;

pub const AUDIO_EXTENSIONS: &[&str] =
    &["mp3", "m4a", "aac", "opus", "ogg", "flac", "wav", "aiff"];

/// Sequence prefix we add with `--prefix-numbers`, stripped before keying.
static NUMERIC_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\s*-\s*").unwrap());

/// Collect every identity key already satisfied in `dir`.
pub fn existing_keys(dir: &Path) -> Result<HashSet<IdentityKey>> {
    let mut keys = match Manifest::load(dir) {
        Some(manifest) => manifest.key_set(),
        None => HashSet::new(),
    };

    let entries = fs::read_dir(dir)
        .with_context(|| format!("Failed to read output folder: {}", dir.display()))?;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() || !is_audio_file(&path) {
            continue;
        }
        keys.extend(file_keys(&path));
    }

    debug!("Found {} existing identity keys in {}", keys.len(), dir.display());
    Ok(keys)
}

fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            let ext = ext.to_lowercase();
            AUDIO_EXTENSIONS.contains(&ext.as_str())
        })
}

/// Identity keys for one audio file: tag-derived when the file has
/// readable title tags, plus a filename-derived fallback key.
fn file_keys(path: &Path) -> Vec<IdentityKey> {
    let mut keys = Vec::new();

    match read_tag_fields(path) {
        Ok(Some((title, artist))) => {
            if let Some(key) = identity::output_key(&title, &primary_artist(&artist)) {
                keys.push(key);
            }
        }
        Ok(None) => {}
        Err(e) => debug!("Could not read tags from {}: {e}", path.display()),
    }

    if let Some(key) = filename_key(path) {
        keys.push(key);
    }
    keys
}

fn read_tag_fields(path: &Path) -> Result<Option<(String, String)>> {
    let tagged_file = Probe::open(path)?.read()?;
    let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) else {
        return Ok(None);
    };
    let Some(title) = tag.title() else {
        return Ok(None);
    };
    let artist = tag.artist().map(|a| a.to_string()).unwrap_or_default();
    Ok(Some((title.to_string(), artist)))
}

/// Weak key from the filename stem, with any `NNN - ` prefix stripped.
fn filename_key(path: &Path) -> Option<IdentityKey> {
    let stem = path.file_stem()?.to_str()?;
    let stem = NUMERIC_PREFIX.replace(stem, "");

    // filenames written by this tool are "Artist - Title"; key both the
    // split form and the whole stem so either side matches
    if let Some((artist, title)) = stem.split_once(" - ") {
        identity::output_key(title, &primary_artist(artist))
    } else {
        identity::output_key(&stem, "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) {
        File::create(dir.join(name)).unwrap();
    }

    #[test]
    fn test_filename_keys_from_empty_files() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "Radiohead - Karma Police.m4a");
        touch(dir.path(), "003 - Daft Punk - One More Time.mp3");
        touch(dir.path(), "Lone Title.opus");
        touch(dir.path(), "notes.txt");

        let keys = existing_keys(dir.path()).unwrap();
        assert!(keys.contains(&IdentityKey::Metadata(
            "karma police::radiohead".to_string()
        )));
        assert!(keys.contains(&IdentityKey::Metadata(
            "one more time::daft punk".to_string()
        )));
        assert!(keys.contains(&IdentityKey::TitleOnly("lone title".to_string())));
        // non-audio files contribute nothing
        assert_eq!(keys.len(), 3);
    }

    #[test]
    fn test_manifest_keys_included() {
        let dir = TempDir::new().unwrap();
        let mut manifest = Manifest::default();
        manifest.merge([IdentityKey::Uri("seeded".to_string())]);
        manifest.save(dir.path()).unwrap();

        let keys = existing_keys(dir.path()).unwrap();
        assert!(keys.contains(&IdentityKey::Uri("seeded".to_string())));
    }

    #[test]
    fn test_missing_folder_errors() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert!(existing_keys(&missing).is_err());
    }

    #[test]
    fn test_unreadable_audio_file_skipped() {
        let dir = TempDir::new().unwrap();
        // not a real mp3; tag read fails, filename key still applies
        fs::write(dir.path().join("Band - Song.mp3"), b"garbage").unwrap();
        let keys = existing_keys(dir.path()).unwrap();
        assert!(keys.contains(&IdentityKey::Metadata("song::band".to_string())));
    }
}
