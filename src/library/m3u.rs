//! M3U playlist index generation
//!
//! Writes an extended M3U file listing every audio file in a destination
//! folder, ordered by numeric filename prefix when present, otherwise by
//! modification time.

use crate::library::scan::AUDIO_EXTENSIONS;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub file_name: String,
    pub modified: SystemTime,
}

/// Leading sequence number of a filename, e.g. `003 - Song.m4a` -> 3.
fn numeric_prefix(file_name: &str) -> Option<u32> {
    let digits: String = file_name.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    let rest = &file_name[digits.len()..];
    if rest.trim_start().starts_with('-') {
        digits.parse().ok()
    } else {
        None
    }
}

/// Playlist order: numbered entries first by prefix, unnumbered entries
/// after by modification time, name as the final tiebreaker.
pub fn order_entries(mut entries: Vec<IndexEntry>) -> Vec<IndexEntry> {
    entries.sort_by(|a, b| {
        let pa = numeric_prefix(&a.file_name);
        let pb = numeric_prefix(&b.file_name);
        match (pa, pb) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.modified.cmp(&b.modified),
        }
        .then_with(|| a.file_name.cmp(&b.file_name))
    });
    entries
}

/// Render extended M3U content with relative file names.
pub fn render_m3u(entries: &[IndexEntry]) -> String {
    let mut out = String::from("#EXTM3U\n");
    for entry in entries {
        let stem = Path::new(&entry.file_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&entry.file_name);
        out.push_str(&format!("#EXTINF:-1,{stem}\n{}\n", entry.file_name));
    }
    out
}

/// Scan `dir` and write `<playlist_name>.m3u8` inside it.
pub fn write_playlist_index(dir: &Path, playlist_name: &str) -> Result<PathBuf> {
    let mut entries = Vec::new();
    let read = fs::read_dir(dir)
        .with_context(|| format!("Failed to read output folder: {}", dir.display()))?;
    for entry in read.flatten() {
        let path = entry.path();
        let is_audio = path.is_file()
            && path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| AUDIO_EXTENSIONS.contains(&ext.to_lowercase().as_str()));
        if !is_audio {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        entries.push(IndexEntry {
            file_name: file_name.to_string(),
            modified,
        });
    }

    let entries = order_entries(entries);
    let index_path = dir.join(format!("{playlist_name}.m3u8"));
    fs::write(&index_path, render_m3u(&entries))
        .with_context(|| format!("Failed to write playlist index: {}", index_path.display()))?;
    debug!("Wrote playlist index with {} entries", entries.len());
    Ok(index_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn entry(name: &str, secs: u64) -> IndexEntry {
        IndexEntry {
            file_name: name.to_string(),
            modified: SystemTime::UNIX_EPOCH + Duration::from_secs(secs),
        }
    }

    #[test]
    fn test_numeric_prefix() {
        assert_eq!(numeric_prefix("003 - Song.m4a"), Some(3));
        assert_eq!(numeric_prefix("12- Song.mp3"), Some(12));
        assert_eq!(numeric_prefix("Song.m4a"), None);
        assert_eq!(numeric_prefix("99 Luftballons.mp3"), None);
    }

    #[test]
    fn test_order_prefixed_before_unprefixed() {
        let ordered = order_entries(vec![
            entry("Unnumbered.m4a", 50),
            entry("002 - B.m4a", 100),
            entry("001 - A.m4a", 200),
        ]);
        let names: Vec<&str> = ordered.iter().map(|e| e.file_name.as_str()).collect();
        assert_eq!(names, vec!["001 - A.m4a", "002 - B.m4a", "Unnumbered.m4a"]);
    }

    #[test]
    fn test_order_unprefixed_by_mtime() {
        let ordered = order_entries(vec![
            entry("Later.m4a", 300),
            entry("Earlier.m4a", 100),
        ]);
        assert_eq!(ordered[0].file_name, "Earlier.m4a");
    }

    #[test]
    fn test_render() {
        let content = render_m3u(&[entry("Artist - Song.m4a", 0)]);
        assert_eq!(content, "#EXTM3U\n#EXTINF:-1,Artist - Song\nArtist - Song.m4a\n");
    }

    #[test]
    fn test_write_index_skips_non_audio() {
        let dir = tempfile::TempDir::new().unwrap();
        fs::write(dir.path().join("Song.m4a"), b"x").unwrap();
        fs::write(dir.path().join("cover.jpg"), b"x").unwrap();
        let path = write_playlist_index(dir.path(), "My Mix").unwrap();
        let content = fs::read_to_string(path).unwrap();
        assert!(content.contains("Song.m4a"));
        assert!(!content.contains("cover.jpg"));
    }
}
