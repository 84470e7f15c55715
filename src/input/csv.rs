//! Tolerant CSV parsing for playlist exports
//!
//! Playlist exporters disagree on header names, so each field is resolved
//! through an ordered alias list. Headers are matched case-insensitively
//! and a UTF-8 BOM on the first header is ignored.

use anyhow::{Context, Result, bail};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// One raw playlist row after header resolution, before job construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackRow {
    pub title: String,
    pub artists: String,
    pub album: String,
    pub duration_ms: Option<u64>,
    pub source_url: Option<String>,
    pub track_uri: Option<String>,
}

/// Header aliases in priority order. The first alias present in the file wins.
const TITLE_ALIASES: &[&str] = &["track name", "track", "title", "song name", "name"];
const ARTIST_ALIASES: &[&str] = &["artist name(s)", "artist name", "artists", "artist"];
const ALBUM_ALIASES: &[&str] = &["album name", "album"];
const DURATION_ALIASES: &[&str] = &["duration (ms)", "duration ms", "duration"];
const URL_ALIASES: &[&str] = &["source url", "url", "link"];
const URI_ALIASES: &[&str] = &["track uri", "uri", "spotify uri"];

/// Read and normalize all rows from a playlist CSV file.
pub fn read_rows(path: &Path) -> Result<Vec<TrackRow>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open CSV file: {}", path.display()))?;
    rows_from_reader(file)
        .with_context(|| format!("Failed to parse CSV file: {}", path.display()))
}

/// Parse rows from any reader. Separated from [`read_rows`] for testing.
pub fn rows_from_reader<R: Read>(reader: R) -> Result<Vec<TrackRow>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = csv_reader
        .headers()
        .context("CSV file has no header row")?
        .clone();

    // Map of normalized header name -> column index
    let mut columns: HashMap<String, usize> = HashMap::new();
    for (idx, header) in headers.iter().enumerate() {
        let normalized = header.trim_start_matches('\u{feff}').trim().to_lowercase();
        columns.entry(normalized).or_insert(idx);
    }

    let title_col = resolve_column(&columns, TITLE_ALIASES);
    let artist_col = resolve_column(&columns, ARTIST_ALIASES);
    let album_col = resolve_column(&columns, ALBUM_ALIASES);
    let duration_col = resolve_column(&columns, DURATION_ALIASES);
    let url_col = resolve_column(&columns, URL_ALIASES);
    let uri_col = resolve_column(&columns, URI_ALIASES);

    if title_col.is_none() && artist_col.is_none() && url_col.is_none() && uri_col.is_none() {
        bail!("CSV has no recognizable track columns (expected e.g. \"Track Name\")");
    }

    let mut rows = Vec::new();
    for record in csv_reader.records() {
        let record = record.context("Failed to read CSV record")?;
        let field = |col: Option<usize>| -> String {
            col.and_then(|i| record.get(i))
                .unwrap_or_default()
                .trim()
                .to_string()
        };
        let optional = |col: Option<usize>| -> Option<String> {
            let value = field(col);
            (!value.is_empty()).then_some(value)
        };

        let duration_ms = optional(duration_col).and_then(|raw| match raw.parse::<u64>() {
            Ok(ms) => Some(ms),
            Err(_) => {
                debug!("Ignoring unparseable duration: {raw:?}");
                None
            }
        });

        rows.push(TrackRow {
            title: field(title_col),
            artists: field(artist_col),
            album: field(album_col),
            duration_ms,
            source_url: optional(url_col),
            track_uri: optional(uri_col),
        });
    }

    Ok(rows)
}

fn resolve_column(columns: &HashMap<String, usize>, aliases: &[&str]) -> Option<usize> {
    aliases.iter().find_map(|alias| columns.get(*alias).copied())
}
