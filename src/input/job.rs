//! Track job construction from normalized CSV rows

use crate::input::csv::TrackRow;
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

/// Separators between the primary artist and featured or joint artists.
static ARTIST_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i),|/|&|\sfeat\.|\sft\.").unwrap());

/// Title markers for tracks we can skip when instrumental filtering is on.
const INSTRUMENTAL_MARKERS: &[&str] = &["instrumental", "karaoke", "8d audio"];

/// A single unit of download work, carrying everything the engine needs.
#[derive(Debug, Clone)]
pub struct TrackJob {
    /// 1-based sequence index, assigned after filtering.
    pub index: usize,
    pub title: String,
    pub artists: String,
    pub primary_artist: String,
    pub album: String,
    pub duration_ms: Option<u64>,
    pub source_url: Option<String>,
    pub track_uri: Option<String>,
}

impl TrackJob {
    /// Human-facing label, also the basis for the output filename.
    pub fn display_title(&self) -> String {
        if self.artists.is_empty() {
            self.title.clone()
        } else if self.title.is_empty() {
            self.artists.clone()
        } else {
            format!("{} - {}", self.artists, self.title)
        }
    }

    /// A directly fetchable URL, when the row carried one.
    ///
    /// A track URI only qualifies when it is itself an http(s) URL;
    /// service URIs like `spotify:track:...` are identity-only.
    pub fn direct_source(&self) -> Option<&str> {
        if let Some(url) = self.source_url.as_deref() {
            return Some(url);
        }
        self.track_uri
            .as_deref()
            .filter(|uri| uri.starts_with("http://") || uri.starts_with("https://"))
    }
}

/// First artist listed, with featured and joint credits stripped.
pub fn primary_artist(artists: &str) -> String {
    ARTIST_SEPARATOR
        .split(artists)
        .next()
        .unwrap_or("")
        .trim()
        .to_string()
}

/// Whether a title marks the track as a version we skip under
/// instrumental filtering.
pub fn looks_instrumental(title: &str) -> bool {
    let lower = title.to_lowercase();
    INSTRUMENTAL_MARKERS.iter().any(|m| lower.contains(m))
}

/// Build the job list: drop unusable rows, optionally drop instrumental
/// versions, and assign 1-based indices to what remains.
pub fn rows_to_jobs(rows: Vec<TrackRow>, exclude_instrumentals: bool) -> Vec<TrackJob> {
    let mut jobs = Vec::with_capacity(rows.len());
    for row in rows {
        let identifiable = !row.title.is_empty()
            || !row.artists.is_empty()
            || row.source_url.is_some()
            || row.track_uri.is_some();
        if !identifiable {
            debug!("Skipping row with no identifying fields");
            continue;
        }
        if exclude_instrumentals && looks_instrumental(&row.title) {
            debug!("Excluding instrumental track: {}", row.title);
            continue;
        }
        jobs.push(TrackJob {
            index: jobs.len() + 1,
            primary_artist: primary_artist(&row.artists),
            title: row.title,
            artists: row.artists,
            album: row.album,
            duration_ms: row.duration_ms,
            source_url: row.source_url,
            track_uri: row.track_uri,
        });
    }
    jobs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(title: &str, artists: &str) -> TrackRow {
        TrackRow {
            title: title.to_string(),
            artists: artists.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_primary_artist_separators() {
        assert_eq!(primary_artist("Daft Punk, Pharrell Williams"), "Daft Punk");
        assert_eq!(primary_artist("Simon & Garfunkel"), "Simon");
        assert_eq!(primary_artist("Artist feat. Someone"), "Artist");
        assert_eq!(primary_artist("Artist ft. Someone"), "Artist");
        assert_eq!(primary_artist("AC/DC"), "AC");
        assert_eq!(primary_artist("Radiohead"), "Radiohead");
        assert_eq!(primary_artist(""), "");
    }

    #[test]
    fn test_display_title() {
        let jobs = rows_to_jobs(vec![row("Title", "Artist")], false);
        assert_eq!(jobs[0].display_title(), "Artist - Title");

        let jobs = rows_to_jobs(vec![row("Only Title", "")], false);
        assert_eq!(jobs[0].display_title(), "Only Title");
    }

    #[test]
    fn test_unusable_rows_dropped_and_reindexed() {
        let rows = vec![row("A", "X"), row("", ""), row("B", "Y")];
        let jobs = rows_to_jobs(rows, false);
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].index, 1);
        assert_eq!(jobs[1].index, 2);
        assert_eq!(jobs[1].title, "B");
    }

    #[test]
    fn test_instrumental_filter() {
        let rows = vec![
            row("Song (Instrumental)", "X"),
            row("Song KARAOKE Version", "X"),
            row("Song (8D Audio)", "X"),
            row("Song", "X"),
        ];
        assert_eq!(rows_to_jobs(rows.clone(), true).len(), 1);
        assert_eq!(rows_to_jobs(rows, false).len(), 4);
    }

    #[test]
    fn test_direct_source() {
        let mut r = row("T", "A");
        r.track_uri = Some("spotify:track:abc".to_string());
        let jobs = rows_to_jobs(vec![r], false);
        assert_eq!(jobs[0].direct_source(), None);

        let mut r = row("T", "A");
        r.track_uri = Some("https://open.spotify.com/track/abc".to_string());
        let jobs = rows_to_jobs(vec![r], false);
        assert_eq!(
            jobs[0].direct_source(),
            Some("https://open.spotify.com/track/abc")
        );

        let mut r = row("T", "A");
        r.source_url = Some("https://youtu.be/xyz".to_string());
        r.track_uri = Some("spotify:track:abc".to_string());
        let jobs = rows_to_jobs(vec![r], false);
        assert_eq!(jobs[0].direct_source(), Some("https://youtu.be/xyz"));
    }
}
