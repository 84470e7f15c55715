//! Track identity keys for duplicate detection
//!
//! A track is identified by the strongest available key: a stable service
//! track ID, else normalized title+artist metadata, else normalized title
//! alone. The same normalization runs on both the input side (CSV rows)
//! and the output side (scanning existing files), so the two agree.

use crate::input::TrackJob;
use regex::Regex;
use std::sync::LazyLock;
use url::Url;

static DASH_SPACING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+-\s*|\s*-\s+").unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static SERVICE_URI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9]*:track:([A-Za-z0-9]+)$").unwrap());

/// An identity key, strongest variant first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IdentityKey {
    /// Stable per-service track ID.
    Uri(String),
    /// Normalized `title::artist`.
    Metadata(String),
    /// Normalized title alone. Weakest; always emitted for input rows as a
    /// last-resort fallback, and derived from outputs only when no artist
    /// is known.
    TitleOnly(String),
}

impl IdentityKey {
    /// Encode for manifest storage.
    pub fn encode(&self) -> String {
        match self {
            IdentityKey::Uri(id) => format!("uri:{id}"),
            IdentityKey::Metadata(key) => format!("meta:{key}"),
            IdentityKey::TitleOnly(title) => format!("title:{title}"),
        }
    }

    /// Decode a manifest entry. Unknown prefixes are dropped so manifests
    /// written by newer versions still load.
    pub fn decode(encoded: &str) -> Option<Self> {
        if let Some(id) = encoded.strip_prefix("uri:") {
            Some(IdentityKey::Uri(id.to_string()))
        } else if let Some(key) = encoded.strip_prefix("meta:") {
            Some(IdentityKey::Metadata(key.to_string()))
        } else {
            encoded
                .strip_prefix("title:")
                .map(|t| IdentityKey::TitleOnly(t.to_string()))
        }
    }
}

/// Normalize free text for identity comparison.
///
/// Lowercases, folds en/em dashes to hyphens, strips everything but
/// alphanumerics, whitespace, and hyphens, then collapses whitespace and
/// regularizes spacing around hyphens that act as separators.
pub fn normalize_text(text: &str) -> String {
    let lowered = text.to_lowercase();
    let dashed: String = lowered
        .chars()
        .map(|c| match c {
            '\u{2013}' | '\u{2014}' => '-',
            _ => c,
        })
        .collect();
    let kept: String = dashed
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '-')
        .collect();
    let collapsed = WHITESPACE.replace_all(kept.trim(), " ");
    DASH_SPACING.replace_all(&collapsed, " - ").to_string()
}

/// Extract a stable track ID from a service URI or share URL.
///
/// Recognizes `service:track:<id>` URIs and URLs whose path contains a
/// `/track/<id>` segment pair.
pub fn extract_track_id(uri: &str) -> Option<String> {
    if let Some(captures) = SERVICE_URI.captures(uri.trim()) {
        return Some(captures[1].to_string());
    }
    let parsed = Url::parse(uri.trim()).ok()?;
    let segments: Vec<&str> = parsed.path_segments()?.collect();
    segments
        .windows(2)
        .find(|pair| pair[0] == "track" && !pair[1].is_empty())
        .map(|pair| pair[1].to_string())
}

/// All identity keys for a job, strongest first.
///
/// A job is considered already satisfied when ANY of its candidate keys
/// appears in the existing-output key set.
pub fn candidate_keys(job: &TrackJob) -> Vec<IdentityKey> {
    let mut keys = Vec::with_capacity(3);

    let uris: Vec<&str> = [job.track_uri.as_deref(), job.source_url.as_deref()]
        .into_iter()
        .flatten()
        .collect();
    match uris.iter().find_map(|uri| extract_track_id(uri)) {
        Some(id) => keys.push(IdentityKey::Uri(id)),
        // unrecognized references still dedupe on the raw string
        None => {
            if let Some(raw) = uris.first() {
                keys.push(IdentityKey::Uri(raw.to_string()));
            }
        }
    }

    let title = normalize_text(&job.title);
    if !title.is_empty() {
        let artist = normalize_text(&job.primary_artist);
        if !artist.is_empty() {
            keys.push(IdentityKey::Metadata(format!("{title}::{artist}")));
        }
        keys.push(IdentityKey::TitleOnly(title));
    }

    keys
}

/// The metadata-or-weaker key for an already-downloaded file, given its
/// tagged or filename-derived title and artist.
pub fn output_key(title: &str, artist: &str) -> Option<IdentityKey> {
    let title = normalize_text(title);
    if title.is_empty() {
        return None;
    }
    let artist = normalize_text(artist);
    if artist.is_empty() {
        Some(IdentityKey::TitleOnly(title))
    } else {
        Some(IdentityKey::Metadata(format!("{title}::{artist}")))
    }
}
