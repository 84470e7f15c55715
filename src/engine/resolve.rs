//! Source resolution: turning a track job into something fetchable
//!
//! A job with a direct URL fetches that URL. Otherwise we build a search
//! query; with deep search enabled we probe the top results as metadata
//! only, score them against the job, and fetch the best acceptable
//! candidate. When nothing acceptable turns up we fall back to the
//! search engine's own top result.

use crate::config::ConvertConfig;
use crate::identity::normalize_text;
use crate::input::TrackJob;
use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::Deserialize;
use std::process::Stdio;
use std::sync::LazyLock;
use tokio::process::Command;
use tracing::{debug, warn};

static NON_QUERY_CHARS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\s]").unwrap());

/// Scoring tunables. Duration closeness dominates; artist and title
/// matches break ties between similarly long uploads.
const BASE_SCORE: f64 = 100.0;
const ARTIST_MATCH_BONUS: f64 = 25.0;
const TITLE_MATCH_BONUS: f64 = 15.0;
/// Candidates shorter than this are assumed to be shorts or previews.
/// Only enforced when the row carries no expected duration; otherwise the
/// configured bounds and the closeness penalty weed out clips.
const MIN_USEFUL_SECS: u64 = 60;

/// What the fetcher should pass to the downloader.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceSpec {
    /// A concrete URL, fetched as-is.
    Direct(String),
    /// A search query; the downloader takes its top result.
    Search(String),
}

impl SourceSpec {
    /// The positional target argument handed to the downloader.
    pub fn as_target(&self) -> String {
        match self {
            SourceSpec::Direct(url) => url.clone(),
            SourceSpec::Search(query) => format!("ytsearch1:{query}"),
        }
    }
}

/// One flat search result, as reported by the downloader's JSON dump.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchCandidate {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub uploader: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub webpage_url: Option<String>,
}

impl SearchCandidate {
    fn target_url(&self) -> String {
        self.webpage_url
            .clone()
            .or_else(|| self.url.clone())
            .unwrap_or_else(|| format!("https://www.youtube.com/watch?v={}", self.id))
    }

    fn uploader_name(&self) -> &str {
        self.uploader
            .as_deref()
            .or(self.channel.as_deref())
            .unwrap_or("")
    }
}

/// Build the search query: punctuation-stripped title and primary artist
/// plus the configured hint term.
pub fn build_query(job: &TrackJob, hint: &str) -> String {
    let title = NON_QUERY_CHARS.replace_all(&job.title, "");
    let artist = NON_QUERY_CHARS.replace_all(&job.primary_artist, "");
    let mut parts: Vec<&str> = Vec::new();
    let artist = artist.trim();
    let title = title.trim();
    if !artist.is_empty() {
        parts.push(artist);
    }
    if !title.is_empty() {
        parts.push(title);
    }
    if !hint.is_empty() {
        parts.push(hint);
    }
    parts.join(" ")
}

/// Resolve a job to a fetch target.
pub async fn resolve_source(
    job: &TrackJob,
    config: &ConvertConfig,
    deep_search: bool,
) -> SourceSpec {
    if let Some(url) = job.direct_source() {
        return SourceSpec::Direct(url.to_string());
    }

    let query = build_query(job, &config.search_hint);
    if !deep_search {
        return SourceSpec::Search(query);
    }

    match probe_candidates(&config.ytdlp_path, &query, config.deep_search_results).await {
        Ok(candidates) => match pick_best(job, &candidates, config) {
            Some(candidate) => {
                debug!("Deep search picked {:?} for {}", candidate.title, job.display_title());
                SourceSpec::Direct(candidate.target_url())
            }
            None => {
                debug!("No acceptable deep-search candidate for {}", job.display_title());
                SourceSpec::Search(query)
            }
        },
        Err(e) => {
            warn!("Deep search probe failed for {}: {e:#}", job.display_title());
            SourceSpec::Search(query)
        }
    }
}

/// Run a metadata-only search probe. Each stdout line is one JSON object.
pub async fn probe_candidates(
    ytdlp: &str,
    query: &str,
    count: usize,
) -> Result<Vec<SearchCandidate>> {
    let output = Command::new(ytdlp)
        .args([
            "--dump-json",
            "--flat-playlist",
            "--no-download",
            &format!("ytsearch{count}:{query}"),
        ])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .context("Failed to run search probe")?;

    if !output.status.success() {
        bail!("Search probe exited with {}", output.status);
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut candidates = Vec::new();
    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<SearchCandidate>(line) {
            Ok(candidate) => candidates.push(candidate),
            Err(e) => debug!("Skipping unparseable probe line: {e}"),
        }
    }
    Ok(candidates)
}

/// Score a candidate against the job, or `None` when it is unacceptable.
pub fn score_candidate(
    job: &TrackJob,
    candidate: &SearchCandidate,
    config: &ConvertConfig,
) -> Option<f64> {
    let duration = candidate.duration? as u64;
    if duration < config.duration_min_secs || duration > config.duration_max_secs {
        return None;
    }
    if job.duration_ms.is_none() && duration < MIN_USEFUL_SECS {
        return None;
    }

    let uploader = normalize_text(candidate.uploader_name());
    let artist = normalize_text(&job.primary_artist);
    let artist_matches = !artist.is_empty() && uploader.contains(&artist);
    let candidate_title = normalize_text(&candidate.title);
    let title_matches = title_words_in_order(&normalize_text(&job.title), &candidate_title);
    let artist_in_title = !artist.is_empty() && candidate_title.contains(&artist);

    // when we know the artist, require some evidence of it
    if !artist.is_empty() && !artist_matches && !artist_in_title {
        return None;
    }

    let mut score = BASE_SCORE;
    if let Some(expected_ms) = job.duration_ms {
        let expected = expected_ms / 1000;
        score -= (duration as i64 - expected as i64).abs() as f64;
    }
    if artist_matches {
        score += ARTIST_MATCH_BONUS;
    }
    if title_matches {
        score += TITLE_MATCH_BONUS;
    }
    Some(score)
}

fn pick_best<'a>(
    job: &TrackJob,
    candidates: &'a [SearchCandidate],
    config: &ConvertConfig,
) -> Option<&'a SearchCandidate> {
    candidates
        .iter()
        .filter_map(|c| score_candidate(job, c, config).map(|s| (c, s)))
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(c, _)| c)
}

/// Whether every word of `wanted` appears in `actual`, in order.
fn title_words_in_order(wanted: &str, actual: &str) -> bool {
    let mut haystack = actual;
    for word in wanted.split_whitespace() {
        match haystack.find(word) {
            Some(pos) => haystack = &haystack[pos + word.len()..],
            None => return false,
        }
    }
    !wanted.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::csv::TrackRow;
    use crate::input::rows_to_jobs;

    fn job(title: &str, artists: &str, duration_ms: Option<u64>) -> TrackJob {
        rows_to_jobs(
            vec![TrackRow {
                title: title.to_string(),
                artists: artists.to_string(),
                duration_ms,
                ..Default::default()
            }],
            false,
        )
        .remove(0)
    }

    fn candidate(title: &str, uploader: &str, duration: f64) -> SearchCandidate {
        SearchCandidate {
            id: "vid1".to_string(),
            title: title.to_string(),
            uploader: Some(uploader.to_string()),
            channel: None,
            duration: Some(duration),
            url: None,
            webpage_url: Some("https://example.com/watch?v=vid1".to_string()),
        }
    }

    #[test]
    fn test_build_query() {
        let j = job("Karma Police (Remastered)", "Radiohead", None);
        assert_eq!(build_query(&j, "audio"), "Radiohead Karma Police Remastered audio");
        assert_eq!(build_query(&j, ""), "Radiohead Karma Police Remastered");
    }

    #[test]
    fn test_search_target_format() {
        let spec = SourceSpec::Search("artist song audio".to_string());
        assert_eq!(spec.as_target(), "ytsearch1:artist song audio");
        let spec = SourceSpec::Direct("https://x/y".to_string());
        assert_eq!(spec.as_target(), "https://x/y");
    }

    #[test]
    fn test_score_rejects_bad_durations() {
        let config = ConvertConfig::default();
        let j = job("Song", "Band", Some(240_000));
        assert!(score_candidate(&j, &candidate("Band - Song", "Band", 20.0), &config).is_none());
        assert!(score_candidate(&j, &candidate("Band - Song", "Band", 3600.0), &config).is_none());
        assert!(
            score_candidate(&j, &candidate("Band - Song", "Band", 239.0), &config).is_some()
        );
    }

    #[test]
    fn test_configured_min_duration_respected_below_shorts_cutoff() {
        // default lower bound is 30 s; a 45 s track with a known expected
        // duration must be acceptable
        let config = ConvertConfig::default();
        let j = job("Jingle", "Band", Some(45_000));
        assert!(
            score_candidate(&j, &candidate("Band - Jingle", "Band", 45.0), &config).is_some()
        );
    }

    #[test]
    fn test_shorts_rejected_without_expected_duration() {
        let config = ConvertConfig::default();
        let j = job("Song", "Band", None);
        assert!(score_candidate(&j, &candidate("Band - Song", "Band", 45.0), &config).is_none());
        assert!(score_candidate(&j, &candidate("Band - Song", "Band", 200.0), &config).is_some());
    }

    #[test]
    fn test_score_requires_artist_evidence() {
        let config = ConvertConfig::default();
        let j = job("Song", "Band", Some(240_000));
        assert!(
            score_candidate(&j, &candidate("Some Song Cover", "RandomChannel", 240.0), &config)
                .is_none()
        );
        // artist in the title counts even when the uploader differs
        assert!(
            score_candidate(&j, &candidate("Band - Song", "LyricsChannel", 240.0), &config)
                .is_some()
        );
    }

    #[test]
    fn test_closer_duration_wins() {
        let config = ConvertConfig::default();
        let j = job("Song", "Band", Some(240_000));
        let close = score_candidate(&j, &candidate("Band - Song", "Band", 242.0), &config).unwrap();
        let far = score_candidate(&j, &candidate("Band - Song", "Band", 300.0), &config).unwrap();
        assert!(close > far);
    }

    #[test]
    fn test_pick_best_none_when_all_rejected() {
        let config = ConvertConfig::default();
        let j = job("Song", "Band", Some(240_000));
        let candidates = vec![candidate("Unrelated", "Other", 240.0)];
        assert!(pick_best(&j, &candidates, &config).is_none());
    }

    #[test]
    fn test_title_words_in_order() {
        assert!(title_words_in_order("karma police", "radiohead - karma police audio"));
        assert!(!title_words_in_order("karma police", "police karma"));
        assert!(!title_words_in_order("", "anything"));
    }

    #[tokio::test]
    async fn test_probe_missing_tool_errors() {
        let result = probe_candidates("/nonexistent/yt-dlp", "query", 3).await;
        assert!(result.is_err());
    }
}
