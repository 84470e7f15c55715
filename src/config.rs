//! Application configuration
//!
//! Tunables live in a JSON file under the platform config directory.
//! A missing or unreadable file falls back to defaults; individual
//! missing fields fall back per-field.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertConfig {
    /// Disambiguation term appended to search queries.
    pub search_hint: String,
    /// Candidates shorter than this are rejected during deep search.
    pub duration_min_secs: u64,
    /// Candidates longer than this are rejected during deep search.
    pub duration_max_secs: u64,
    /// How many search results the deep-search probe requests.
    pub deep_search_results: usize,
    /// Parallel download workers when `-w` is not given.
    pub default_workers: usize,
    /// Sample rate for the uncompressed AIFF transcode path.
    pub sample_rate: u32,
    pub ytdlp_path: String,
    pub ffmpeg_path: String,
    /// Passed to yt-dlp as `--ffmpeg-location` when set.
    pub ffmpeg_location: Option<PathBuf>,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            search_hint: "audio".to_string(),
            duration_min_secs: 30,
            duration_max_secs: 600,
            deep_search_results: 5,
            default_workers: 3,
            sample_rate: 44100,
            ytdlp_path: "yt-dlp".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
            ffmpeg_location: None,
        }
    }
}

impl ConvertConfig {
    fn config_path() -> Result<PathBuf> {
        let dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("playlist2media");
        Ok(dir.join("config.json"))
    }

    /// Load the config file, falling back to defaults if absent or broken.
    pub fn load() -> Self {
        let path = match Self::config_path() {
            Ok(path) => path,
            Err(e) => {
                debug!("No config directory: {e}");
                return Self::default();
            }
        };
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => config,
                Err(e) => {
                    debug!("Ignoring unreadable config at {}: {e}", path.display());
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

}
