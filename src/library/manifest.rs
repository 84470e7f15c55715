//! Per-folder download manifest
//!
//! A hidden JSON file in each destination folder recording the identity
//! keys of everything downloaded there. Seeds the existing-output scan on
//! later runs so incremental mode can skip satisfied tracks without
//! opening every audio file.

use crate::identity::IdentityKey;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::debug;

pub const MANIFEST_FILE: &str = ".playlist2media-manifest.json";
const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub version: u32,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    /// Encoded identity keys, sorted for stable diffs.
    #[serde(default)]
    pub keys: Vec<String>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION,
            updated_at: Utc::now(),
            keys: Vec::new(),
        }
    }
}

impl Manifest {
    /// Load the manifest from a destination folder.
    ///
    /// Missing or corrupt manifests yield `None`; a bad manifest never
    /// blocks a run, it just costs re-scanning.
    pub fn load(dir: &Path) -> Option<Self> {
        let path = dir.join(MANIFEST_FILE);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) => {
                debug!("No manifest at {}: {e}", path.display());
                return None;
            }
        };
        match serde_json::from_str(&contents) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                debug!("Ignoring unreadable manifest at {}: {e}", path.display());
                None
            }
        }
    }

    /// Write the manifest into a destination folder.
    pub fn save(&self, dir: &Path) -> Result<()> {
        let path = dir.join(MANIFEST_FILE);
        let json =
            serde_json::to_string_pretty(self).context("Failed to serialize manifest")?;
        fs::write(&path, json)
            .with_context(|| format!("Failed to write manifest: {}", path.display()))?;
        debug!("Saved manifest with {} keys", self.keys.len());
        Ok(())
    }

    /// Decoded key set. Entries with unknown encodings are skipped.
    pub fn key_set(&self) -> HashSet<IdentityKey> {
        self.keys
            .iter()
            .filter_map(|k| IdentityKey::decode(k))
            .collect()
    }

    /// Merge newly satisfied keys in, dedupe, and bump the timestamp.
    pub fn merge(&mut self, new_keys: impl IntoIterator<Item = IdentityKey>) {
        let mut all: HashSet<String> = self.keys.drain(..).collect();
        all.extend(new_keys.into_iter().map(|k| k.encode()));
        self.keys = all.into_iter().collect();
        self.keys.sort();
        self.version = MANIFEST_VERSION;
        self.updated_at = Utc::now();
    }
}
