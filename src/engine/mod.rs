//! Convert engine: dedupe, schedule, download, and record

pub mod events;
pub mod fetch;
pub mod resolve;

pub use events::{ConvertEvent, EventSink};
pub use fetch::{AudioFormat, FetchError, Fetcher};

use crate::config::ConvertConfig;
use crate::identity::{self, IdentityKey};
use crate::input::{self, TrackJob};
use crate::library::{self, FailureRow, Manifest};
use crate::utils::{sanitize_dirname, sanitize_filename};
use anyhow::{Context, Result};
use futures::{StreamExt, stream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::{info, warn};

/// Upper bound on parallel downloads, regardless of what was asked for.
const MAX_WORKERS: usize = 8;

#[derive(Debug, Clone)]
pub struct ConvertOptions {
    pub format: AudioFormat,
    /// Parallel workers; `None` takes the configured default.
    pub workers: Option<usize>,
    pub deep_search: bool,
    pub prefix_numbers: bool,
    pub generate_m3u: bool,
    pub exclude_instrumentals: bool,
    /// Skip tracks already present in the destination.
    pub incremental: bool,
    pub embed_thumbnail: bool,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            format: AudioFormat::M4a,
            workers: None,
            deep_search: true,
            prefix_numbers: false,
            generate_m3u: true,
            exclude_instrumentals: false,
            incremental: true,
            embed_thumbnail: false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum JobStatus {
    SkippedExisting,
    Succeeded(PathBuf),
    Failed(String),
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct DownloadResult {
    pub index: usize,
    pub title: String,
    pub artists: String,
    pub album: String,
    pub status: JobStatus,
    pub keys: Vec<IdentityKey>,
}

#[derive(Debug, Default)]
pub struct ConvertReport {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub out_dir: PathBuf,
    pub results: Vec<DownloadResult>,
}

/// Orchestrates a whole playlist conversion.
pub struct ConvertEngine {
    config: ConvertConfig,
    options: ConvertOptions,
    events: EventSink,
    cancel: Arc<AtomicBool>,
}

impl ConvertEngine {
    pub fn new(config: ConvertConfig, options: ConvertOptions, events: EventSink) -> Self {
        Self {
            config,
            options,
            events,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle front-ends use to request cancellation.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Convert a playlist CSV into a folder of tagged audio files.
    ///
    /// Output goes to `<output_root>/<playlist name>`, where the playlist
    /// name defaults to the CSV file stem.
    pub async fn convert_csv(
        &self,
        csv_path: &Path,
        output_root: &Path,
        playlist_name: Option<&str>,
    ) -> Result<ConvertReport> {
        let name = playlist_name
            .map(str::to_string)
            .or_else(|| {
                csv_path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "playlist".to_string());
        let name = sanitize_dirname(&name);

        let rows = input::read_rows(csv_path)?;
        let jobs = input::rows_to_jobs(rows, self.options.exclude_instrumentals);

        let out_dir = output_root.join(&name);
        std::fs::create_dir_all(&out_dir)
            .with_context(|| format!("Failed to create output folder: {}", out_dir.display()))?;

        self.convert_jobs(jobs, &out_dir, &name).await
    }

    /// Run the full pipeline over prepared jobs.
    pub async fn convert_jobs(
        &self,
        jobs: Vec<TrackJob>,
        out_dir: &Path,
        playlist_name: &str,
    ) -> Result<ConvertReport> {
        let total = jobs.len();

        let existing = if self.options.incremental {
            self.events
                .emit(ConvertEvent::Status("Scanning existing downloads".to_string()));
            library::existing_keys(out_dir)?
        } else {
            Default::default()
        };

        let mut pending = Vec::new();
        let mut results: Vec<DownloadResult> = Vec::with_capacity(total);
        for job in jobs {
            let keys = identity::candidate_keys(&job);
            if keys.iter().any(|k| existing.contains(k)) {
                results.push(DownloadResult {
                    index: job.index,
                    title: job.title.clone(),
                    artists: job.artists.clone(),
                    album: job.album.clone(),
                    status: JobStatus::SkippedExisting,
                    keys,
                });
            } else {
                pending.push(job);
            }
        }

        self.events.emit(ConvertEvent::BatchInit {
            new: pending.len(),
            total,
        });
        for result in &results {
            self.events.emit(ConvertEvent::JobSkipped {
                index: result.index,
                title: result.title.clone(),
            });
        }

        let workers = self
            .options
            .workers
            .unwrap_or(self.config.default_workers)
            .clamp(1, MAX_WORKERS);
        info!("Downloading {} tracks with {workers} workers", pending.len());

        let fetcher = Fetcher {
            ytdlp: self.config.ytdlp_path.clone(),
            ffmpeg: self.config.ffmpeg_path.clone(),
            ffmpeg_location: self.config.ffmpeg_location.clone(),
            sample_rate: self.config.sample_rate,
            embed_thumbnail: self.options.embed_thumbnail,
        };

        // destinations are fixed up-front so parallel workers never race
        // over colliding names
        let dispatched = self.assign_destinations(pending, out_dir);
        let batch_size = dispatched.len();
        let completed = AtomicUsize::new(0);
        let downloaded: Vec<DownloadResult> = stream::iter(dispatched)
            .map(|(job, dest)| {
                let completed = &completed;
                let fetcher = &fetcher;
                async move {
                    let result = self.run_job(job, dest, fetcher).await;
                    self.events.emit(ConvertEvent::Overall {
                        completed: completed.fetch_add(1, Ordering::Relaxed) + 1,
                        total: batch_size,
                    });
                    result
                }
            })
            .buffer_unordered(workers)
            .collect()
            .await;
        results.extend(downloaded);
        results.sort_by_key(|r| r.index);

        self.record_outcome(&results, out_dir, playlist_name);

        let mut report = ConvertReport {
            out_dir: out_dir.to_path_buf(),
            ..Default::default()
        };
        for result in &results {
            match result.status {
                JobStatus::SkippedExisting => report.skipped += 1,
                JobStatus::Succeeded(_) => report.succeeded += 1,
                JobStatus::Failed(_) => report.failed += 1,
                JobStatus::Cancelled => report.cancelled += 1,
            }
        }
        report.results = results;

        if self.cancel.load(Ordering::Relaxed) {
            self.events.emit(ConvertEvent::BatchCancelled);
        }
        self.events.emit(ConvertEvent::Complete {
            succeeded: report.succeeded,
            skipped: report.skipped,
            failed: report.failed,
        });
        Ok(report)
    }

    /// Compute a unique destination path per job. Duplicate display titles
    /// within one batch get a ` (n)` suffix.
    fn assign_destinations(
        &self,
        jobs: Vec<TrackJob>,
        out_dir: &Path,
    ) -> Vec<(TrackJob, PathBuf)> {
        let extension = self.options.format.extension();
        let mut used: std::collections::HashSet<String> = Default::default();
        jobs.into_iter()
            .map(|job| {
                let mut base = sanitize_filename(&job.display_title());
                if self.options.prefix_numbers {
                    base = format!("{:03} - {base}", job.index);
                }
                let mut name = base.clone();
                let mut n = 1;
                while !used.insert(name.clone()) {
                    n += 1;
                    name = format!("{base} ({n})");
                }
                let dest = out_dir.join(format!("{name}.{extension}"));
                (job, dest)
            })
            .collect()
    }

    async fn run_job(&self, job: TrackJob, dest: PathBuf, fetcher: &Fetcher) -> DownloadResult {
        let keys = identity::candidate_keys(&job);
        let mut result = DownloadResult {
            index: job.index,
            title: job.title.clone(),
            artists: job.artists.clone(),
            album: job.album.clone(),
            status: JobStatus::Cancelled,
            keys,
        };

        if self.cancel.load(Ordering::Relaxed) {
            return result;
        }

        self.events.emit(ConvertEvent::JobInit {
            index: job.index,
            title: job.display_title(),
        });

        let spec = resolve::resolve_source(&job, &self.config, self.options.deep_search).await;
        match fetcher
            .fetch(
                job.index,
                &spec,
                &dest,
                self.options.format,
                &self.events,
                &self.cancel,
            )
            .await
        {
            Ok(path) => {
                library::tagger::write_tags_best_effort(&path, &job);
                self.events.emit(ConvertEvent::JobDone { index: job.index });
                result.status = JobStatus::Succeeded(path);
            }
            Err(FetchError::Cancelled) => {
                result.status = JobStatus::Cancelled;
            }
            Err(e) => {
                let message = e.to_string();
                self.events.emit(ConvertEvent::JobFailed {
                    index: job.index,
                    message: message.clone(),
                });
                result.status = JobStatus::Failed(message);
            }
        }
        result
    }

    /// Post-run bookkeeping. None of it may fail the batch; problems are
    /// logged and the downloads stand.
    fn record_outcome(&self, results: &[DownloadResult], out_dir: &Path, playlist_name: &str) {
        let new_keys: Vec<IdentityKey> = results
            .iter()
            .filter(|r| matches!(r.status, JobStatus::Succeeded(_)))
            .flat_map(|r| r.keys.iter().cloned())
            .collect();
        let mut manifest = Manifest::load(out_dir).unwrap_or_default();
        manifest.merge(new_keys);
        if let Err(e) = manifest.save(out_dir) {
            warn!("Could not save manifest: {e:#}");
        }

        if self.options.generate_m3u {
            if let Err(e) = library::write_playlist_index(out_dir, playlist_name) {
                warn!("Could not write playlist index: {e:#}");
            }
        }

        let failures: Vec<FailureRow> = results
            .iter()
            .filter_map(|r| match &r.status {
                JobStatus::Failed(message) => Some(FailureRow {
                    title: r.title.clone(),
                    artists: r.artists.clone(),
                    album: r.album.clone(),
                    index: r.index,
                    error: message.clone(),
                }),
                _ => None,
            })
            .collect();
        if let Err(e) = library::write_failure_report(out_dir, playlist_name, &failures) {
            warn!("Could not write failure report: {e:#}");
        }
    }
}
