//! Download execution via yt-dlp
//!
//! Spawns the downloader per job, streams its output line by line for
//! progress parsing and cancellation checks, and classifies the outcome.
//! AIFF output takes a two-stage path: yt-dlp emits an m4a intermediate,
//! ffmpeg transcodes it to big-endian PCM, and the intermediate is removed.

use crate::engine::events::{ConvertEvent, EventSink};
use crate::engine::resolve::SourceSpec;
use clap::ValueEnum;
use regex::Regex;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Exit code shells use for "command not found".
const EXIT_TOOL_MISSING: i32 = 127;
/// How long to wait for the process after its output streams close.
const WAIT_AFTER_EOF: Duration = Duration::from_secs(20);
/// How long to wait for the process to die after a kill.
const WAIT_AFTER_KILL: Duration = Duration::from_secs(5);
/// Output lines kept for failure diagnostics.
const TAIL_LINES: usize = 12;
/// Concurrent fragment downloads within a single job.
const FRAGMENT_CONCURRENCY: &str = "4";

static PROGRESS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\[download\]\s+(?P<pct>\d{1,3}(?:\.\d+)?)%\s+of\b.*?(?:\s+at\s+(?P<speed>[0-9.]+\s*[KMGT]?i?B/s))?(?:\s+ETA\s+(?P<eta>[0-9:]+))?\s*$",
    )
    .unwrap()
});
static HTTP_ERROR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)HTTP Error (\d{3})").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AudioFormat {
    M4a,
    Mp3,
    Opus,
    Flac,
    Wav,
    Aiff,
}

impl AudioFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::M4a => "m4a",
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Opus => "opus",
            AudioFormat::Flac => "flac",
            AudioFormat::Wav => "wav",
            AudioFormat::Aiff => "aiff",
        }
    }

    /// Whether yt-dlp can emit this format directly.
    fn native(&self) -> bool {
        !matches!(self, AudioFormat::Aiff)
    }
}

/// Per-job download outcome taxonomy. These are data for the report, not
/// errors that unwind the batch.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{tool} not found; is it installed and on PATH?")]
    ToolMissing { tool: String },
    #[error("{0}")]
    Failed(String),
    #[error("downloader reported success but produced no output file")]
    OutputMissing,
    #[error("transcode failed: {0}")]
    Transcode(String),
    #[error("cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressInfo {
    pub percent: f64,
    pub speed: Option<String>,
    pub eta: Option<String>,
}

/// Parse one downloader output line for progress, if it carries any.
pub fn parse_progress(line: &str) -> Option<ProgressInfo> {
    let captures = PROGRESS_LINE.captures(line.trim())?;
    let percent: f64 = captures.name("pct")?.as_str().parse().ok()?;
    Some(ProgressInfo {
        percent,
        speed: captures.name("speed").map(|m| m.as_str().to_string()),
        eta: captures.name("eta").map(|m| m.as_str().to_string()),
    })
}

/// Pick the most useful diagnostic out of the output tail.
fn classify_tail(code: Option<i32>, tail: &[String]) -> String {
    for line in tail.iter().rev() {
        if let Some(captures) = HTTP_ERROR.captures(line) {
            return format!("HTTP error {}", &captures[1]);
        }
        let lower = line.to_lowercase();
        if lower.contains("certificate") || lower.contains("ssl") || lower.contains("tls") {
            return format!("network/certificate problem: {}", line.trim());
        }
    }
    if let Some(error_line) = tail.iter().rev().find(|l| l.contains("ERROR")) {
        return error_line.trim().to_string();
    }
    let last = tail.last().map(|l| l.trim()).unwrap_or("no output");
    match code {
        Some(code) => format!("downloader exited with code {code}: {last}"),
        None => format!("downloader killed by signal: {last}"),
    }
}

/// Runs downloads. Holds the tool paths and transcode settings.
#[derive(Debug, Clone)]
pub struct Fetcher {
    pub ytdlp: String,
    pub ffmpeg: String,
    pub ffmpeg_location: Option<PathBuf>,
    pub sample_rate: u32,
    pub embed_thumbnail: bool,
}

impl Fetcher {
    /// Download one job's audio to `dest`.
    pub async fn fetch(
        &self,
        index: usize,
        spec: &SourceSpec,
        dest: &Path,
        format: AudioFormat,
        events: &EventSink,
        cancel: &Arc<AtomicBool>,
    ) -> Result<PathBuf, FetchError> {
        if format.native() {
            self.run_download(index, spec, dest, format, events, cancel)
                .await?;
            return Ok(dest.to_path_buf());
        }

        // two-stage path: lossy-free intermediate, then PCM transcode
        let intermediate = dest.with_extension("part.m4a");
        let downloaded = self
            .run_download(index, spec, &intermediate, AudioFormat::M4a, events, cancel)
            .await;
        if let Err(e) = downloaded {
            let _ = std::fs::remove_file(&intermediate);
            return Err(e);
        }
        let transcoded = self.transcode_pcm(&intermediate, dest).await;
        let _ = std::fs::remove_file(&intermediate);
        transcoded?;
        Ok(dest.to_path_buf())
    }

    fn download_args(&self, spec: &SourceSpec, dest: &Path, format: AudioFormat) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "--newline".into(),
            "--no-playlist".into(),
            "--ignore-errors".into(),
            "--no-overwrites".into(),
            "-o".into(),
            dest.to_string_lossy().into_owned(),
            "-N".into(),
            FRAGMENT_CONCURRENCY.into(),
            "-f".into(),
            "bestaudio/best".into(),
            "-x".into(),
            "--audio-format".into(),
            format.extension().into(),
            "--audio-quality".into(),
            "0".into(),
            "--add-metadata".into(),
        ];
        if self.embed_thumbnail {
            args.push("--embed-thumbnail".into());
        }
        if let Some(location) = &self.ffmpeg_location {
            args.push("--ffmpeg-location".into());
            args.push(location.to_string_lossy().into_owned());
        }
        args.push(spec.as_target());
        args
    }

    async fn run_download(
        &self,
        index: usize,
        spec: &SourceSpec,
        dest: &Path,
        format: AudioFormat,
        events: &EventSink,
        cancel: &Arc<AtomicBool>,
    ) -> Result<(), FetchError> {
        let args = self.download_args(spec, dest, format);
        debug!("Running {} {}", self.ytdlp, args.join(" "));

        let mut child = Command::new(&self.ytdlp)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == ErrorKind::NotFound {
                    FetchError::ToolMissing {
                        tool: self.ytdlp.clone(),
                    }
                } else {
                    FetchError::Failed(format!("failed to spawn downloader: {e}"))
                }
            })?;

        let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
        if let Some(stdout) = child.stdout.take() {
            pump_lines(stdout, line_tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            pump_lines(stderr, line_tx.clone());
        }
        drop(line_tx);

        let mut tail: Vec<String> = Vec::with_capacity(TAIL_LINES);
        while let Some(line) = line_rx.recv().await {
            if cancel.load(Ordering::Relaxed) {
                kill_and_wait(&mut child).await;
                return Err(FetchError::Cancelled);
            }
            if let Some(progress) = parse_progress(&line) {
                events.emit(ConvertEvent::Progress {
                    index,
                    percent: progress.percent,
                    speed: progress.speed,
                    eta: progress.eta,
                });
            }
            if tail.len() == TAIL_LINES {
                tail.remove(0);
            }
            tail.push(line);
        }

        let status = match timeout(WAIT_AFTER_EOF, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => return Err(FetchError::Failed(format!("wait failed: {e}"))),
            Err(_) => {
                kill_and_wait(&mut child).await;
                return Err(FetchError::Failed(
                    "downloader unresponsive after output ended".to_string(),
                ));
            }
        };

        if cancel.load(Ordering::Relaxed) {
            return Err(FetchError::Cancelled);
        }

        match status.code() {
            Some(0) => {
                let produced = std::fs::metadata(dest)
                    .map(|m| m.len() > 0)
                    .unwrap_or(false);
                if produced {
                    Ok(())
                } else {
                    Err(FetchError::OutputMissing)
                }
            }
            Some(EXIT_TOOL_MISSING) => Err(FetchError::ToolMissing {
                tool: self.ytdlp.clone(),
            }),
            code => Err(FetchError::Failed(classify_tail(code, &tail))),
        }
    }

    /// Transcode the m4a intermediate to uncompressed big-endian PCM.
    async fn transcode_pcm(&self, input: &Path, dest: &Path) -> Result<(), FetchError> {
        let output = Command::new(&self.ffmpeg)
            .arg("-y")
            .arg("-i")
            .arg(input)
            .args(["-ar", &self.sample_rate.to_string(), "-c:a", "pcm_s16be"])
            .arg(dest)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == ErrorKind::NotFound {
                    FetchError::ToolMissing {
                        tool: self.ffmpeg.clone(),
                    }
                } else {
                    FetchError::Transcode(e.to_string())
                }
            })?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let last = stderr.lines().last().unwrap_or("no output").trim();
            Err(FetchError::Transcode(format!(
                "ffmpeg exited with {}: {last}",
                output.status
            )))
        }
    }
}

/// Forward lines from a child stream into the shared channel.
fn pump_lines<R: AsyncRead + Unpin + Send + 'static>(
    stream: R,
    sender: mpsc::UnboundedSender<String>,
) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if sender.send(line).is_err() {
                break;
            }
        }
    });
}

async fn kill_and_wait(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        warn!("Failed to kill downloader: {e}");
        return;
    }
    if timeout(WAIT_AFTER_KILL, child.wait()).await.is_err() {
        warn!("Downloader did not exit after kill");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_fetcher(ytdlp: &str) -> Fetcher {
        Fetcher {
            ytdlp: ytdlp.to_string(),
            ffmpeg: "ffmpeg".to_string(),
            ffmpeg_location: None,
            sample_rate: 44100,
            embed_thumbnail: false,
        }
    }

    #[test]
    fn test_parse_progress_full_line() {
        let p = parse_progress("[download]  42.3% of 4.12MiB at 1.23MiB/s ETA 00:05").unwrap();
        assert_eq!(p.percent, 42.3);
        assert_eq!(p.speed.as_deref(), Some("1.23MiB/s"));
        assert_eq!(p.eta.as_deref(), Some("00:05"));
    }

    #[test]
    fn test_parse_progress_no_speed_or_eta() {
        let p = parse_progress("[download] 100% of 4.12MiB").unwrap();
        assert_eq!(p.percent, 100.0);
        assert_eq!(p.speed, None);
        assert_eq!(p.eta, None);
    }

    #[test]
    fn test_parse_progress_ignores_other_lines() {
        assert_eq!(parse_progress("[ExtractAudio] Destination: x.m4a"), None);
        assert_eq!(parse_progress("[download] Destination: x.m4a"), None);
        assert_eq!(parse_progress(""), None);
    }

    #[test]
    fn test_classify_tail_http_error() {
        let tail = vec!["ERROR: unable to download: HTTP Error 403: Forbidden".to_string()];
        assert_eq!(classify_tail(Some(1), &tail), "HTTP error 403");
    }

    #[test]
    fn test_classify_tail_certificate() {
        let tail = vec!["ERROR: certificate verify failed".to_string()];
        assert!(classify_tail(Some(1), &tail).starts_with("network/certificate"));
    }

    #[test]
    fn test_classify_tail_error_line() {
        let tail = vec![
            "[download] something".to_string(),
            "ERROR: Video unavailable".to_string(),
        ];
        assert_eq!(classify_tail(Some(1), &tail), "ERROR: Video unavailable");
    }

    #[test]
    fn test_classify_tail_fallback() {
        let tail = vec!["last words".to_string()];
        assert_eq!(
            classify_tail(Some(2), &tail),
            "downloader exited with code 2: last words"
        );
        assert_eq!(
            classify_tail(None, &tail),
            "downloader killed by signal: last words"
        );
    }

    #[test]
    fn test_download_args_contract() {
        let fetcher = test_fetcher("yt-dlp");
        let spec = SourceSpec::Search("band song audio".to_string());
        let args = fetcher.download_args(&spec, Path::new("/out/Band - Song.m4a"), AudioFormat::M4a);
        assert_eq!(args[0], "--newline");
        assert!(args.contains(&"--no-playlist".to_string()));
        assert!(args.contains(&"--no-overwrites".to_string()));
        assert!(args.contains(&"bestaudio/best".to_string()));
        assert_eq!(args.last().unwrap(), "ytsearch1:band song audio");
        assert!(!args.contains(&"--embed-thumbnail".to_string()));

        let mut with_thumb = test_fetcher("yt-dlp");
        with_thumb.embed_thumbnail = true;
        let args = with_thumb.download_args(&spec, Path::new("/out/x.m4a"), AudioFormat::M4a);
        assert!(args.contains(&"--embed-thumbnail".to_string()));
    }

    #[tokio::test]
    async fn test_missing_tool() {
        let fetcher = test_fetcher("/nonexistent/yt-dlp");
        let dir = tempfile::TempDir::new().unwrap();
        let dest = dir.path().join("out.m4a");
        let result = fetcher
            .fetch(
                1,
                &SourceSpec::Search("q".to_string()),
                &dest,
                AudioFormat::M4a,
                &EventSink::disabled(),
                &Arc::new(AtomicBool::new(false)),
            )
            .await;
        assert!(matches!(result, Err(FetchError::ToolMissing { .. })));
    }

    #[cfg(unix)]
    fn fake_tool(dir: &Path, script: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-ytdlp");
        std::fs::write(&path, format!("#!/bin/sh\n{script}")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_successful_download_with_progress() {
        let dir = tempfile::TempDir::new().unwrap();
        let dest = dir.path().join("out.m4a");
        // the fake tool prints progress and writes the file named after -o
        let script = r#"
dest=""
prev=""
for arg in "$@"; do
  if [ "$prev" = "-o" ]; then dest="$arg"; fi
  prev="$arg"
done
echo "[download]  50.0% of 1.00MiB at 512.00KiB/s ETA 00:01"
echo "[download] 100% of 1.00MiB"
printf audio > "$dest"
"#;
        let fetcher = test_fetcher(&fake_tool(dir.path(), script));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let result = fetcher
            .fetch(
                3,
                &SourceSpec::Direct("https://example.com/v".to_string()),
                &dest,
                AudioFormat::M4a,
                &EventSink::new(tx),
                &Arc::new(AtomicBool::new(false)),
            )
            .await;
        assert!(result.is_ok());
        assert!(dest.exists());

        let mut percents = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ConvertEvent::Progress { index, percent, .. } = event {
                assert_eq!(index, 3);
                percents.push(percent);
            }
        }
        assert_eq!(percents, vec![50.0, 100.0]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_success_without_output_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let dest = dir.path().join("out.m4a");
        let fetcher = test_fetcher(&fake_tool(dir.path(), "echo done"));
        let result = fetcher
            .fetch(
                1,
                &SourceSpec::Search("q".to_string()),
                &dest,
                AudioFormat::M4a,
                &EventSink::disabled(),
                &Arc::new(AtomicBool::new(false)),
            )
            .await;
        assert!(matches!(result, Err(FetchError::OutputMissing)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_127_is_tool_missing() {
        let dir = tempfile::TempDir::new().unwrap();
        let fetcher = test_fetcher(&fake_tool(dir.path(), "exit 127"));
        let result = fetcher
            .fetch(
                1,
                &SourceSpec::Search("q".to_string()),
                &dir.path().join("out.m4a"),
                AudioFormat::M4a,
                &EventSink::disabled(),
                &Arc::new(AtomicBool::new(false)),
            )
            .await;
        assert!(matches!(result, Err(FetchError::ToolMissing { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failure_classified_from_tail() {
        let dir = tempfile::TempDir::new().unwrap();
        let script = "echo 'ERROR: Video unavailable' >&2\nexit 1";
        let fetcher = test_fetcher(&fake_tool(dir.path(), script));
        let result = fetcher
            .fetch(
                1,
                &SourceSpec::Search("q".to_string()),
                &dir.path().join("out.m4a"),
                AudioFormat::M4a,
                &EventSink::disabled(),
                &Arc::new(AtomicBool::new(false)),
            )
            .await;
        match result {
            Err(FetchError::Failed(message)) => {
                assert_eq!(message, "ERROR: Video unavailable")
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[cfg(unix)]
    fn fake_writer_tool(dir: &Path, name: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        // writes the file given as the last argument
        let script = "#!/bin/sh\nfor a in \"$@\"; do last=\"$a\"; done\nprintf data > \"$last\"\n";
        let path = dir.join(name);
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_aiff_two_stage_removes_intermediate() {
        let dir = tempfile::TempDir::new().unwrap();
        let dest = dir.path().join("out.aiff");
        let script = r#"
dest=""
prev=""
for arg in "$@"; do
  if [ "$prev" = "-o" ]; then dest="$arg"; fi
  prev="$arg"
done
printf audio > "$dest"
"#;
        let mut fetcher = test_fetcher(&fake_tool(dir.path(), script));
        fetcher.ffmpeg = fake_writer_tool(dir.path(), "fake-ffmpeg");

        let result = fetcher
            .fetch(
                1,
                &SourceSpec::Search("q".to_string()),
                &dest,
                AudioFormat::Aiff,
                &EventSink::disabled(),
                &Arc::new(AtomicBool::new(false)),
            )
            .await;
        assert!(result.is_ok());
        assert!(dest.exists());
        assert!(!dir.path().join("out.part.m4a").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_aiff_transcode_failure_cleans_up() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let dest = dir.path().join("out.aiff");
        let script = r#"
dest=""
prev=""
for arg in "$@"; do
  if [ "$prev" = "-o" ]; then dest="$arg"; fi
  prev="$arg"
done
printf audio > "$dest"
"#;
        let mut fetcher = test_fetcher(&fake_tool(dir.path(), script));
        let bad_ffmpeg = dir.path().join("bad-ffmpeg");
        std::fs::write(&bad_ffmpeg, "#!/bin/sh\necho 'Invalid data' >&2\nexit 1\n").unwrap();
        std::fs::set_permissions(&bad_ffmpeg, std::fs::Permissions::from_mode(0o755)).unwrap();
        fetcher.ffmpeg = bad_ffmpeg.to_string_lossy().into_owned();

        let result = fetcher
            .fetch(
                1,
                &SourceSpec::Search("q".to_string()),
                &dest,
                AudioFormat::Aiff,
                &EventSink::disabled(),
                &Arc::new(AtomicBool::new(false)),
            )
            .await;
        assert!(matches!(result, Err(FetchError::Transcode(_))));
        assert!(!dir.path().join("out.part.m4a").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancellation_kills_download() {
        let dir = tempfile::TempDir::new().unwrap();
        // emits lines forever until killed
        let script = "while true; do echo '[download]  10.0% of 1.00MiB'; sleep 0.05; done";
        let fetcher = test_fetcher(&fake_tool(dir.path(), script));
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            flag.store(true, Ordering::Relaxed);
        });
        let result = fetcher
            .fetch(
                1,
                &SourceSpec::Search("q".to_string()),
                &dir.path().join("out.m4a"),
                AudioFormat::M4a,
                &EventSink::disabled(),
                &cancel,
            )
            .await;
        assert!(matches!(result, Err(FetchError::Cancelled)));
    }
}
