//! CLI command handlers

use anyhow::Result;
use clap_complete::generate;
use colored::Colorize;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use tokio::sync::mpsc;

use crate::config::ConvertConfig;
use crate::engine::{ConvertEngine, ConvertEvent, ConvertOptions, EventSink, JobStatus};
use crate::library::Manifest;
use crate::library::scan::AUDIO_EXTENSIONS;

/// Handle the `convert` command
pub async fn convert(
    csv: PathBuf,
    output: PathBuf,
    playlist: Option<String>,
    options: ConvertOptions,
) -> Result<()> {
    let config = ConvertConfig::load();

    let (tx, rx) = mpsc::unbounded_channel();
    let engine = ConvertEngine::new(config, options, EventSink::new(tx));

    // first Ctrl-C cancels gracefully, a second one aborts the process
    let cancel = engine.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n{}", "Cancelling, waiting for running downloads...".yellow());
            cancel.store(true, Ordering::Relaxed);
        }
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });

    let renderer = tokio::spawn(render_events(rx));

    println!("{}", format!("Converting {}...", csv.display()).cyan());
    let report = engine.convert_csv(&csv, &output, playlist.as_deref()).await;
    drop(engine);
    let _ = renderer.await;
    let report = report?;

    println!();
    println!(
        "{} {} downloaded, {} skipped, {} failed{}",
        "Done:".bold(),
        report.succeeded.to_string().green(),
        report.skipped.to_string().yellow(),
        report.failed.to_string().red(),
        if report.cancelled > 0 {
            format!(", {} cancelled", report.cancelled.to_string().yellow())
        } else {
            String::new()
        }
    );
    println!("  Output: {}", report.out_dir.display());

    if report.failed > 0 {
        println!();
        println!("{}", "Failed tracks:".red().bold());
        for result in &report.results {
            if let JobStatus::Failed(message) = &result.status {
                println!("  {} - {}: {}", result.artists, result.title, message.red());
            }
        }
        println!(
            "Details were written next to the output as {}",
            "*_not_found.csv".cyan()
        );
    }

    Ok(())
}

/// Draw engine events as live progress bars until the channel closes.
async fn render_events(mut rx: mpsc::UnboundedReceiver<ConvertEvent>) {
    let multi = MultiProgress::new();
    let bar_style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:30.cyan/blue}] {pos:>3}% {msg}")
        .unwrap()
        .progress_chars("#>-");
    let mut bars: HashMap<usize, ProgressBar> = HashMap::new();

    while let Some(event) = rx.recv().await {
        match event {
            ConvertEvent::Status(message) => {
                let _ = multi.println(message.cyan().to_string());
            }
            ConvertEvent::BatchInit { new, total } => {
                let _ = multi.println(format!(
                    "{} of {} tracks to download",
                    new.to_string().bold(),
                    total
                ));
            }
            ConvertEvent::JobSkipped { title, .. } => {
                let _ = multi.println(format!("{} {title}", "skipped".yellow()));
            }
            ConvertEvent::JobInit { index, title } => {
                let bar = multi.add(ProgressBar::new(100));
                bar.set_style(bar_style.clone());
                bar.set_message(title);
                bars.insert(index, bar);
            }
            ConvertEvent::Progress {
                index,
                percent,
                speed,
                eta,
            } => {
                if let Some(bar) = bars.get(&index) {
                    bar.set_position(percent as u64);
                    if let Some(speed) = speed {
                        let eta = eta.map(|e| format!(" ETA {e}")).unwrap_or_default();
                        let title = bar.message();
                        bar.set_message(format!(
                            "{} ({speed}{eta})",
                            title.split(" (").next().unwrap_or(&title)
                        ));
                    }
                }
            }
            ConvertEvent::JobDone { index } => {
                if let Some(bar) = bars.remove(&index) {
                    bar.finish_with_message(format!("{}", "done".green()));
                }
            }
            ConvertEvent::JobFailed { index, message } => {
                if let Some(bar) = bars.remove(&index) {
                    bar.abandon_with_message(format!("{}", message.red()));
                }
            }
            ConvertEvent::Overall { completed, total } => {
                if completed == total {
                    let _ = multi.println(format!("{completed}/{total} tracks processed"));
                }
            }
            ConvertEvent::BatchCancelled => {
                let _ = multi.println("Cancelled".yellow().to_string());
            }
            ConvertEvent::Complete { .. } => {}
        }
    }

    for bar in bars.values() {
        bar.abandon();
    }
}

/// Handle the `status` command
pub async fn status(folder: PathBuf) -> Result<()> {
    let audio_files = count_audio_files(&folder)?;

    println!("{}", folder.display().to_string().bold());
    println!("  Audio files: {}", audio_files.to_string().green());

    match Manifest::load(&folder) {
        Some(manifest) => {
            println!("  Tracked downloads: {}", manifest.keys.len().to_string().green());
            println!(
                "  Last updated: {}",
                manifest.updated_at.format("%Y-%m-%d %H:%M")
            );
        }
        None => {
            println!("  {}", "No manifest found; folder was never converted into, or the manifest was removed.".yellow());
        }
    }

    Ok(())
}

fn count_audio_files(folder: &Path) -> Result<usize> {
    use anyhow::Context;
    let entries = std::fs::read_dir(folder)
        .with_context(|| format!("Failed to read folder: {}", folder.display()))?;
    Ok(entries
        .flatten()
        .filter(|entry| {
            let path = entry.path();
            path.is_file()
                && path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|ext| AUDIO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        })
        .count())
}

/// Handle the `completion` command
pub fn completion(shell: clap_complete::Shell) {
    use clap::CommandFactory;
    let mut cmd = super::Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
}
