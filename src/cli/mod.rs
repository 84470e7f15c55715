//! CLI module for playlist2media

use crate::engine::AudioFormat;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

#[derive(Parser, Debug)]
#[command(name = "playlist2media", about = "Download playlist CSVs as tagged local audio files")]
#[command(version, author)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download every track of a playlist CSV as a local audio file
    Convert {
        /// Playlist CSV export
        #[arg(value_name = "CSV")]
        csv: PathBuf,

        /// Root folder the playlist subfolder is created under
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Playlist name (defaults to the CSV file name)
        #[arg(long)]
        playlist: Option<String>,

        /// Target audio format
        #[arg(short, long, value_enum, default_value = "m4a")]
        format: AudioFormat,

        /// Number of parallel downloads (1-8)
        #[arg(short = 'w', long)]
        workers: Option<usize>,

        /// Take the search engine's top result without probing candidates
        #[arg(long)]
        no_deep_search: bool,

        /// Prefix filenames with their playlist position (001 - ...)
        #[arg(long)]
        prefix_numbers: bool,

        /// Skip writing the .m3u8 playlist index
        #[arg(long)]
        no_m3u: bool,

        /// Re-download tracks even when they already exist
        #[arg(long)]
        no_incremental: bool,

        /// Skip instrumental, karaoke, and 8D versions
        #[arg(long)]
        exclude_instrumentals: bool,

        /// Embed the source thumbnail as cover art
        #[arg(long)]
        embed_thumbnail: bool,
    },

    /// Show what has been downloaded into a folder
    Status {
        /// Destination folder
        folder: PathBuf,
    },

    /// Generate shell completions
    Completion {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}
