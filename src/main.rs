//! playlist2media - Download playlist CSVs as tagged local audio files

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
mod config;
mod engine;
mod identity;
mod input;
mod library;
mod utils;

use cli::{Cli, Commands};
use engine::ConvertOptions;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "playlist2media=debug"
    } else {
        "playlist2media=info"
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command {
        Commands::Convert {
            csv,
            output,
            playlist,
            format,
            workers,
            no_deep_search,
            prefix_numbers,
            no_m3u,
            no_incremental,
            exclude_instrumentals,
            embed_thumbnail,
        } => {
            let options = ConvertOptions {
                format,
                workers,
                deep_search: !no_deep_search,
                prefix_numbers,
                generate_m3u: !no_m3u,
                exclude_instrumentals,
                incremental: !no_incremental,
                embed_thumbnail,
            };
            cli::commands::convert(csv, output, playlist, options).await?;
        }
        Commands::Status { folder } => {
            cli::commands::status(folder).await?;
        }
        Commands::Completion { shell } => {
            cli::commands::completion(shell);
        }
    }

    Ok(())
}
