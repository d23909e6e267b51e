//! Stagehand - Source staging for package builds
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use stagehand::cli::{commands, Cli, Commands};
use stagehand::config::{Config, ConfigManager};
use stagehand::error::StagehandResult;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8, config: &Config) {
    // 0 = warn, 1 = info, 2+ = debug
    let filter = match verbose {
        0 => EnvFilter::new("stagehand=warn"),
        1 => EnvFilter::new("stagehand=info"),
        _ => EnvFilter::new("stagehand=debug"),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if config.general.log_format == "json" {
        builder.json().init();
    } else {
        builder.without_time().init();
    }
}

async fn run() -> StagehandResult<()> {
    let cli = Cli::parse();

    let manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let config = manager.load().await?;
    init_logging(cli.verbose, &config);
    stagehand::ui::init_theme();

    match cli.command {
        Commands::Root => commands::root(&config).await,
        Commands::Stage(args) => commands::stage(args, &config).await,
        Commands::Checksum(args) => commands::checksum(args, &config).await,
        Commands::Mirror(args) => commands::mirror(args, &config).await,
        Commands::Purge(args) => commands::purge(args, &config).await,
        Commands::Config(args) => commands::config(args, &config, &manager).await,
    }
}
