//! objstash - compiler output cache
//!
//! CLI entry point that dispatches to subcommands.

use clap::{CommandFactory, Parser};
use console::style;
use objstash::cli::args::{ConfigAction, ConfigArgs};
use objstash::cli::{commands, Cli, Commands};
use objstash::config::{Config, ConfigManager};
use objstash::error::StashResult;
use std::process::ExitCode;
use tracing::debug;
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

async fn run() -> StashResult<()> {
    let cli = Cli::parse();

    // Completions need neither config nor logging
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "objstash", &mut std::io::stdout());
        return Ok(());
    }

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let config = match config_manager.load().await {
        Ok(config) => config,
        // Still allow locating and fixing a broken file
        Err(e) if repairs_config(&cli.command) => {
            eprintln!("{} {}", style("Warning:").yellow(), e);
            Config::default()
        }
        Err(e) => return Err(e),
    };

    let verbosity = cli.verbose.max(u8::from(config.general.verbose));
    init_logging(verbosity, &config.general.log_format);
    debug!("Using config {}", config_manager.path().display());

    match cli.command {
        Commands::Completions { .. } => Ok(()),
        Commands::Stats { format } => commands::stats(format, &config).await,
        Commands::ZeroStats => commands::zero_stats(&config).await,
        Commands::Cleanup => commands::cleanup(&config).await,
        Commands::EvictOlderThan { duration } => {
            commands::evict_older_than(&duration, &config).await
        }
        Commands::Clear { yes } => commands::clear(yes, &config).await,
        Commands::HashFile { path, algorithm } => {
            commands::hash_file(path, algorithm.map(Into::into), &config).await
        }
        Commands::DumpManifest { path } => commands::dump_manifest(path).await,
        Commands::ShowCompression { format } => {
            commands::show_compression(format, &config).await
        }
        Commands::Recompress { level } => commands::recompress(&level, &config).await,
        Commands::ExtractResult { path, output } => {
            commands::extract_result(path, output).await
        }
        Commands::Config(args) => commands::config(args, &config_manager, &config).await,
    }
}

fn repairs_config(command: &Commands) -> bool {
    matches!(
        command,
        Commands::Config(ConfigArgs {
            action: Some(ConfigAction::Path | ConfigAction::Set { .. })
        })
    )
}

/// 0 = warn, 1 = info, 2+ = debug; `RUST_LOG` overrides
fn init_logging(verbosity: u8, format: &str) {
    let default = match verbosity {
        0 => "objstash=warn",
        1 => "objstash=info",
        _ => "objstash=debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if format == "json" {
        builder.json().init();
    } else {
        builder.without_time().init();
    }
}
