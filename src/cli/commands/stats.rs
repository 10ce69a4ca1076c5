//! Stats commands - show or reset counters

use super::open_storage;
use crate::cli::args::OutputFormat;
use crate::config::{format_size, Config};
use crate::error::{StashError, StashResult};
use crate::storage::StatsSummary;
use crate::ui::{self, UiContext};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Serialize)]
struct StatsJson {
    cache_dir: PathBuf,
    #[serde(flatten)]
    summary: StatsSummary,
    hit_rate: Option<f64>,
    max_size: u64,
    max_files: u64,
}

/// Execute the stats command
pub async fn stats(format: OutputFormat, config: &Config) -> StashResult<()> {
    let storage = open_storage(config)?;
    let summary = storage.stats().summary();
    let opts = storage.options();

    match format {
        OutputFormat::Json => {
            let out = StatsJson {
                cache_dir: opts.root.clone(),
                hit_rate: summary.hit_rate(),
                summary,
                max_size: opts.max_size,
                max_files: opts.max_files,
            };
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Table => {
            let ctx = UiContext::detect();
            print_table(&ctx, &summary, &opts.root, opts.max_size, opts.max_files);
        }
    }
    Ok(())
}

fn print_table(ctx: &UiContext, s: &StatsSummary, dir: &Path, max_size: u64, max_files: u64) {
    let c = &s.counters;
    ui::key_value(ctx, "Cache directory", &dir.display().to_string());
    ui::key_value(
        ctx,
        "Stats zeroed",
        &s.zeroed_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "never".to_string()),
    );

    ui::section(ctx, "Lookups");
    ui::key_value(ctx, "Local hits", &c.local_hit.to_string());
    ui::key_value(ctx, "Remote hits", &c.secondary_hit.to_string());
    ui::key_value(ctx, "Misses", &c.miss.to_string());
    ui::key_value(
        ctx,
        "Hit rate",
        &s.hit_rate()
            .map(|r| format!("{:.1} %", r * 100.0))
            .unwrap_or_else(|| "-".to_string()),
    );
    ui::key_value(ctx, "Errors", &c.error.to_string());
    ui::key_value(ctx, "Remote errors", &c.secondary_error.to_string());

    ui::section(ctx, "Storage");
    let size = if max_size > 0 {
        format!("{} of {}", format_size(s.size_bytes), format_size(max_size))
    } else {
        format_size(s.size_bytes)
    };
    ui::key_value(ctx, "Cache size", &size);
    let files = if max_files > 0 {
        format!("{} of {}", s.files, max_files)
    } else {
        s.files.to_string()
    };
    ui::key_value(ctx, "Files", &files);
    ui::key_value(ctx, "Files evicted", &c.files_evicted.to_string());
    ui::key_value(ctx, "Cleanups", &c.cleanups.to_string());
}

/// Execute the zero-stats command
pub async fn zero_stats(config: &Config) -> StashResult<()> {
    let storage = open_storage(config)?;
    tokio::task::spawn_blocking(move || storage.stats().zero())
        .await
        .map_err(|e| StashError::Internal(format!("zero-stats task failed: {e}")))??;
    ui::step_ok(&UiContext::detect(), "Statistics zeroed");
    Ok(())
}
