//! Compression commands - show-compression and recompress

use super::maintenance::run_sweep;
use super::open_storage;
use crate::cli::args::OutputFormat;
use crate::compression::Compressor;
use crate::config::{format_size, Config};
use crate::error::StashResult;
use crate::storage::CompressionReport;
use crate::ui::{self, UiContext};
use serde::Serialize;

#[derive(Serialize)]
struct CompressionJson {
    #[serde(flatten)]
    report: CompressionReport,
    ratio: Option<f64>,
    savings: Option<f64>,
}

/// Execute the show-compression command
pub async fn show_compression(format: OutputFormat, config: &Config) -> StashResult<()> {
    let storage = open_storage(config)?;
    let ctx = match format {
        OutputFormat::Json => UiContext::non_interactive(),
        OutputFormat::Table => UiContext::detect(),
    };
    let report = run_sweep(&ctx, "Scanning", storage, |s, p| s.compression_report(p)).await?;

    match format {
        OutputFormat::Json => {
            let out = CompressionJson {
                ratio: report.ratio(),
                savings: report.savings(),
                report,
            };
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Table => {
            ui::key_value(&ctx, "Results", &report.results.to_string());
            ui::key_value(&ctx, "Compressed", &report.compressed.to_string());
            ui::key_value(&ctx, "Uncompressed", &report.uncompressed.to_string());
            if report.unreadable > 0 {
                ui::key_value(&ctx, "Unreadable", &report.unreadable.to_string());
            }
            ui::key_value(&ctx, "Stored size", &format_size(report.stored_bytes));
            ui::key_value(&ctx, "Original size", &format_size(report.original_bytes));
            ui::key_value(
                &ctx,
                "Compression ratio",
                &report
                    .ratio()
                    .map(|r| format!("{r:.2} x"))
                    .unwrap_or_else(|| "-".to_string()),
            );
            ui::key_value(
                &ctx,
                "Space savings",
                &report
                    .savings()
                    .map(|s| format!("{:.1} %", s * 100.0))
                    .unwrap_or_else(|| "-".to_string()),
            );
        }
    }
    Ok(())
}

/// Execute the recompress command
pub async fn recompress(level: &str, config: &Config) -> StashResult<()> {
    let ctx = UiContext::detect();
    let compressor: Compressor = level.parse()?;
    let storage = open_storage(config)?;
    let report = run_sweep(&ctx, "Recompressing", storage, move |s, p| {
        s.recompress(compressor, p)
    })
    .await?;

    ui::step_ok_detail(
        &ctx,
        "Recompression done",
        &format!(
            "rewrote {} of {} results",
            report.rewritten, report.results
        ),
    );
    ui::key_value(&ctx, "Size before", &format_size(report.bytes_before));
    ui::key_value(&ctx, "Size after", &format_size(report.bytes_after));
    if report.skipped_damaged > 0 {
        ui::step_warn_hint(
            &ctx,
            &format!("Skipped {} damaged results", report.skipped_damaged),
            "They are dropped on their next lookup",
        );
    }
    Ok(())
}
