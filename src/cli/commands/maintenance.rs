//! Cleanup, eviction and clear commands
//!
//! Sweeps walk the whole cache, so they run on the blocking pool.

use super::open_storage;
use crate::config::{format_size, parse_duration, Config};
use crate::error::{StashError, StashResult};
use crate::storage::{LocalStorage, SweepReport};
use crate::ui::{self, SweepProgress, UiContext};

/// Run a whole-cache pass on the blocking pool behind a progress line
pub(super) async fn run_sweep<R, F>(
    ctx: &UiContext,
    label: &str,
    storage: LocalStorage,
    sweep: F,
) -> StashResult<R>
where
    R: Send + 'static,
    F: FnOnce(&LocalStorage, &mut dyn FnMut(usize)) -> StashResult<R> + Send + 'static,
{
    let progress = SweepProgress::new(ctx, label);
    let ticker = progress.clone();
    let report = tokio::task::spawn_blocking(move || sweep(&storage, &mut |n| ticker.tick(n)))
        .await
        .map_err(|e| StashError::Internal(format!("sweep task failed: {e}")));
    progress.finish();
    report?
}

fn print_report(ctx: &UiContext, done: &str, report: &SweepReport) {
    ui::step_ok_detail(
        ctx,
        done,
        &format!(
            "removed {} files, {}",
            report.files_removed,
            format_size(report.bytes_removed)
        ),
    );
    ui::key_value(ctx, "Files remaining", &report.files_remaining.to_string());
    ui::key_value(ctx, "Size remaining", &format_size(report.bytes_remaining));
    if report.files_skipped_in_use > 0 {
        ui::key_value(ctx, "Skipped (in use)", &report.files_skipped_in_use.to_string());
    }
    if report.temps_removed + report.locks_removed > 0 {
        ui::remark(
            ctx,
            &format!(
                "Also removed {} orphaned temporaries and {} stale locks",
                report.temps_removed, report.locks_removed
            ),
        );
    }
}

/// Execute the cleanup command
pub async fn cleanup(config: &Config) -> StashResult<()> {
    let ctx = UiContext::detect();
    let storage = open_storage(config)?;
    if storage.options().max_size == 0 && storage.options().max_files == 0 {
        ui::step_info(
            &ctx,
            "No size or file limit configured; only stale temporaries are removed",
        );
    }
    let report = run_sweep(&ctx, "Cleaning", storage, |s, p| s.cleanup(p)).await?;
    print_report(&ctx, "Cleanup done", &report);
    Ok(())
}

/// Execute the evict-older-than command
pub async fn evict_older_than(duration: &str, config: &Config) -> StashResult<()> {
    let ctx = UiContext::detect();
    let age = parse_duration(duration)?;
    let storage = open_storage(config)?;
    let report = run_sweep(&ctx, "Evicting", storage, move |s, p| {
        s.evict_older_than(age, p)
    })
    .await?;
    print_report(&ctx, &format!("Evicted entries unused for {duration}"), &report);
    Ok(())
}

/// Execute the clear command
pub async fn clear(yes: bool, config: &Config) -> StashResult<()> {
    let ctx = UiContext::detect().with_auto_yes(yes);
    let storage = open_storage(config)?;
    let prompt = format!("Remove every entry under {}?", storage.root().display());
    if !ui::confirm(&ctx, &prompt, false).await? {
        ui::step_warn_hint(&ctx, "Nothing removed", "Pass --yes to clear without prompting");
        return Ok(());
    }
    let report = run_sweep(&ctx, "Clearing", storage, |s, p| s.clear(p)).await?;
    print_report(&ctx, "Cache cleared", &report);
    Ok(())
}
