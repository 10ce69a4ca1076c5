//! Terminal output for the maintenance commands
//!
//! Uses `cliclack` for prompts and `indicatif` for sweep progress, falling
//! back to plain lines when stdout is not an interactive terminal (CI,
//! pipes, `NO_COLOR`).
//!
//! ```rust,ignore
//! let ctx = UiContext::detect().with_auto_yes(args.yes);
//! let progress = SweepProgress::new(&ctx, "Cleaning");
//! let report = storage.cleanup(&mut |n| progress.tick(n))?;
//! progress.finish();
//! ui::step_ok_detail(&ctx, "Cleanup done", &format!("{} files removed", report.files_removed));
//! ```

mod context;
mod output;
mod progress;
mod prompts;
mod theme;

pub use context::UiContext;
pub use output::{key_value, remark, section, step_info, step_ok, step_ok_detail, step_warn_hint};
pub use progress::SweepProgress;
pub use prompts::confirm;
pub use theme::{init_theme, StashTheme};
