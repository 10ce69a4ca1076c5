//! Prompts with non-interactive fallback

use super::context::UiContext;
use crate::error::{StashError, StashResult};

/// Ask yes/no. `--yes` answers yes; without a terminal the default wins.
pub async fn confirm(ctx: &UiContext, message: &str, default: bool) -> StashResult<bool> {
    if ctx.auto_yes() {
        return Ok(true);
    }
    if !ctx.is_interactive() {
        return Ok(default);
    }

    let message = message.to_string();
    let answer = tokio::task::spawn_blocking(move || {
        cliclack::confirm(&message).initial_value(default).interact()
    })
    .await
    .map_err(|e| StashError::User(format!("Prompt task failed: {}", e)))?;

    answer.map_err(|e| StashError::User(format!("Prompt failed: {}", e)))
}
