//! Confirmation prompt with non-interactive fallback

use super::context::UiContext;
use crate::error::{XplatError, XplatResult};

/// Ask for confirmation; non-interactive sessions get `default` unless auto-yes is set
pub async fn confirm(ctx: &UiContext, message: &str, default: bool) -> XplatResult<bool> {
    if ctx.auto_yes() {
        return Ok(true);
    }
    if !ctx.is_interactive() {
        return Ok(default);
    }

    let message = message.to_string();
    tokio::task::spawn_blocking(move || {
        cliclack::confirm(&message)
            .initial_value(default)
            .interact()
    })
    .await
    .map_err(|e| XplatError::User(format!("Prompt task failed: {}", e)))?
    .map_err(|e| XplatError::User(format!("Prompt failed: {}", e)))
}
