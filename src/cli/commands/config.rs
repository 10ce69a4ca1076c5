//! Config command - show or edit configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager};
use crate::error::StashResult;
use crate::ui::{self, UiContext};

/// Execute the config command
pub async fn execute(args: ConfigArgs, manager: &ConfigManager, config: &Config) -> StashResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(config)?,
        Some(ConfigAction::Path) => println!("{}", manager.path().display()),
        Some(ConfigAction::Set { key, value }) => {
            manager.set(&key, &value).await?;
            ui::step_ok_detail(
                &UiContext::detect(),
                &format!("Set {key} = {value}"),
                &manager.path().display().to_string(),
            );
        }
    }
    Ok(())
}

/// Effective configuration, environment overrides included
fn show_config(config: &Config) -> StashResult<()> {
    let mut shown = config.clone();
    shown.cache.dir = Some(config.cache.resolved_dir());
    print!("{}", toml::to_string_pretty(&shown)?);
    Ok(())
}
