//! Configuration management commands.

use std::path::Path;

use bookwright_core::config::IssueSeverity;
use bookwright_core::Config;

use crate::ConfigAction;

pub fn handle(action: &ConfigAction, config: &Config, explicit: Option<&Path>) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            print!("{}", config.to_toml()?);
        }
        ConfigAction::Path => match explicit {
            Some(path) => println!("{}", path.display()),
            None => println!("{}", Config::config_dir().join("config.toml").display()),
        },
        ConfigAction::Validate => {
            let result = config.validate();
            if result.issues.is_empty() {
                println!("✓ Configuration is valid");
                return Ok(());
            }
            for issue in &result.issues {
                let marker = match issue.severity {
                    IssueSeverity::Error => "✗ error",
                    IssueSeverity::Warning => "! warning",
                };
                println!("{} {}: {}", marker, issue.field, issue.message);
            }
            if !result.is_ok() {
                anyhow::bail!("{} configuration error(s)", result.errors().len());
            }
        }
    }
    Ok(())
}
