//! Config command implementations

use anyhow::{anyhow, Result};
use serde_json::Value;

use crate::cli::ConfigCommand;
use crate::config::{self as app_config, AppConfig, RuntimeContext};
use crate::output::print_output;

pub fn run(ctx: &RuntimeContext, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => print_output(ctx, &ctx.config),
        ConfigCommand::Path => {
            println!("{}", ctx.config_path().display());
            Ok(())
        }
        ConfigCommand::Get { key: Some(key) } => {
            println!("{}", lookup(&ctx.config, &key)?);
            Ok(())
        }
        ConfigCommand::Get { key: None } => print_output(ctx, &ctx.config),
        ConfigCommand::Reset => {
            app_config::write_default_config(ctx.config_path())?;
            if !ctx.global.quiet {
                println!(
                    "Configuration reset to defaults at: {}",
                    ctx.config_path().display()
                );
            }
            Ok(())
        }
    }
}

/// Look up a dot-separated key such as `server.port` in the effective config
fn lookup(config: &AppConfig, key: &str) -> Result<String> {
    let root = serde_json::to_value(config)?;
    let value = key
        .split('.')
        .try_fold(&root, |node, part| node.get(part))
        .ok_or_else(|| anyhow!("Configuration key not found: {key}"))?;

    Ok(match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => serde_json::to_string(other)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let config = AppConfig::default();

        assert_eq!(lookup(&config, "homeassistant.timeout").unwrap(), "10");
        assert_eq!(lookup(&config, "server.port").unwrap(), "5000");
        assert_eq!(lookup(&config, "cache.stale_after").unwrap(), "5m");
        assert_eq!(lookup(&config, "storage.database").unwrap(), "null");
        assert!(lookup(&config, "server.nope").is_err());
        assert!(lookup(&config, "nonexistent").is_err());
    }
}
