//! Config command handlers

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use ddpsync_core::Config;

use crate::output::{Output, OutputFormat};

/// Show current configuration
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "server_url": config.server_url,
                    "websocket_url": config.websocket_url(),
                    "data_dir": config.data_dir,
                    "resume_on_connect": config.resume_on_connect
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.websocket_url());
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);
            println!("Configuration:");
            println!("  server_url:        {}", config.server_url);
            println!("  data_dir:          {}", config.data_dir.display());
            println!("  resume_on_connect: {}", config.resume_on_connect);
            println!();
            println!("WebSocket URL: {}", config.websocket_url());
            println!("Config file:   {}", effective_path.display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(
    key: String,
    value: String,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    apply(&mut config, &key, &value)?;

    config
        .save(config_path)
        .context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));

    Ok(())
}

fn apply(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        "server_url" => {
            if value.trim().is_empty() {
                bail!("server_url must not be empty");
            }
            config.server_url = value.to_string();
        }
        "data_dir" => {
            config.data_dir = value.into();
        }
        "resume_on_connect" => {
            config.resume_on_connect = value
                .parse()
                .context("Invalid value for resume_on_connect. Use 'true' or 'false'.")?;
        }
        _ => {
            bail!(
                "Unknown configuration key: '{}'\n\
                 Valid keys: server_url, data_dir, resume_on_connect",
                key
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_known_keys() {
        let mut config = Config::default();

        apply(&mut config, "server_url", "example.com:3000").unwrap();
        apply(&mut config, "data_dir", "/tmp/ddpsync").unwrap();
        apply(&mut config, "resume_on_connect", "false").unwrap();

        assert_eq!(config.server_url, "example.com:3000");
        assert_eq!(config.data_dir, PathBuf::from("/tmp/ddpsync"));
        assert!(!config.resume_on_connect);
    }

    #[test]
    fn test_apply_rejects_bad_input() {
        let mut config = Config::default();

        assert!(apply(&mut config, "sync_url", "x").is_err());
        assert!(apply(&mut config, "server_url", " ").is_err());
        assert!(apply(&mut config, "resume_on_connect", "maybe").is_err());
    }

    #[test]
    fn test_set_writes_config_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        let output = Output::new(OutputFormat::Quiet);

        set(
            "server_url".to_string(),
            "wss://example.com/websocket".to_string(),
            Some(&path),
            &output,
        )
        .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("wss://example.com/websocket"));
    }
}
