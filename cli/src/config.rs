// Configuration management for the perilink CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/perilink/config.json
// - Linux: ~/.config/perilink/config.json
// - Windows: %APPDATA%\perilink\config.json

use anyhow::{Context, Result};
use perilink_core::gatt::uuid_from_u16;
use perilink_core::{PeripheralConfig, WriteMode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Fallback tracing filter when RUST_LOG is unset
    pub log_level: String,

    /// Peripheral settings handed to the core
    pub peripheral: PeripheralConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            peripheral: PeripheralConfig::default(),
        }
    }
}

/// Accepts a full UUID or a 16-bit short form such as `A001` / `0xA001`
fn parse_uuid(value: &str) -> Result<Uuid> {
    let short = value.trim_start_matches("0x").trim_start_matches("0X");
    if short.len() == 4 {
        let id = u16::from_str_radix(short, 16).context("Invalid 16-bit UUID")?;
        return Ok(uuid_from_u16(id));
    }
    Uuid::parse_str(value).context("Invalid UUID")
}

fn parse_write_mode(value: &str) -> Result<WriteMode> {
    match value {
        "without_response" => Ok(WriteMode::WithoutResponse),
        "with_response" => Ok(WriteMode::WithResponse),
        _ => anyhow::bail!("Invalid write mode (expected with_response or without_response)"),
    }
}

fn write_mode_name(mode: WriteMode) -> &'static str {
    match mode {
        WriteMode::WithoutResponse => "without_response",
        WriteMode::WithResponse => "with_response",
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("perilink");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the config file path
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from the default location, creating it if missing
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("Failed to read config file")?;
            // Parse only: `config set` and `config reset` must work on a bad file
            let config: Config =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Set a config value. The result must still be a valid peripheral config.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut next = self.clone();
        match key {
            "log_level" => next.log_level = value.to_string(),
            "service_uuid" => next.peripheral.service_uuid = parse_uuid(value)?,
            "characteristic_uuid" => next.peripheral.characteristic_uuid = parse_uuid(value)?,
            "local_name" => next.peripheral.local_name = value.to_string(),
            "read_value" => {
                next.peripheral.read_value = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            "write_mode" => next.peripheral.write_mode = parse_write_mode(value)?,
            "command_buffer" => {
                next.peripheral.command_buffer = value.parse().context("Invalid number")?;
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        next.peripheral.validate()?;
        *self = next;
        Ok(())
    }

    /// Get a config value
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "log_level" => Some(self.log_level.clone()),
            "service_uuid" => Some(self.peripheral.service_uuid.to_string()),
            "characteristic_uuid" => Some(self.peripheral.characteristic_uuid.to_string()),
            "local_name" => Some(self.peripheral.local_name.clone()),
            "read_value" => self.peripheral.read_value.clone(),
            "write_mode" => Some(write_mode_name(self.peripheral.write_mode).to_string()),
            "command_buffer" => Some(self.peripheral.command_buffer.to_string()),
            _ => None,
        }
    }

    /// List all config values
    pub fn list(&self) -> Vec<(String, String)> {
        vec![
            ("log_level".to_string(), self.log_level.clone()),
            ("service_uuid".to_string(), self.peripheral.service_uuid.to_string()),
            (
                "characteristic_uuid".to_string(),
                self.peripheral.characteristic_uuid.to_string(),
            ),
            ("local_name".to_string(), self.peripheral.local_name.clone()),
            (
                "read_value".to_string(),
                self.peripheral
                    .read_value
                    .clone()
                    .unwrap_or_else(|| "(none)".to_string()),
            ),
            (
                "write_mode".to_string(),
                write_mode_name(self.peripheral.write_mode).to_string(),
            ),
            (
                "command_buffer".to_string(),
                self.peripheral.command_buffer.to_string(),
            ),
        ]
    }
}
