use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Tunables shared by the roles. All fields have defaults so a missing
/// config file is not an error; a present one must parse.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LabConfig {
    /// Port an agent dials when the controller address carries none.
    pub controller_port: u16,
    /// How often the scheduler checks for due flood orders.
    pub tick_interval_ms: u64,
    /// Pause between consecutive flood payloads once echoes arrive.
    pub payload_interval_ms: u64,
}

impl Default for LabConfig {
    fn default() -> Self {
        LabConfig {
            controller_port: 16901,
            tick_interval_ms: 1000,
            payload_interval_ms: 1000,
        }
    }
}

pub fn load_config(path: Option<&Path>) -> Result<LabConfig, String> {
    match path {
        Some(config_path) => {
            if !config_path.exists() {
                return Err(format!("Config file not found: {config_path:?}"));
            }

            let config_content = match fs::read_to_string(config_path) {
                Ok(content) => content,
                Err(e) => return Err(format!("Failed to read config file: {e}")),
            };

            match serde_json::from_str(&config_content) {
                Ok(config) => {
                    debug!("Loaded configuration from {config_path:?}");
                    Ok(config)
                }
                Err(e) => Err(format!("Failed to parse config file: {e}")),
            }
        }
        None => {
            debug!("No config file provided, using default configuration");
            Ok(LabConfig::default())
        }
    }
}
