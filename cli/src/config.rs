// Configuration management for the MeshAid CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/meshaid/config.json
// - Linux: ~/.config/meshaid/config.json
// - Windows: %APPDATA%\meshaid\config.json

use anyhow::{Context, Result};
use meshaid_core::routing::Algorithm;
use meshaid_core::MeshConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Scenario used when `--scenario` is omitted
    pub default_scenario: String,

    /// Algorithm used by `simulate` when `--algorithm` is omitted
    pub default_algorithm: Algorithm,

    /// Seed used when `--seed` is omitted; `None` keeps the scenario's own
    pub default_seed: Option<u64>,

    /// Tick count used when `--ticks` is omitted; `None` keeps the scenario's own
    pub default_ticks: Option<u64>,

    /// Routing, discovery, topology, router and broadcast settings
    pub mesh: MeshConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_scenario: "normal_operation".to_string(),
            default_algorithm: Algorithm::Hybrid,
            default_seed: None,
            default_ticks: None,
            mesh: MeshConfig::default(),
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("meshaid");

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
            let contents = std::fs::read_to_string(path).context("Failed to read config file")?;
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

    /// Set a config value. Does not save.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "default_scenario" => {
                meshaid_core::simulation::find_scenario(value)
                    .with_context(|| format!("Unknown scenario: {}", value))?;
                self.default_scenario = value.to_string();
            }
            "default_algorithm" => {
                self.default_algorithm = value.parse().context("Invalid algorithm")?;
            }
            "default_seed" => {
                self.default_seed = optional(value, "Invalid seed")?;
            }
            "default_ticks" => {
                self.default_ticks = optional(value, "Invalid tick count")?;
            }
            "max_hops" => {
                self.mesh.routing.max_hops = value.parse().context("Invalid number")?;
            }
            "route_timeout_ms" => {
                self.mesh.routing.route_timeout_ms = value.parse().context("Invalid number")?;
            }
            "discovery_timeout_ms" => {
                self.mesh.routing.discovery_timeout_ms =
                    value.parse().context("Invalid number")?;
            }
            "default_ttl" => {
                self.mesh.router.default_ttl = value.parse().context("Invalid number")?;
            }
            "max_retries" => {
                self.mesh.router.max_retries = value.parse().context("Invalid number")?;
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        Ok(())
    }

    /// Get a config value
    pub fn get(&self, key: &str) -> Option<String> {
        self.list()
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// List all config values
    pub fn list(&self) -> Vec<(String, String)> {
        let auto = || "(scenario)".to_string();
        vec![
            ("default_scenario".to_string(), self.default_scenario.clone()),
            ("default_algorithm".to_string(), self.default_algorithm.to_string()),
            (
                "default_seed".to_string(),
                self.default_seed.map(|s| s.to_string()).unwrap_or_else(auto),
            ),
            (
                "default_ticks".to_string(),
                self.default_ticks.map(|t| t.to_string()).unwrap_or_else(auto),
            ),
            ("max_hops".to_string(), self.mesh.routing.max_hops.to_string()),
            ("route_timeout_ms".to_string(), self.mesh.routing.route_timeout_ms.to_string()),
            (
                "discovery_timeout_ms".to_string(),
                self.mesh.routing.discovery_timeout_ms.to_string(),
            ),
            ("default_ttl".to_string(), self.mesh.router.default_ttl.to_string()),
            ("max_retries".to_string(), self.mesh.router.max_retries.to_string()),
        ]
    }
}

/// Empty string clears the value.
fn optional(value: &str, what: &'static str) -> Result<Option<u64>> {
    if value.is_empty() {
        return Ok(None);
    }
    Ok(Some(value.parse().context(what)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.default_scenario, "normal_operation");
        assert_eq!(config.default_algorithm, Algorithm::Hybrid);
        assert!(config.default_seed.is_none());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_set_and_get() {
        let mut config = Config::default();
        config.set("default_algorithm", "aodv").unwrap();
        assert_eq!(config.default_algorithm, Algorithm::Reactive);
        config.set("max_hops", "7").unwrap();
        assert_eq!(config.get("max_hops").as_deref(), Some("7"));
        config.set("default_seed", "99").unwrap();
        assert_eq!(config.default_seed, Some(99));
        config.set("default_seed", "").unwrap();
        assert_eq!(config.default_seed, None);

        assert!(config.set("default_scenario", "meteor_strike").is_err());
        assert!(config.set("max_hops", "many").is_err());
        assert!(config.set("colour", "blue").is_err());
        assert!(config.get("colour").is_none());
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());

        let mut changed = config.clone();
        changed.set("default_ttl", "4").unwrap();
        changed.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap().mesh.router.default_ttl, 4);
    }
}
