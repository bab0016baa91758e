//! Console configuration.
//!
//! Layered with figment: serde defaults, then `modcon.toml` / `modcon.yaml`
//! next to the working directory, then an explicit file passed on the
//! command line, then `MODCON_`-prefixed environment variables (nested keys
//! separated by `__`, e.g. `MODCON_DEVICE__PORT=1502`).

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use figment::providers::{Env, Format, Toml, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::coalesce::AddressRange;

/// Top-level console configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsoleConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub coils: CoilRangeConfig,
    #[serde(default)]
    pub registers: RegisterWindowConfig,
}

/// Device bridge endpoint defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Base URL of the bridge API.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Default device IP offered at connect time.
    #[serde(default = "default_device_ip")]
    pub ip: String,
    #[serde(default = "default_device_port")]
    pub port: u16,
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// Poll cadences. The coil cadence is fixed by the engine; only the register
/// cadence is user-configurable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// Register auto-read interval in seconds, clamped to a 1 s floor.
    #[serde(default = "default_register_interval_secs")]
    pub register_interval_secs: u64,
}

/// Default coil range used when no explicit range has been loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoilRangeConfig {
    #[serde(default)]
    pub start: u16,
    #[serde(default = "default_coil_count")]
    pub count: u16,
}

/// Default register window requested until the user picks another.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterWindowConfig {
    #[serde(default)]
    pub start: u16,
    #[serde(default = "default_register_count")]
    pub count: u16,
}

fn default_base_url() -> String {
    "http://127.0.0.1:5000".to_string()
}

fn default_device_ip() -> String {
    "192.168.2.55".to_string()
}

fn default_device_port() -> u16 {
    502
}

fn default_unit_id() -> u8 {
    1
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_register_interval_secs() -> u64 {
    5
}

fn default_coil_count() -> u16 {
    8
}

fn default_register_count() -> u16 {
    10
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            ip: default_device_ip(),
            port: default_device_port(),
            unit_id: default_unit_id(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            register_interval_secs: default_register_interval_secs(),
        }
    }
}

impl Default for CoilRangeConfig {
    fn default() -> Self {
        Self {
            start: 0,
            count: default_coil_count(),
        }
    }
}

impl Default for RegisterWindowConfig {
    fn default() -> Self {
        Self {
            start: 0,
            count: default_register_count(),
        }
    }
}

impl ConsoleConfig {
    /// Load configuration from the standard locations plus an optional
    /// explicit file.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new()
            .merge(Toml::file("modcon.toml"))
            .merge(Yaml::file("modcon.yaml"));

        if let Some(path) = file {
            figment = match path.extension().and_then(|e| e.to_str()) {
                Some("toml") => figment.merge(Toml::file(path)),
                Some("yaml") | Some("yml") => figment.merge(Yaml::file(path)),
                other => {
                    return Err(anyhow!(
                        "Unsupported config format {:?} for {}",
                        other,
                        path.display()
                    ))
                },
            };
        }

        figment
            .merge(Env::prefixed("MODCON_").split("__"))
            .extract()
            .context("Failed to load console configuration")
    }

    pub fn default_coil_range(&self) -> AddressRange {
        AddressRange::new(self.coils.start, self.coils.count.max(1))
    }

    pub fn default_register_window(&self) -> AddressRange {
        AddressRange::new(self.registers.start, self.registers.count.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_bridge_conventions() {
        let config = ConsoleConfig::default();
        assert_eq!(config.device.port, 502);
        assert_eq!(config.device.unit_id, 1);
        assert_eq!(config.device.timeout_ms, 10_000);
        assert_eq!(config.poll.register_interval_secs, 5);
        assert_eq!(config.default_coil_range(), AddressRange::new(0, 8));
        assert_eq!(config.default_register_window(), AddressRange::new(0, 10));
    }

    #[test]
    fn toml_overrides_defaults() {
        let config: ConsoleConfig = Figment::new()
            .merge(Toml::string(
                r#"
                [device]
                base_url = "http://bridge:5000"
                port = 1502

                [poll]
                register_interval_secs = 2

                [coils]
                start = 16
                count = 4
                "#,
            ))
            .extract()
            .unwrap();

        assert_eq!(config.device.base_url, "http://bridge:5000");
        assert_eq!(config.device.port, 1502);
        assert_eq!(config.device.unit_id, 1); // untouched default
        assert_eq!(config.poll.register_interval_secs, 2);
        assert_eq!(config.default_coil_range(), AddressRange::new(16, 4));
    }

    #[test]
    fn env_overrides_file_values() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("modcon.toml", "[device]\nport = 1502\n")?;
            jail.set_env("MODCON_DEVICE__PORT", "2502");

            let config = ConsoleConfig::load(None).expect("config should load");
            assert_eq!(config.device.port, 2502);
            Ok(())
        });
    }

    #[test]
    fn zero_counts_never_produce_an_empty_window() {
        let config: ConsoleConfig = Figment::new()
            .merge(Toml::string("[coils]\ncount = 0\n"))
            .extract()
            .unwrap();
        assert_eq!(config.default_coil_range().count, 1);
    }
}
