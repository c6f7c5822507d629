//! Server configuration
//!
//! Layered with figment: built-in defaults, then an optional TOML file,
//! then `SKIRMISHD_*` environment variables. CLI flags are applied on top
//! by the binary.

use std::net::SocketAddr;
use std::path::Path;

use anyhow::Result;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::session::SessionSettings;

/// Config file looked up in the working directory when none is given
pub const DEFAULT_CONFIG_FILE: &str = "skirmishd.toml";

/// Server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub bind_addr: SocketAddr,
    /// None = in-memory
    pub db_path: Option<String>,
    /// Ritual sequence display window
    pub ritual_display_ms: u64,
    /// Broadcast buffer for session change events
    pub event_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            db_path: None,
            ritual_display_ms: 3000,
            event_capacity: 256,
        }
    }
}

impl Config {
    /// Provider stack without CLI overrides
    pub fn figment(config_file: Option<&Path>) -> Figment {
        let file = config_file.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed("SKIRMISHD_"))
    }

    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        Ok(Self::figment(config_file).extract()?)
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            ritual_display_ms: self.ritual_display_ms,
            event_capacity: self.event_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_without_file() {
        Jail::expect_with(|_jail| {
            let config: Config = Config::figment(None).extract()?;
            assert_eq!(config, Config::default());
            Ok(())
        });
    }

    #[test]
    fn test_file_then_env_layering() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "skirmishd.toml",
                r#"
                bind_addr = "0.0.0.0:9000"
                ritual_display_ms = 1500
                "#,
            )?;
            jail.set_env("SKIRMISHD_RITUAL_DISPLAY_MS", "500");

            let config: Config = Config::figment(None).extract()?;
            assert_eq!(config.bind_addr.port(), 9000);
            assert_eq!(config.ritual_display_ms, 500);
            assert_eq!(config.db_path, None);
            Ok(())
        });
    }

    #[test]
    fn test_explicit_file() {
        Jail::expect_with(|jail| {
            jail.create_file("alt.toml", r#"db_path = "combat.db""#)?;
            let config: Config = Config::figment(Some(Path::new("alt.toml"))).extract()?;
            assert_eq!(config.db_path.as_deref(), Some("combat.db"));
            Ok(())
        });
    }
}
