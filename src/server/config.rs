use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::{env, fs};

#[derive(Deserialize, Debug, Clone)]
pub struct EngineConfig {
    pub database_url: String,

    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Global cap on concurrently in-flight probes.
    #[serde(default = "default_max_concurrent_probes")]
    pub max_concurrent_probes: usize,

    /// Consecutive UP verdicts required to auto-resolve an incident.
    #[serde(default = "default_confirmation_checks")]
    pub confirmation_checks: u32,

    /// Per-subscriber event queue depth; a lagging subscriber drops oldest.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

// Partial config for layering
#[derive(Deserialize, Default, Debug)]
struct PartialEngineConfig {
    database_url: Option<String>,
    listen_addr: Option<String>,
    max_concurrent_probes: Option<usize>,
    confirmation_checks: Option<u32>,
    event_buffer: Option<usize>,
    log_dir: Option<String>,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_max_concurrent_probes() -> usize {
    16
}

fn default_confirmation_checks() -> u32 {
    3
}

fn default_event_buffer() -> usize {
    256
}

fn default_log_dir() -> String {
    "logs".to_string()
}

impl EngineConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self, String> {
        dotenv::dotenv().ok();

        // 1. Load from file (optional)
        let file_config: PartialEngineConfig = if let Some(path_str) = config_path {
            let path = Path::new(path_str);
            if path.exists() {
                let contents = fs::read_to_string(path)
                    .map_err(|e| format!("Failed to read config file at {path:?}: {e}"))?;
                toml::from_str(&contents)
                    .map_err(|e| format!("Failed to parse TOML from config file at {path:?}: {e}"))?
            } else {
                PartialEngineConfig::default()
            }
        } else {
            PartialEngineConfig::default()
        };

        // 2. Load from environment variables
        let env_config = PartialEngineConfig {
            database_url: env::var("DATABASE_URL").ok(),
            listen_addr: env::var("LISTEN_ADDR").ok(),
            max_concurrent_probes: parse_env("MAX_CONCURRENT_PROBES")?,
            confirmation_checks: parse_env("CONFIRMATION_CHECKS")?,
            event_buffer: parse_env("EVENT_BUFFER")?,
            log_dir: env::var("LOG_DIR").ok(),
        };

        // 3. Merge: environment overrides file
        Ok(EngineConfig {
            database_url: env_config
                .database_url
                .or(file_config.database_url)
                .ok_or("DATABASE_URL is required")?,
            listen_addr: env_config
                .listen_addr
                .or(file_config.listen_addr)
                .unwrap_or_else(default_listen_addr),
            max_concurrent_probes: env_config
                .max_concurrent_probes
                .or(file_config.max_concurrent_probes)
                .unwrap_or_else(default_max_concurrent_probes),
            confirmation_checks: env_config
                .confirmation_checks
                .or(file_config.confirmation_checks)
                .unwrap_or_else(default_confirmation_checks),
            event_buffer: env_config
                .event_buffer
                .or(file_config.event_buffer)
                .unwrap_or_else(default_event_buffer),
            log_dir: env_config
                .log_dir
                .or(file_config.log_dir)
                .unwrap_or_else(default_log_dir),
        })
    }
}

fn parse_env<T: FromStr>(key: &str) -> Result<Option<T>, String>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| format!("Invalid value for {key}: {e}")),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_only_database_url_is_given() {
        let config: EngineConfig =
            toml::from_str(r#"database_url = "postgres://localhost/statuswatch""#).unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.max_concurrent_probes, 16);
        assert_eq!(config.confirmation_checks, 3);
        assert_eq!(config.event_buffer, 256);
        assert_eq!(config.log_dir, "logs");
    }

    #[test]
    fn file_values_override_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            database_url = "postgres://localhost/statuswatch"
            listen_addr = "127.0.0.1:9090"
            max_concurrent_probes = 4
            confirmation_checks = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:9090");
        assert_eq!(config.max_concurrent_probes, 4);
        assert_eq!(config.confirmation_checks, 5);
    }
}
