//! Typed server configuration, loaded once from a YAML document.

use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{CleanError, Result};

fn default_resource_dir() -> String {
    "resources".to_string()
}

fn default_thread_count() -> usize {
    8
}

fn default_timeout_ms() -> u64 {
    60_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct SqlConfig {
    pub port: u16,
    pub user: String,
    pub password: String,
    pub db: String,
    pub pool_size: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub level: u8,
    #[serde(default)]
    pub queue_size: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    #[serde(default)]
    pub trig_mode: u8,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub linger: bool,
    pub sql: SqlConfig,
    #[serde(default = "default_thread_count")]
    pub thread_count: usize,
    pub log: LogConfig,
    #[serde(default = "default_resource_dir")]
    pub resource_dir: String,
}

impl ServerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: ServerConfig = serde_yaml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !(1024..=65535).contains(&self.port) {
            return Err(CleanError::from(format!(
                "port {} out of allowed range 1024-65535",
                self.port
            )));
        }
        if self.trig_mode > 3 {
            return Err(CleanError::from(format!(
                "trig_mode {} must be in 0..=3",
                self.trig_mode
            )));
        }
        if self.sql.pool_size == 0 {
            return Err(CleanError::from("sql.pool_size must be at least 1"));
        }
        if self.thread_count == 0 {
            return Err(CleanError::from("thread_count must be at least 1"));
        }
        Ok(())
    }

    pub fn display_config(&self) {
        proxy_log::info!("========== server config ==========");
        proxy_log::info!("port: {}", self.port);
        proxy_log::info!(
            "trig_mode: {} (listener {}, connections {})",
            self.trig_mode,
            if self.trig_mode & 0b10 != 0 { "ET" } else { "LT" },
            if self.trig_mode & 0b01 != 0 { "ET" } else { "LT" }
        );
        proxy_log::info!("timeout_ms: {}", self.timeout_ms);
        proxy_log::info!("linger: {}", self.linger);
        proxy_log::info!("resource_dir: {}", self.resource_dir);
        proxy_log::info!(
            "sql: db={} user={} pool_size={}",
            self.sql.db,
            self.sql.user,
            self.sql.pool_size
        );
        proxy_log::info!("thread_count: {}", self.thread_count);
        proxy_log::info!(
            "log: enabled={} level={} queue_size={}",
            self.log.enabled,
            self.log.level,
            self.log.queue_size
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> &'static str {
        r#"
port: 8080
trig_mode: 3
timeout_ms: 60000
linger: false
sql:
  port: 3306
  user: root
  password: root
  db: webserver
  pool_size: 4
thread_count: 4
log:
  enabled: true
  level: 1
  queue_size: 1024
"#
    }

    #[test]
    fn parses_full_document() {
        let config: ServerConfig = serde_yaml::from_str(sample()).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.sql.pool_size, 4);
        assert!(config.log.enabled);
    }

    #[test]
    fn defaults_apply_when_fields_missing() {
        let yaml = r#"
port: 9000
sql:
  port: 3306
  user: root
  password: root
  db: webserver
  pool_size: 2
log:
  enabled: false
  level: 0
  queue_size: 0
"#;
        let config: ServerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.thread_count, default_thread_count());
        assert_eq!(config.resource_dir, "resources");
        assert_eq!(config.timeout_ms, default_timeout_ms());
    }

    #[test]
    fn rejects_port_out_of_range() {
        let yaml = sample().replace("port: 8080", "port: 80");
        let config: ServerConfig = serde_yaml::from_str(&yaml).unwrap();
        assert!(config.validate().is_err());
    }
}
