// src/config/monitor.rs

//! Monitor process configuration, loaded from a TOML file with the same
//! `from_file` + `validate` shape as the teacher's `Config::from_file`
//! (`src/config.rs`).

use crate::error::{PgAutoFailoverError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

fn default_port() -> u16 {
    5431
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_health_check_period() -> Duration {
    Duration::from_secs(5)
}
fn default_health_check_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_health_check_max_retries() -> u32 {
    2
}
fn default_health_check_retry_delay() -> Duration {
    Duration::from_secs(2)
}
fn default_unhealthy_timeout() -> Duration {
    Duration::from_secs(20)
}
fn default_startup_grace_period() -> Duration {
    Duration::from_secs(10)
}
fn default_drain_timeout() -> Duration {
    Duration::from_secs(30)
}
fn default_report_lsn_timeout() -> Duration {
    Duration::from_secs(10)
}
fn default_metrics_port() -> Option<u16> {
    None
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_health_check_period", with = "humantime_serde")]
    pub health_check_period: Duration,
    #[serde(default = "default_health_check_timeout", with = "humantime_serde")]
    pub health_check_timeout: Duration,
    #[serde(default = "default_health_check_max_retries")]
    pub health_check_max_retries: u32,
    #[serde(default = "default_health_check_retry_delay", with = "humantime_serde")]
    pub health_check_retry_delay: Duration,
    #[serde(default = "default_unhealthy_timeout", with = "humantime_serde")]
    pub unhealthy_timeout: Duration,
    #[serde(default = "default_startup_grace_period", with = "humantime_serde")]
    pub startup_grace_period: Duration,
    #[serde(default = "default_drain_timeout", with = "humantime_serde")]
    pub drain_timeout: Duration,
    #[serde(default = "default_report_lsn_timeout", with = "humantime_serde")]
    pub report_lsn_timeout: Duration,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: Option<u16>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            log_level: default_log_level(),
            health_check_period: default_health_check_period(),
            health_check_timeout: default_health_check_timeout(),
            health_check_max_retries: default_health_check_max_retries(),
            health_check_retry_delay: default_health_check_retry_delay(),
            unhealthy_timeout: default_unhealthy_timeout(),
            startup_grace_period: default_startup_grace_period(),
            drain_timeout: default_drain_timeout(),
            report_lsn_timeout: default_report_lsn_timeout(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl MonitorConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| PgAutoFailoverError::Configuration(format!("reading '{path}': {e}")))?;
        let config: MonitorConfig = toml::from_str(&contents)
            .map_err(|e| PgAutoFailoverError::Configuration(format!("parsing '{path}': {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(PgAutoFailoverError::Configuration("port cannot be 0".into()));
        }
        if self.health_check_max_retries == 0 {
            return Err(PgAutoFailoverError::Configuration(
                "health_check_max_retries must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
