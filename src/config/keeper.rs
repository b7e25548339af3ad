// src/config/keeper.rs

//! Keeper process configuration. Loaded from the `pg_autoctl`/`postgres`/
//! `replication`/`ssl`/`citus` INI sections named in §6. INI file I/O
//! itself is an out-of-scope external collaborator, so the parser below is
//! intentionally minimal (section + `key = value` lines only, `#`/`;`
//! comments, no interpolation) — the recognised option set and the
//! `from_file` + `validate` shape follow the teacher's `Config::from_file`.

use crate::error::{PgAutoFailoverError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PgAutoctlSection {
    pub node_name: String,
    pub hostname: String,
    #[serde(default = "default_pg_autoctl_port")]
    pub monitor_port: u16,
    pub monitor_host: String,
    #[serde(default)]
    pub formation: Option<String>,
    #[serde(default)]
    pub group: Option<i32>,
}

fn default_pg_autoctl_port() -> u16 {
    5431
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresSection {
    pub pgdata: String,
    #[serde(default = "default_pg_port")]
    pub pg_port: u16,
    #[serde(default = "default_dbname")]
    pub dbname: String,
    #[serde(default = "default_pg_ctl")]
    pub pg_ctl: String,
}

fn default_pg_port() -> u16 {
    5432
}
fn default_dbname() -> String {
    "postgres".to_string()
}
fn default_pg_ctl() -> String {
    "pg_ctl".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationSection {
    #[serde(default = "default_candidate_priority")]
    pub candidate_priority: u8,
    #[serde(default = "default_replication_quorum")]
    pub replication_quorum: bool,
    #[serde(default = "default_maximum_backup_rate")]
    pub maximum_backup_rate: String,
}

fn default_candidate_priority() -> u8 {
    100
}
fn default_replication_quorum() -> bool {
    true
}
fn default_maximum_backup_rate() -> String {
    "100M".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SslSection {
    #[serde(default)]
    pub ssl_self_signed: bool,
    #[serde(default)]
    pub ssl_ca_file: Option<String>,
    #[serde(default)]
    pub ssl_cert_file: Option<String>,
    #[serde(default)]
    pub ssl_key_file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CitusSection {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub cluster_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeeperConfig {
    pub pg_autoctl: PgAutoctlSection,
    pub postgres: PostgresSection,
    #[serde(default = "ReplicationSection::defaults")]
    pub replication: ReplicationSection,
    #[serde(default)]
    pub ssl: SslSection,
    #[serde(default)]
    pub citus: CitusSection,
}

impl ReplicationSection {
    fn defaults() -> Self {
        Self {
            candidate_priority: default_candidate_priority(),
            replication_quorum: default_replication_quorum(),
            maximum_backup_rate: default_maximum_backup_rate(),
        }
    }
}

/// Parses `[section]` / `key = value` INI text into a section -> key ->
/// value map, then re-serializes it as TOML so the typed structs above can
/// reuse `serde`'s derive machinery instead of a hand-rolled mapper.
fn parse_ini(contents: &str) -> Result<HashMap<String, HashMap<String, String>>> {
    let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
    let mut current = String::new();

    for (lineno, raw_line) in contents.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            current = name.trim().to_string();
            sections.entry(current.clone()).or_default();
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(PgAutoFailoverError::Configuration(format!(
                "line {}: expected 'key = value'",
                lineno + 1
            )));
        };
        if current.is_empty() {
            return Err(PgAutoFailoverError::Configuration(format!(
                "line {}: key outside of any [section]",
                lineno + 1
            )));
        }
        sections
            .get_mut(&current)
            .unwrap()
            .insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(sections)
}

impl KeeperConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| PgAutoFailoverError::Configuration(format!("reading '{path}': {e}")))?;
        Self::from_str(&contents)
    }

    pub fn from_str(contents: &str) -> Result<Self> {
        let sections = parse_ini(contents)?;
        let mut toml_table = toml::value::Table::new();
        for (section, kvs) in sections {
            let mut table = toml::value::Table::new();
            for (key, value) in kvs {
                let parsed = parse_scalar(&value);
                table.insert(key, parsed);
            }
            toml_table.insert(section, toml::Value::Table(table));
        }
        let config: KeeperConfig = toml::Value::Table(toml_table)
            .try_into()
            .map_err(|e| PgAutoFailoverError::Configuration(format!("invalid keeper config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.pg_autoctl.node_name.trim().is_empty() {
            return Err(PgAutoFailoverError::Configuration("pg_autoctl.node_name cannot be empty".into()));
        }
        if self.postgres.pgdata.trim().is_empty() {
            return Err(PgAutoFailoverError::Configuration("postgres.pgdata cannot be empty".into()));
        }
        if self.postgres.pg_port == 0 || self.pg_autoctl.monitor_port == 0 {
            return Err(PgAutoFailoverError::Configuration("ports cannot be 0".into()));
        }
        Ok(())
    }
}

fn parse_scalar(value: &str) -> toml::Value {
    if let Ok(b) = value.parse::<bool>() {
        return toml::Value::Boolean(b);
    }
    if let Ok(i) = value.parse::<i64>() {
        return toml::Value::Integer(i);
    }
    toml::Value::String(value.trim_matches('"').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[pg_autoctl]
node_name = node1
hostname = node1.example.com
monitor_port = 5431
monitor_host = monitor.example.com

[postgres]
pgdata = /var/lib/postgresql/data
pg_port = 5432

[replication]
candidate_priority = 50
"#;

    #[test]
    fn parses_sections_with_defaults() {
        let config = KeeperConfig::from_str(SAMPLE).unwrap();
        assert_eq!(config.pg_autoctl.node_name, "node1");
        assert_eq!(config.postgres.pg_port, 5432);
        assert_eq!(config.replication.candidate_priority, 50);
        assert!(config.replication.replication_quorum);
    }

    #[test]
    fn rejects_key_outside_section() {
        let err = KeeperConfig::from_str("node_name = node1\n").unwrap_err();
        assert!(matches!(err, PgAutoFailoverError::Configuration(_)));
    }

    #[test]
    fn rejects_empty_pgdata() {
        let bad = SAMPLE.replace("pgdata = /var/lib/postgresql/data", "pgdata = ");
        assert!(KeeperConfig::from_str(&bad).is_err());
    }
}
