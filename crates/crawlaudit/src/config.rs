//! Configuration for the crawl

use crate::error::{AuditError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration for crawlaudit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Path to the SQLite catalog
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Archive roots seeded into an empty catalog
    #[serde(default = "default_data_roots")]
    pub data_roots: Vec<String>,

    /// Entries per crawl pass
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Share of each batch reserved for forced rechecks (0.0 - 1.0)
    #[serde(default = "default_recheck_fraction")]
    pub recheck_fraction: f64,

    /// Age after which a checked entry is due again, e.g. "30d", "12h"
    #[serde(default = "default_recheck_age")]
    pub recheck_age: String,

    /// Glob matching pending priority files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_glob: Option<String>,

    /// Where consumed priority files are moved.
    /// Unset: a `completed/` directory beside each pending file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_dir: Option<String>,

    /// Catalog columns stratified by the sampler
    #[serde(default = "default_dimensions")]
    pub dimensions: Vec<String>,

    /// Target sample fraction per dimension
    #[serde(default = "default_sampsize")]
    pub sampsize: f64,

    /// Sampling weight given to new entries
    #[serde(default = "default_probability")]
    pub default_probability: f64,

    /// Directory for daily log files.
    /// Unset: a `logs/` directory beside the catalog.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<String>,

    /// Daily log files kept, 0 keeps everything
    #[serde(default = "default_log_retention_days")]
    pub log_retention_days: u32,
}

fn default_database_path() -> String {
    crawlaudit_logging::crawlaudit_home()
        .join("catalog.sqlite3")
        .to_string_lossy()
        .to_string()
}

fn default_data_roots() -> Vec<String> {
    vec!["/".to_string()]
}

fn default_batch_size() -> usize {
    100
}

fn default_recheck_fraction() -> f64 {
    0.1
}

fn default_recheck_age() -> String {
    "30d".to_string()
}

fn default_dimensions() -> Vec<String> {
    vec!["cos".to_string()]
}

pub(crate) fn default_sampsize() -> f64 {
    0.01
}

pub(crate) fn default_probability() -> f64 {
    0.1
}

fn default_log_retention_days() -> u32 {
    14
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            data_roots: default_data_roots(),
            batch_size: default_batch_size(),
            recheck_fraction: default_recheck_fraction(),
            recheck_age: default_recheck_age(),
            priority_glob: None,
            completed_dir: None,
            dimensions: default_dimensions(),
            sampsize: default_sampsize(),
            default_probability: default_probability(),
            log_dir: None,
            log_retention_days: default_log_retention_days(),
        }
    }
}

impl AuditConfig {
    /// Default config file location: ~/.crawlaudit/config.toml
    pub fn default_path() -> PathBuf {
        crawlaudit_logging::crawlaudit_home().join("config.toml")
    }

    /// Load `path`, or the default location when it exists, or the defaults.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let default = Self::default_path();
                if default.is_file() {
                    Self::load(&default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AuditConfig =
            toml::from_str(&content).map_err(|e| AuditError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| AuditError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject values the scheduler cannot use.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.recheck_fraction) {
            return Err(AuditError::Config(format!(
                "recheck_fraction must be within 0.0..=1.0, got {}",
                self.recheck_fraction
            )));
        }
        if !(0.0..=1.0).contains(&self.default_probability) {
            return Err(AuditError::Config(format!(
                "default_probability must be within 0.0..=1.0, got {}",
                self.default_probability
            )));
        }
        self.recheck_age_secs()?;
        Ok(())
    }

    /// Where this catalog's crawl runs log.
    pub fn log_dir(&self) -> PathBuf {
        match &self.log_dir {
            Some(dir) => PathBuf::from(dir),
            None => Path::new(&self.database_path)
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."))
                .join("logs"),
        }
    }

    /// `recheck_age` in seconds.
    pub fn recheck_age_secs(&self) -> Result<i64> {
        parse_age(&self.recheck_age)
    }
}

/// Parse an age such as `"90"`, `"15m"`, `"12h"`, `"4d"` or `"2w"` into seconds.
pub fn parse_age(raw: &str) -> Result<i64> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);

    let value: i64 = digits
        .parse()
        .map_err(|_| AuditError::Config(format!("invalid age '{}'", raw)))?;
    let scale = match unit.trim() {
        "" | "s" => 1,
        "m" => 60,
        "h" => 3_600,
        "d" => 86_400,
        "w" => 7 * 86_400,
        other => {
            return Err(AuditError::Config(format!(
                "invalid age unit '{}' in '{}'",
                other, raw
            )))
        }
    };
    value
        .checked_mul(scale)
        .ok_or_else(|| AuditError::Config(format!("age '{}' is too large", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AuditConfig::default();
        assert!(
            config.database_path.ends_with("catalog.sqlite3"),
            "unexpected database path: {}",
            config.database_path
        );
        assert_eq!(config.data_roots, vec!["/"]);
        assert_eq!(config.dimensions, vec!["cos"]);
        assert_eq!(config.recheck_age_secs().unwrap(), 30 * 86_400);
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_age_units() {
        assert_eq!(parse_age("90").unwrap(), 90);
        assert_eq!(parse_age("15m").unwrap(), 900);
        assert_eq!(parse_age("12h").unwrap(), 43_200);
        assert_eq!(parse_age("4d").unwrap(), 345_600);
        assert_eq!(parse_age(" 2w ").unwrap(), 1_209_600);
        assert!(parse_age("d").is_err());
        assert!(parse_age("4y").is_err());
        assert!(parse_age("").is_err());
    }

    #[test]
    fn test_validate_rejects_bad_fraction() {
        let config = AuditConfig {
            recheck_fraction: 1.5,
            ..AuditConfig::default()
        };
        assert!(matches!(config.validate(), Err(AuditError::Config(_))));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: AuditConfig = toml::from_str(
            r#"
            database_path = "/tmp/catalog.sqlite3"
            recheck_fraction = 0.3
            recheck_age = "4d"
            priority_glob = "/var/crawl/priority/*.pri"
            "#,
        )
        .unwrap();
        assert_eq!(config.database_path, "/tmp/catalog.sqlite3");
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.recheck_age_secs().unwrap(), 4 * 86_400);
        assert_eq!(
            config.priority_glob.as_deref(),
            Some("/var/crawl/priority/*.pri")
        );
        assert!(config.completed_dir.is_none());
        assert_eq!(config.log_retention_days, 14);
    }

    #[test]
    fn test_log_dir_follows_catalog() {
        let config = AuditConfig {
            database_path: "/srv/crawl/catalog.sqlite3".to_string(),
            ..AuditConfig::default()
        };
        assert_eq!(config.log_dir(), PathBuf::from("/srv/crawl/logs"));

        let bare = AuditConfig {
            database_path: "catalog.sqlite3".to_string(),
            ..AuditConfig::default()
        };
        assert_eq!(bare.log_dir(), PathBuf::from("./logs"));

        let explicit = AuditConfig {
            log_dir: Some("/var/log/crawlaudit".to_string()),
            ..config
        };
        assert_eq!(explicit.log_dir(), PathBuf::from("/var/log/crawlaudit"));
    }

    #[test]
    fn test_config_save_and_load() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("crawlaudit.toml");
        let config = AuditConfig {
            database_path: "test.db".to_string(),
            data_roots: vec!["/archive/a".to_string(), "/archive/b".to_string()],
            batch_size: 10,
            ..AuditConfig::default()
        };

        config.save(&path).unwrap();
        let loaded = AuditConfig::load(&path).unwrap();
        assert_eq!(loaded.database_path, "test.db");
        assert_eq!(loaded.data_roots.len(), 2);
        assert_eq!(loaded.batch_size, 10);
    }
}
