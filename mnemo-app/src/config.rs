use anyhow::{Context, Result};
use mnemo_json::paths::config_file;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::cli::opts::{Cli, StoreKind};

pub const DEFAULT_JSON_BACKUPS: usize = 10;

/// Settings from `config.toml`. Every key is optional; command-line flags win.
///
/// ```toml
/// store = "sqlite"
/// db_path = "/home/me/cards.db"
/// json_backups = 5
/// log_level = "info"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub store: Option<StoreKind>,
    pub db_path: Option<PathBuf>,
    pub json_backups: Option<usize>,
    pub log_level: Option<String>,
}

impl AppConfig {
    /// Reads `explicit` if given (it must exist), else the default config file if present.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(p) => Self::read(p),
            None => {
                let p = config_file();
                if p.exists() {
                    Self::read(&p)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn read(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn merged_with(mut self, args: &Cli) -> Self {
        if args.store.is_some() {
            self.store = args.store;
        }
        if args.db_path.is_some() {
            self.db_path = args.db_path.clone();
        }
        if args.log_level.is_some() {
            self.log_level = args.log_level.clone();
        }
        self
    }

    pub fn store(&self) -> StoreKind {
        self.store.unwrap_or(StoreKind::Json)
    }

    pub fn json_backups(&self) -> usize {
        self.json_backups.unwrap_or(DEFAULT_JSON_BACKUPS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn flags_override_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "store = \"sqlite\"\njson_backups = 3\nlog_level = \"info\"\n").unwrap();

        let file = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(file.store(), StoreKind::Sqlite);
        assert_eq!(file.json_backups(), 3);

        let args = Cli::parse_from(["mnemo", "--store", "json", "--log-level", "debug", "study"]);
        let cfg = file.merged_with(&args);
        assert_eq!(cfg.store(), StoreKind::Json);
        assert_eq!(cfg.log_level.as_deref(), Some("debug"));
        assert_eq!(cfg.json_backups(), 3);
    }

    #[test]
    fn unknown_keys_and_missing_explicit_file_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "stor = \"json\"\n").unwrap();
        assert!(AppConfig::load(Some(&path)).is_err());
        assert!(AppConfig::load(Some(&dir.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn empty_file_means_defaults() {
        let cfg: AppConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.store(), StoreKind::Json);
        assert_eq!(cfg.json_backups(), DEFAULT_JSON_BACKUPS);
        assert!(cfg.db_path.is_none());
    }
}
