//! Per-repository grab settings
//!
//! Loaded from:
//! - `$HISTMINE_CONFIG` if set
//! - ~/.config/histmine/config.toml otherwise
//!
//! ```toml
//! [repositories."my-project"]
//! output_file_path = "/home/me/.cache/histmine/my-project-1a2b/my-project-file-events.csv"
//! from = "2024-01-01"
//! to = "2024-03-31"
//! grab_on_vcs_update = true
//! grab_change_size_in_lines = false
//! last_grab_time = "2024-03-31T18:02:11Z"
//! ```

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::storage::default_events_path;

/// Environment variable overriding the config file location
pub const CONFIG_ENV: &str = "HISTMINE_CONFIG";

/// Settings for one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrabberConfig {
    pub output_file_path: PathBuf,
    pub from: NaiveDate,
    pub to: NaiveDate,
    #[serde(default)]
    pub grab_on_vcs_update: bool,
    #[serde(default)]
    pub grab_change_size_in_lines: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_grab_time: Option<DateTime<Utc>>,
}

impl GrabberConfig {
    /// Settings for a repository that has never been configured:
    /// the last three months, no size tracking, no auto-grab.
    pub fn defaults(repo_path: &Path, today: NaiveDate) -> Self {
        Self {
            output_file_path: default_events_path(repo_path),
            from: today.checked_sub_months(Months::new(3)).unwrap_or(today),
            to: today,
            grab_on_vcs_update: false,
            grab_change_size_in_lines: false,
            last_grab_time: None,
        }
    }

    /// Keys accepted by [`set`](Self::set).
    pub const KEYS: [&'static str; 5] = [
        "output_file_path",
        "from",
        "to",
        "grab_on_vcs_update",
        "grab_change_size_in_lines",
    ];

    /// Set one field from its textual form.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "output_file_path" => self.output_file_path = PathBuf::from(value),
            "from" => self.from = parse_date(value)?,
            "to" => self.to = parse_date(value)?,
            "grab_on_vcs_update" => self.grab_on_vcs_update = parse_bool(value)?,
            "grab_change_size_in_lines" => self.grab_change_size_in_lines = parse_bool(value)?,
            _ => bail!(
                "Unknown config key '{}'. Expected one of: {}",
                key,
                Self::KEYS.join(", ")
            ),
        }
        Ok(())
    }
}

/// Parse a `YYYY-MM-DD` date.
pub fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}', expected YYYY-MM-DD", value))
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        other => bail!("Invalid boolean '{}'", other),
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct ConfigFile {
    #[serde(default)]
    repositories: BTreeMap<String, GrabberConfig>,
}

/// The config file, loaded and saved as a unit.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    file: ConfigFile,
}

impl ConfigStore {
    /// Location of the config file: `$HISTMINE_CONFIG`, else the user config dir.
    pub fn default_path() -> Option<PathBuf> {
        if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
            return Some(PathBuf::from(path));
        }
        dirs::config_dir().map(|p| p.join("histmine").join("config.toml"))
    }

    /// Load from the default location.
    pub fn load() -> Result<Self> {
        let path = Self::default_path()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        Self::load_from(path)
    }

    /// Load from `path`. A missing file yields an empty store.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = read_config_file(&path)?;
        Ok(Self { path, file })
    }

    /// Re-read the file, dropping unsaved changes.
    pub fn reload(&mut self) -> Result<()> {
        self.file = read_config_file(&self.path)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored settings for `repo_name`, if any.
    pub fn get(&self, repo_name: &str) -> Option<&GrabberConfig> {
        self.file.repositories.get(repo_name)
    }

    /// Stored settings, or defaults for a repository never configured.
    pub fn get_or_default(&self, repo_name: &str, repo_path: &Path, today: NaiveDate) -> GrabberConfig {
        self.get(repo_name)
            .cloned()
            .unwrap_or_else(|| GrabberConfig::defaults(repo_path, today))
    }

    pub fn update(&mut self, repo_name: &str, config: GrabberConfig) {
        self.file.repositories.insert(repo_name.to_string(), config);
    }

    /// Write the file via a temp file and rename.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let content = toml::to_string_pretty(&self.file).context("Failed to serialize config")?;
        let tmp_path = self.path.with_extension("toml.tmp");
        fs::write(&tmp_path, content)
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        if let Err(e) = fs::rename(&tmp_path, &self.path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e).with_context(|| format!("Failed to replace {}", self.path.display()));
        }
        debug!("Saved config to {}", self.path.display());
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<ConfigFile> {
    if !path.exists() {
        debug!("No config at {}, using defaults", path.display());
        return Ok(ConfigFile::default());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}
