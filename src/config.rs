//! API configuration.
//!
//! Stored as YAML at `<data-dir>/config.yaml`. A missing file means the
//! service has not been configured yet.

use crate::ai::{non_empty, ApiOptions};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::{fs, io};
use tracing::{debug, info};

pub const CONFIG_FILE: &str = "config.yaml";
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to access config: {0}")]
    Io(#[from] io::Error),

    #[error("invalid config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("an API key is required")]
    MissingApiKey,
}

fn default_preset() -> String {
    "auto".to_string()
}

fn default_retention() -> u32 {
    DEFAULT_RETENTION_DAYS
}

fn default_enabled() -> bool {
    true
}

fn default_hour() -> u32 {
    8
}

fn default_hours() -> u32 {
    48
}

fn default_top_n() -> usize {
    15
}

/// A daily generation time with optional per-schedule backend overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    #[serde(default)]
    pub label: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Local hour, 0-23.
    #[serde(default = "default_hour")]
    pub hour: u32,
    #[serde(default)]
    pub minute: u32,
    /// Recency window in hours.
    #[serde(default = "default_hours")]
    pub hours: u32,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,
    #[serde(default, rename = "baseURL", skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            label: String::new(),
            enabled: default_enabled(),
            hour: default_hour(),
            minute: 0,
            hours: default_hours(),
            top_n: default_top_n(),
            preset: None,
            base_url: None,
            model: None,
        }
    }
}

impl Schedule {
    /// Name used in logs.
    pub fn name(&self) -> &str {
        if !self.label.is_empty() {
            &self.label
        } else {
            self.preset.as_deref().filter(|p| !p.is_empty()).unwrap_or("default")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    #[serde(default = "default_preset")]
    pub preset: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default, rename = "baseURL")]
    pub base_url: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub schedules: Vec<Schedule>,
    /// Cached translations older than this are pruned at startup.
    #[serde(default = "default_retention")]
    pub translation_retention_days: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            preset: default_preset(),
            api_key: String::new(),
            base_url: String::new(),
            model: String::new(),
            schedules: Vec::new(),
            translation_retention_days: DEFAULT_RETENTION_DAYS,
        }
    }
}

/// The config as shown to clients: the key is never echoed back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaskedConfig {
    pub preset: String,
    pub api_key_masked: String,
    #[serde(rename = "baseURL")]
    pub base_url: String,
    pub model: String,
    pub schedules: Vec<Schedule>,
    pub translation_retention_days: u32,
}

impl ApiConfig {
    /// Read the config, or `None` when the file does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        let contents = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_yaml::from_str(&contents)?))
    }

    /// Validate and write the config, replacing any previous file.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("yaml.tmp");
        fs::write(&tmp, serde_yaml::to_string(self)?)?;
        fs::rename(&tmp, path)?;
        info!(path = %path.display(), schedules = self.schedules.len(), "Saved API config");
        Ok(())
    }

    /// Backend options for ad-hoc calls.
    pub fn api_options(&self) -> ApiOptions {
        ApiOptions::new(&self.preset, &self.base_url, &self.model)
    }

    /// Backend options for a scheduled run: schedule overrides, then config.
    /// Preset defaults are applied later by backend selection.
    pub fn schedule_options(&self, schedule: &Schedule) -> ApiOptions {
        let pick = |over: &Option<String>, base: &str| {
            over.as_deref().and_then(non_empty).unwrap_or_else(|| base.to_string())
        };
        ApiOptions::new(
            &pick(&schedule.preset, &self.preset),
            &pick(&schedule.base_url, &self.base_url),
            &pick(&schedule.model, &self.model),
        )
    }

    /// `first6***last4`, or `***` for keys too short to show any of.
    pub fn masked_key(&self) -> String {
        let chars: Vec<char> = self.api_key.chars().collect();
        if chars.len() <= 10 {
            return "***".to_string();
        }
        let head: String = chars[..6].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}***{tail}")
    }

    pub fn masked(&self) -> MaskedConfig {
        MaskedConfig {
            preset: self.preset.clone(),
            api_key_masked: self.masked_key(),
            base_url: self.base_url.clone(),
            model: self.model.clone(),
            schedules: self.schedules.clone(),
            translation_retention_days: self.translation_retention_days,
        }
    }
}
