//! Application configuration
//!
//! One TOML file, every section optional. Command line flags are applied on top
//! with [`AppConfig::apply_overrides`].

use afterglow_control::{FixtureSpec, LightingConfig, WidgetConfig};
use afterglow_core::{ClassifierConfig, FeatureSourceConfig, LogConfig, ThemeConfig};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Everything the session needs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub log: LogConfig,
    pub source: FeatureSourceConfig,
    pub classifier: ClassifierConfig,
    pub theme: ThemeConfig,
    pub lighting: LightingConfig,
    pub widget: WidgetConfig,
    /// Fixtures registered at startup
    pub fixtures: Vec<FixtureSpec>,
    pub session: SessionOptions,
}

/// Which outer surfaces the session drives
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    /// WAV file to analyze; without one the session runs on synthetic frames
    pub audio_file: Option<PathBuf>,
    pub lighting_enabled: bool,
    pub widget_enabled: bool,
    /// Period of the lighting tick that advances fades and strobe releases
    pub lighting_tick_ms: u64,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            audio_file: None,
            lighting_enabled: true,
            widget_enabled: true,
            lighting_tick_ms: 25,
        }
    }
}

/// Values from the command line that win over the file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub endpoint: Option<String>,
    pub widget_url: Option<String>,
    pub audio_file: Option<PathBuf>,
    pub log_level: Option<String>,
    pub no_lighting: bool,
    pub no_widget: bool,
}

impl AppConfig {
    /// Default location: `<config dir>/afterglow/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("afterglow").join("config.toml"))
    }

    /// Load `path`, or the default location when `None`.
    ///
    /// An explicit path must exist. A missing default file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        Self::from_toml(&text).with_context(|| format!("Invalid config file {:?}", path))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn apply_overrides(&mut self, overrides: Overrides) {
        if let Some(endpoint) = overrides.endpoint {
            self.lighting.endpoint = endpoint;
        }
        if let Some(url) = overrides.widget_url {
            self.widget.base_url = url;
        }
        if let Some(file) = overrides.audio_file {
            self.session.audio_file = Some(file);
        }
        if let Some(level) = overrides.log_level {
            self.log.level = level;
        }
        if overrides.no_lighting {
            self.session.lighting_enabled = false;
        }
        if overrides.no_widget {
            self.session.widget_enabled = false;
        }
    }
}
