use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

use crate::dvr::JitterMode;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

pub const DEFAULT_VHOST: &str = "__defaultVhost__";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("no vhosts configured")]
    NoVhosts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanKind {
    Session,
    Segment,
    Append,
}

fn default_plan() -> PlanKind {
    PlanKind::Session
}

fn default_path() -> String {
    "./objs/nginx/html/[app]/[stream].[timestamp].flv".to_string()
}

fn default_duration_secs() -> u64 {
    30
}

fn default_wait_keyframe() -> bool {
    true
}

fn default_time_jitter() -> JitterMode {
    JitterMode::Full
}

fn default_apply() -> Vec<String> {
    vec!["all".to_string()]
}

fn default_refresh_interval_ms() -> i64 {
    60_000
}

fn default_hook_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct DvrConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_plan")]
    pub plan: PlanKind,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default = "default_duration_secs")]
    pub duration_secs: u64,
    #[serde(default = "default_wait_keyframe")]
    pub wait_keyframe: bool,
    #[serde(default = "default_time_jitter")]
    pub time_jitter: JitterMode,
    #[serde(default = "default_apply")]
    pub apply: Vec<String>,
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: i64,
}

impl Default for DvrConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            plan: default_plan(),
            path: default_path(),
            duration_secs: default_duration_secs(),
            wait_keyframe: default_wait_keyframe(),
            time_jitter: default_time_jitter(),
            apply: default_apply(),
            refresh_interval_ms: default_refresh_interval_ms(),
        }
    }
}

impl DvrConfig {
    pub fn segment_duration_ms(&self) -> i64 {
        (self.duration_secs as i64).saturating_mul(1000)
    }

    /// Whether the apply filter selects `app/stream` for recording.
    pub fn applies_to(&self, app: &str, stream: &str) -> bool {
        let id = format!("{app}/{stream}");
        self.apply.iter().any(|a| a == "all" || *a == id)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpHooksConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub on_dvr: Vec<String>,
    #[serde(default)]
    pub on_close: Vec<String>,
    #[serde(default = "default_hook_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for HttpHooksConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            on_dvr: Vec::new(),
            on_close: Vec::new(),
            timeout_secs: default_hook_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VhostConfig {
    pub name: String,
    #[serde(default)]
    pub dvr: DvrConfig,
    #[serde(default)]
    pub http_hooks: HttpHooksConfig,
}

impl VhostConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dvr: DvrConfig::default(),
            http_hooks: HttpHooksConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub vhosts: Vec<VhostConfig>,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;

        if config.vhosts.is_empty() {
            return Err(ConfigError::NoVhosts);
        }

        Ok(config)
    }

    /// Settings for `vhost`, falling back to the default vhost.
    pub fn vhost(&self, vhost: &str) -> Option<&VhostConfig> {
        self.vhosts
            .iter()
            .find(|v| v.name == vhost)
            .or_else(|| self.vhosts.iter().find(|v| v.name == DEFAULT_VHOST))
    }
}
