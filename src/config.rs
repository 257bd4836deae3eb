//! Configuration file support for almanac
//!
//! Reads from .almanac/config.toml, found by walking up the directory
//! tree. Secrets (the GitHub token, the Cloudflare API key) can live in
//! the file but environment variables always win, so the file can be
//! committed without them.

use crate::archive::ArchiveConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_BASE_PATH: &str = "data/tasks.json";
pub const DEFAULT_STORE_FILE: &str = "almanac.json";

pub const GITHUB_TOKEN_ENV: &str = "ALMANAC_GITHUB_TOKEN";
pub const CF_API_URL_ENV: &str = "ALMANAC_CF_API_URL";
pub const CF_API_KEY_ENV: &str = "ALMANAC_CF_API_KEY";

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    /// The file exists but does not parse; this is surfaced rather than
    /// silently falling back to defaults.
    Malformed { path: PathBuf, message: String },
    /// A command needs a setting the config does not provide.
    Missing(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Malformed { path, message } => {
                write!(f, "Malformed config {}: {}", path.display(), message)
            }
            ConfigError::Missing(what) => write!(f, "Missing configuration: {}", what),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Configuration structure
#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct Config {
    /// GitHub repository holding the remote documents
    #[serde(default)]
    pub github: GithubSettings,

    /// Cloudflare Worker sync endpoint
    #[serde(default)]
    pub cloudflare: CloudflareSettings,

    /// Archive age thresholds
    #[serde(default)]
    pub archive: ArchiveSettings,

    /// Local store location
    #[serde(default)]
    pub store: StoreSettings,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GithubSettings {
    /// Repository owner (user or org)
    #[serde(default)]
    pub owner: Option<String>,

    /// Repository name
    #[serde(default)]
    pub repo: Option<String>,

    /// Branch to read and write; the repository default when unset
    #[serde(default)]
    pub branch: Option<String>,

    /// Token; prefer the ALMANAC_GITHUB_TOKEN environment variable
    #[serde(default)]
    pub token: Option<String>,

    /// Path of the main data file inside the repository
    #[serde(default = "default_base_path")]
    pub base_path: String,
}

#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct CloudflareSettings {
    #[serde(default)]
    pub api_url: Option<String>,

    /// Key; prefer the ALMANAC_CF_API_KEY environment variable
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ArchiveSettings {
    /// Days before a daily record is archived. Default: 365
    #[serde(default = "default_archive_days")]
    pub daily_record_days: u32,

    /// Days after completion before a task is archived. Default: 365
    #[serde(default = "default_archive_days")]
    pub completed_task_days: u32,

    /// Days since last update before a memo is archived. Default: 365
    #[serde(default = "default_archive_days")]
    pub memo_days: u32,
}

#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct StoreSettings {
    /// Local document path; default .almanac/almanac.json next to the config
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_base_path() -> String {
    DEFAULT_BASE_PATH.to_string()
}

impl Default for GithubSettings {
    fn default() -> Self {
        Self {
            owner: None,
            repo: None,
            branch: None,
            token: None,
            base_path: default_base_path(),
        }
    }
}

fn default_archive_days() -> u32 {
    365
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self {
            daily_record_days: default_archive_days(),
            completed_task_days: default_archive_days(),
            memo_days: default_archive_days(),
        }
    }
}

impl Config {
    /// Load config from .almanac/config.toml.
    /// Returns the default config when no file exists; a file that exists
    /// but does not parse is an error.
    pub fn load() -> Result<Self> {
        let Some(path) = Self::find_config_path() else {
            return Ok(Self::default());
        };
        let contents = std::fs::read_to_string(&path)?;
        toml::from_str(&contents).map_err(|e| ConfigError::Malformed {
            path,
            message: e.to_string(),
        })
    }

    /// Find config.toml by walking up the directory tree
    fn find_config_path() -> Option<PathBuf> {
        let current_dir = std::env::current_dir().ok()?;
        let mut dir = current_dir.as_path();

        loop {
            let config_path = dir.join(".almanac").join("config.toml");
            if config_path.exists() {
                return Some(config_path);
            }

            match dir.parent() {
                Some(parent) => dir = parent,
                None => break,
            }
        }
        None
    }

    /// The directory holding (or that would hold) the config and store.
    pub fn config_dir() -> PathBuf {
        Self::find_config_path()
            .and_then(|p| p.parent().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(".almanac"))
    }

    /// Token from the environment, else the file.
    pub fn github_token(&self) -> Option<String> {
        std::env::var(GITHUB_TOKEN_ENV)
            .ok()
            .filter(|t| !t.is_empty())
            .or_else(|| self.github.token.clone())
    }

    pub fn cloudflare_api_url(&self) -> Option<String> {
        std::env::var(CF_API_URL_ENV)
            .ok()
            .filter(|u| !u.is_empty())
            .or_else(|| self.cloudflare.api_url.clone())
    }

    pub fn cloudflare_api_key(&self) -> Option<String> {
        std::env::var(CF_API_KEY_ENV)
            .ok()
            .filter(|k| !k.is_empty())
            .or_else(|| self.cloudflare.api_key.clone())
    }

    /// Where the local document lives.
    pub fn store_path(&self) -> PathBuf {
        self.store
            .path
            .clone()
            .unwrap_or_else(|| Self::config_dir().join(DEFAULT_STORE_FILE))
    }

    pub fn archive_config(&self) -> ArchiveConfig {
        ArchiveConfig {
            daily_record_days: self.archive.daily_record_days,
            completed_task_days: self.archive.completed_task_days,
            memo_days: self.archive.memo_days,
        }
    }

    /// Validated GitHub settings, or which piece is missing.
    pub fn github_required(&self) -> Result<(String, String, Option<String>, String)> {
        let owner = self
            .github
            .owner
            .clone()
            .ok_or_else(|| ConfigError::Missing("[github] owner".to_string()))?;
        let repo = self
            .github
            .repo
            .clone()
            .ok_or_else(|| ConfigError::Missing("[github] repo".to_string()))?;
        let token = self.github_token().ok_or_else(|| {
            ConfigError::Missing(format!("[github] token or {}", GITHUB_TOKEN_ENV))
        })?;
        Ok((owner, repo, self.github.branch.clone(), token))
    }
}
