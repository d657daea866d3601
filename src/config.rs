use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::FinderError;

pub const CONFIG_FILE_NAME: &str = "paper-code.json";
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_RATE_LIMIT_COOLDOWN_SECS: u64 = 60;

/// On-disk config. Every key is optional; missing keys fall back to defaults.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub check_paper: Option<bool>,
    #[serde(default)]
    pub search_web: Option<bool>,
    #[serde(default)]
    pub check_author: Option<bool>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub rate_limit_cooldown_secs: Option<u64>,
    #[serde(default)]
    pub max_rate_limit_retries: Option<u32>,
    #[serde(default)]
    pub recency_check: Option<bool>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub github_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub workers: usize,
    pub check_paper: bool,
    pub search_web: bool,
    pub check_author: bool,
    pub debug: bool,
    pub timeout: Duration,
    pub rate_limit_cooldown: Duration,
    pub max_rate_limit_retries: u32,
    /// Reject repositories updated after the paper's year. A heuristic, so it can be switched off.
    pub recency_check: bool,
    pub user_agent: String,
    pub github_token: Option<String>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            check_paper: false,
            search_web: false,
            check_author: false,
            debug: false,
            timeout: Duration::from_secs(30),
            rate_limit_cooldown: Duration::from_secs(DEFAULT_RATE_LIMIT_COOLDOWN_SECS),
            max_rate_limit_retries: 5,
            recency_check: true,
            user_agent: format!("paper-code/{}", env!("CARGO_PKG_VERSION")),
            github_token: None,
        }
    }
}

/// Command-line values layered over the file config. Flags can only switch features on,
/// except `no_recency_check`, which switches the recency policy off.
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub workers: Option<usize>,
    pub check_paper: bool,
    pub search_web: bool,
    pub check_author: bool,
    pub debug: bool,
    pub timeout_secs: Option<u64>,
    pub no_recency_check: bool,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Explicit path, then `./paper-code.json`, then the per-user config dir, then defaults.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, FinderError> {
        let config = match Self::locate(path) {
            Some(config_path) => {
                let content = fs::read_to_string(&config_path)
                    .map_err(|_| FinderError::ConfigRead(config_path.clone()))?;
                serde_json::from_str::<Config>(&content)
                    .map_err(|err| FinderError::ConfigParse(err.to_string()))?
            }
            None => Config::default(),
        };
        let token_env = std::env::var("GITHUB_TOKEN").ok();
        Ok(Self::resolve_config(config, token_env))
    }

    fn locate(path: Option<&str>) -> Option<PathBuf> {
        if let Some(path) = path {
            return Some(PathBuf::from(path));
        }
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Some(local);
        }
        ProjectDirs::from("", "", "paper-code")
            .map(|dirs| dirs.config_dir().join("config.json"))
            .filter(|candidate| candidate.exists())
    }

    pub fn resolve_config(config: Config, token_env: Option<String>) -> ResolvedConfig {
        let defaults = ResolvedConfig::default();
        let github_token = token_env
            .or(config.github_token)
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());

        ResolvedConfig {
            workers: config.workers.unwrap_or(defaults.workers).max(1),
            check_paper: config.check_paper.unwrap_or(defaults.check_paper),
            search_web: config.search_web.unwrap_or(defaults.search_web),
            check_author: config.check_author.unwrap_or(defaults.check_author),
            debug: defaults.debug,
            timeout: config
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            rate_limit_cooldown: config
                .rate_limit_cooldown_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.rate_limit_cooldown),
            max_rate_limit_retries: config
                .max_rate_limit_retries
                .unwrap_or(defaults.max_rate_limit_retries),
            recency_check: config.recency_check.unwrap_or(defaults.recency_check),
            user_agent: config.user_agent.unwrap_or(defaults.user_agent),
            github_token,
        }
    }
}

impl ResolvedConfig {
    pub fn apply(mut self, overrides: &RunOverrides) -> Self {
        if let Some(workers) = overrides.workers {
            self.workers = workers.max(1);
        }
        self.check_paper |= overrides.check_paper;
        self.search_web |= overrides.search_web;
        self.check_author |= overrides.check_author;
        self.debug |= overrides.debug;
        if let Some(secs) = overrides.timeout_secs {
            self.timeout = Duration::from_secs(secs);
        }
        if overrides.no_recency_check {
            self.recency_check = false;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let resolved = ConfigLoader::resolve_config(Config::default(), None);
        assert_eq!(resolved.workers, DEFAULT_WORKERS);
        assert!(resolved.recency_check);
        assert!(!resolved.check_paper);
        assert_eq!(resolved.rate_limit_cooldown, Duration::from_secs(60));
        assert_eq!(resolved.github_token, None);
    }

    #[test]
    fn env_token_wins_over_file_token() {
        let config = Config {
            github_token: Some("from-file".to_string()),
            ..Config::default()
        };
        let resolved = ConfigLoader::resolve_config(config, Some("from-env".to_string()));
        assert_eq!(resolved.github_token.as_deref(), Some("from-env"));
    }

    #[test]
    fn overrides_switch_features_on() {
        let resolved = ResolvedConfig::default().apply(&RunOverrides {
            workers: Some(0),
            check_paper: true,
            no_recency_check: true,
            ..RunOverrides::default()
        });
        assert_eq!(resolved.workers, 1);
        assert!(resolved.check_paper);
        assert!(!resolved.search_web);
        assert!(!resolved.recency_check);
    }
}
