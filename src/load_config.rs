/// `load_config` module: Loads the static YAML configuration and injects secrets from the environment.
///
/// This is the only place where user-supplied YAML is parsed and mapped onto the
/// strongly-typed settings of the core crate (repositories, transformation rules,
/// sync defaults, live consumer settings).
///
/// # Secrets
/// `GITHUB_API_TOKEN`, when set in the environment (or `.env`), overrides
/// `github.api_token` from the file. Tokens are better kept out of the file.
///
/// # Errors
/// All errors use `anyhow::Error` and surface at the CLI boundary.
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;
use tracing::{error, info};
use vossibility_core::live::ConsumerOptions;
use vossibility_core::sync::SyncOptions;
use vossibility_core::transform::Transformations;
use vossibility_core::{Destination, Repository, StateFilter};

pub const GITHUB_TOKEN_ENV: &str = "GITHUB_API_TOKEN";

#[derive(Debug, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub github: GitHubSection,
    #[serde(default)]
    pub sink: SinkSection,
    pub repositories: Vec<Repository>,
    #[serde(default)]
    pub transformations: Transformations,
    #[serde(default)]
    pub sync: SyncSection,
    #[serde(default)]
    pub live: LiveSection,
}

impl CliConfig {
    pub fn repository(&self, full_name: &str) -> Option<&Repository> {
        self.repositories.iter().find(|r| r.full_name() == full_name)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubSection {
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_github_url")]
    pub base_url: String,
    /// Retries per request on server errors and rate limiting.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for GitHubSection {
    fn default() -> Self {
        GitHubSection {
            api_token: None,
            base_url: default_github_url(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SinkSection {
    #[serde(default = "default_sink_url")]
    pub url: String,
    #[serde(default = "default_live_index")]
    pub live_index: String,
    #[serde(default = "default_snapshot_index")]
    pub snapshot_index: String,
}

impl Default for SinkSection {
    fn default() -> Self {
        SinkSection {
            url: default_sink_url(),
            live_index: default_live_index(),
            snapshot_index: default_snapshot_index(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncSection {
    #[serde(default = "default_from")]
    pub from: u64,
    #[serde(default)]
    pub sleep_per_page_secs: u64,
    #[serde(default)]
    pub state: StateFilter,
    #[serde(default = "default_storage")]
    pub storage: Destination,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

impl Default for SyncSection {
    fn default() -> Self {
        SyncSection {
            from: default_from(),
            sleep_per_page_secs: 0,
            state: StateFilter::All,
            storage: default_storage(),
            per_page: default_per_page(),
        }
    }
}

impl SyncSection {
    pub fn options(&self) -> SyncOptions {
        SyncOptions {
            from: self.from,
            sleep_per_page: Duration::from_secs(self.sleep_per_page_secs),
            state: self.state,
            storage: self.storage,
            per_page: self.per_page,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LiveSection {
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u16,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for LiveSection {
    fn default() -> Self {
        LiveSection {
            max_in_flight: default_max_in_flight(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl LiveSection {
    pub fn options(&self) -> ConsumerOptions {
        ConsumerOptions {
            max_in_flight: self.max_in_flight,
            max_attempts: self.max_attempts,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

fn default_github_url() -> String {
    "https://api.github.com".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_sink_url() -> String {
    "http://localhost:9200".to_string()
}

fn default_live_index() -> String {
    "vossibility-live".to_string()
}

fn default_snapshot_index() -> String {
    "vossibility-snapshot".to_string()
}

fn default_from() -> u64 {
    1
}

fn default_storage() -> Destination {
    Destination::Snapshot
}

fn default_per_page() -> u32 {
    100
}

fn default_max_in_flight() -> usize {
    16
}

fn default_max_attempts() -> u16 {
    5
}

fn default_retry_delay_ms() -> u64 {
    500
}

/// Loads a static YAML config file and injects secrets from the environment.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    let mut config: CliConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    if config.repositories.is_empty() {
        anyhow::bail!("Config lists no repositories");
    }
    if config.sync.per_page == 0 {
        anyhow::bail!("sync.per_page must be positive");
    }

    match std::env::var(GITHUB_TOKEN_ENV) {
        Ok(token) if !token.is_empty() => {
            info!("{GITHUB_TOKEN_ENV} found in env");
            config.github.api_token = Some(token);
        }
        _ => {
            if config.github.api_token.is_none() {
                info!("No GitHub API token configured, using unauthenticated requests");
            }
        }
    }

    for repository in &config.repositories {
        repository.trace_loaded();
    }
    info!(
        repositories = config.repositories.len(),
        transformations = config.transformations.len(),
        "Config loaded successfully"
    );
    Ok(config)
}
