use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::domain::{Query, VenueId, invitation_label};
use crate::error::HarvestError;

pub const DEFAULT_CONFIG_FILE: &str = "harvest.json";
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_V1_BASE_URL: &str = "https://api.openreview.net";
pub const DEFAULT_V2_BASE_URL: &str = "https://api2.openreview.net";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default)]
    pub cache_dir: Option<String>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub venues: Vec<VenueEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct VenueEntry {
    pub id: String,
    #[serde(default)]
    pub queries: Vec<QueryEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum QueryEntry {
    Shorthand(String),
    Detailed(QueryEntryObject),
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct QueryEntryObject {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub invitation: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub content: BTreeMap<String, String>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub decision: Option<String>,
}

// Retry ceilings for the request executor. `null` ceilings mean "retry forever".
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_rate_limit_delay_secs")]
    pub rate_limit_delay_secs: u64,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_true")]
    pub jitter: bool,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: Option<u32>,
    #[serde(default = "default_max_elapsed_secs")]
    pub max_elapsed_secs: Option<u64>,
    #[serde(default = "default_session_retry_delay_secs")]
    pub session_retry_delay_secs: u64,
    #[serde(default)]
    pub session_attempts: Option<u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            rate_limit_delay_secs: default_rate_limit_delay_secs(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_secs: default_max_delay_secs(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
            max_attempts: default_max_attempts(),
            max_elapsed_secs: default_max_elapsed_secs(),
            session_retry_delay_secs: default_session_retry_delay_secs(),
            session_attempts: None,
        }
    }
}

impl RetryConfig {
    pub fn rate_limit_delay(&self) -> Duration {
        Duration::from_secs(self.rate_limit_delay_secs)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay_secs)
    }

    pub fn max_elapsed(&self) -> Option<Duration> {
        self.max_elapsed_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> Result<(), HarvestError> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(HarvestError::ConfigParse(format!(
                "retry.backoff_multiplier must be a finite number >= 1, got {}",
                self.backoff_multiplier
            )));
        }
        Ok(())
    }

    pub fn session_retry_delay(&self) -> Duration {
        Duration::from_secs(self.session_retry_delay_secs)
    }
}

fn default_rate_limit_delay_secs() -> u64 {
    10
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_secs() -> u64 {
    60
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> Option<u32> {
    Some(30)
}

fn default_max_elapsed_secs() -> Option<u64> {
    Some(30 * 60)
}

fn default_session_retry_delay_secs() -> u64 {
    30
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ApiConfig {
    #[serde(default = "default_v1_base_url")]
    pub v1_base_url: String,
    #[serde(default = "default_v2_base_url")]
    pub v2_base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            v1_base_url: default_v1_base_url(),
            v2_base_url: default_v2_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_v1_base_url() -> String {
    DEFAULT_V1_BASE_URL.to_string()
}

fn default_v2_base_url() -> String {
    DEFAULT_V2_BASE_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Default)]
pub struct VenueTable {
    entries: BTreeMap<VenueId, Vec<Query>>,
}

impl VenueTable {
    pub fn insert(&mut self, venue: VenueId, queries: Vec<Query>) {
        self.entries.insert(venue, queries);
    }

    pub fn get(&self, venue: &VenueId) -> Option<&[Query]> {
        self.entries
            .get(venue)
            .filter(|queries| !queries.is_empty())
            .map(Vec::as_slice)
    }

    pub fn venues(&self) -> impl Iterator<Item = &VenueId> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn from_env() -> Option<Self> {
        let username = std::env::var("OPENREVIEW_USERNAME").ok()?;
        let password = std::env::var("OPENREVIEW_PASSWORD").ok()?;
        if username.trim().is_empty() || password.is_empty() {
            return None;
        }
        Some(Self {
            username: username.trim().to_string(),
            password,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub data_dir: Utf8PathBuf,
    pub cache_dir: Utf8PathBuf,
    pub workers: usize,
    pub retry: RetryConfig,
    pub api: ApiConfig,
    pub venues: VenueTable,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            schema_version: 1,
            data_dir: Utf8PathBuf::from("data"),
            cache_dir: Utf8PathBuf::from("cache"),
            workers: DEFAULT_WORKERS,
            retry: RetryConfig::default(),
            api: ApiConfig::default(),
            venues: VenueTable::default(),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    // An explicit path must exist; otherwise `./harvest.json`, then the user
    // config dir, then built-in defaults.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, HarvestError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => match Self::discover() {
                Some(found) => found,
                None => return Ok(ResolvedConfig::default()),
            },
        };

        let content = fs::read_to_string(&config_path)
            .map_err(|_| HarvestError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| HarvestError::ConfigParse(err.to_string()))?;

        tracing::debug!(path = %config_path.display(), "loaded config");
        Self::resolve_config(config)
    }

    fn discover() -> Option<PathBuf> {
        let local = PathBuf::from(DEFAULT_CONFIG_FILE);
        if local.exists() {
            return Some(local);
        }
        ProjectDirs::from("net", "openreview", "or-harvest")
            .map(|dirs| dirs.config_dir().join(DEFAULT_CONFIG_FILE))
            .filter(|path| path.exists())
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, HarvestError> {
        config.retry.validate()?;
        let defaults = ResolvedConfig::default();
        let mut venues = VenueTable::default();
        for entry in config.venues {
            let venue: VenueId = entry.id.parse()?;
            let queries = entry
                .queries
                .into_iter()
                .map(resolve_query)
                .collect::<Result<Vec<_>, HarvestError>>()?;
            venues.insert(venue, queries);
        }

        Ok(ResolvedConfig {
            schema_version: config.schema_version.unwrap_or(1),
            data_dir: config
                .data_dir
                .map(Utf8PathBuf::from)
                .unwrap_or(defaults.data_dir),
            cache_dir: config
                .cache_dir
                .map(Utf8PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            workers: config.workers.unwrap_or(DEFAULT_WORKERS).max(1),
            retry: config.retry,
            api: config.api,
            venues,
        })
    }
}

fn resolve_query(entry: QueryEntry) -> Result<Query, HarvestError> {
    match entry {
        QueryEntry::Shorthand(invitation) => {
            if invitation.trim().is_empty() {
                return Err(HarvestError::InvalidQuery("empty invitation".to_string()));
            }
            Ok(Query::for_invitation(invitation.trim()))
        }
        QueryEntry::Detailed(obj) => {
            if obj.invitation.is_none() && obj.domain.is_none() {
                return Err(HarvestError::InvalidQuery(format!(
                    "query {:?} needs an invitation or a domain",
                    obj.name.as_deref().unwrap_or("<unnamed>")
                )));
            }
            let name = obj
                .name
                .or_else(|| obj.content.get("venue").cloned())
                .or_else(|| obj.invitation.as_deref().map(invitation_label))
                .or_else(|| obj.domain.clone())
                .unwrap_or_default();
            Ok(Query {
                name,
                invitation: obj.invitation,
                domain: obj.domain,
                content: obj.content,
                details: obj.details,
                decision: obj.decision,
            })
        }
    }
}
