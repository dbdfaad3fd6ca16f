//! Application configuration loading and validation.
//!
//! Configuration is loaded from a TOML file, with the one sensitive value
//! (a session cookie jar passphrase, if configured) coming from the
//! environment instead of the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing_subscriber::{fmt, EnvFilter};

use crate::core::agent::{AgentConfig, DailyLimits};
use crate::core::executor::ActivityOperationNames;
use crate::core::poller::{OperationNames, PollerConfig};
use crate::core::pool::BrowserPoolConfig;
use crate::core::rate::Strategy;
use crate::core::schedule::CircadianConfig;
use crate::core::streams::StreamManagerConfig;
use crate::error::{ConfigError, Result};

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), format: default_log_format() }
    }
}

impl LoggingConfig {
    pub fn init(&self) {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));
        match self.format.as_str() {
            "json" => {
                fmt().json().with_env_filter(filter).init();
            }
            _ => {
                fmt().with_env_filter(filter).init();
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitStrategyConfig {
    Wait,
    Error,
    Adaptive,
}

impl Default for RateLimitStrategyConfig {
    fn default() -> Self {
        Self::Wait
    }
}

impl From<RateLimitStrategyConfig> for Strategy {
    fn from(value: RateLimitStrategyConfig) -> Self {
        match value {
            RateLimitStrategyConfig::Wait => Strategy::Wait,
            RateLimitStrategyConfig::Error => Strategy::Error,
            RateLimitStrategyConfig::Adaptive => Strategy::Adaptive,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BrowserConfig {
    #[serde(default = "default_max_handles")]
    pub max_handles: usize,
    #[serde(default = "default_max_pages_per_handle")]
    pub max_pages_per_handle: usize,
    #[serde(default = "default_handle_max_age_secs")]
    pub handle_max_age_secs: u64,
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
    #[serde(default = "default_maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,
}

const fn default_max_handles() -> usize {
    3
}
const fn default_max_pages_per_handle() -> usize {
    5
}
const fn default_handle_max_age_secs() -> u64 {
    30 * 60
}
const fn default_acquire_timeout_secs() -> u64 {
    30
}
const fn default_maintenance_interval_secs() -> u64 {
    5
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            max_handles: default_max_handles(),
            max_pages_per_handle: default_max_pages_per_handle(),
            handle_max_age_secs: default_handle_max_age_secs(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
            maintenance_interval_secs: default_maintenance_interval_secs(),
        }
    }
}

impl From<&BrowserConfig> for BrowserPoolConfig {
    fn from(c: &BrowserConfig) -> Self {
        Self {
            max_handles: c.max_handles,
            max_pages_per_handle: c.max_pages_per_handle,
            handle_max_age: Duration::from_secs(c.handle_max_age_secs),
            acquire_timeout: Duration::from_secs(c.acquire_timeout_secs),
            maintenance_interval: Duration::from_secs(c.maintenance_interval_secs),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub strategy: RateLimitStrategyConfig,
    #[serde(default = "default_wait_cap_secs")]
    pub wait_cap_secs: u64,
}

const fn default_wait_cap_secs() -> u64 {
    900
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { strategy: RateLimitStrategyConfig::default(), wait_cap_secs: default_wait_cap_secs() }
    }
}

#[derive(Debug, Deserialize)]
pub struct StreamsConfig {
    #[serde(default = "default_min_interval_secs")]
    pub min_interval_secs: u64,
    #[serde(default = "default_max_interval_secs")]
    pub max_interval_secs: u64,
    #[serde(default = "default_interval_secs")]
    pub default_interval_secs: u64,
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,
    #[serde(default = "default_backoff_cap_secs")]
    pub backoff_cap_secs: u64,
    #[serde(default = "default_seen_ring_capacity")]
    pub seen_ring_capacity: usize,
    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,
    #[serde(default)]
    pub operations: OperationNamesConfig,
}

const fn default_min_interval_secs() -> u64 {
    15
}
const fn default_max_interval_secs() -> u64 {
    3600
}
const fn default_interval_secs() -> u64 {
    60
}
const fn default_max_consecutive_errors() -> u32 {
    10
}
const fn default_backoff_cap_secs() -> u64 {
    900
}
const fn default_seen_ring_capacity() -> usize {
    500
}
const fn default_stop_grace_secs() -> u64 {
    5
}

impl Default for StreamsConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: default_min_interval_secs(),
            max_interval_secs: default_max_interval_secs(),
            default_interval_secs: default_interval_secs(),
            max_consecutive_errors: default_max_consecutive_errors(),
            backoff_cap_secs: default_backoff_cap_secs(),
            seen_ring_capacity: default_seen_ring_capacity(),
            stop_grace_secs: default_stop_grace_secs(),
            operations: OperationNamesConfig::default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct OperationNamesConfig {
    pub tweet_list: Option<String>,
    pub mention_search: Option<String>,
    pub follower_list: Option<String>,
    pub follower_count: Option<String>,
}

impl From<&OperationNamesConfig> for OperationNames {
    fn from(c: &OperationNamesConfig) -> Self {
        let default = OperationNames::default();
        Self {
            tweet_list: c.tweet_list.clone().unwrap_or(default.tweet_list),
            mention_search: c.mention_search.clone().unwrap_or(default.mention_search),
            follower_list: c.follower_list.clone().unwrap_or(default.follower_list),
            follower_count: c.follower_count.clone().unwrap_or(default.follower_count),
        }
    }
}

impl StreamsConfig {
    #[must_use]
    pub fn to_manager_config(&self) -> StreamManagerConfig {
        StreamManagerConfig {
            min_interval: Duration::from_secs(self.min_interval_secs),
            max_interval: Duration::from_secs(self.max_interval_secs),
            default_interval: Duration::from_secs(self.default_interval_secs),
            max_consecutive_errors: self.max_consecutive_errors,
            backoff_cap: Duration::from_secs(self.backoff_cap_secs),
            seen_ring_capacity: self.seen_ring_capacity,
            stop_grace: Duration::from_secs(self.stop_grace_secs),
            poller: PollerConfig {
                seen_ring_capacity: self.seen_ring_capacity,
                backoff_cap: Duration::from_secs(self.backoff_cap_secs),
                max_consecutive_errors: self.max_consecutive_errors,
                operations: OperationNames::from(&self.operations),
                ..PollerConfig::default()
            },
        }
    }
}

/// One configured agent identity: persona, circadian schedule, and daily
/// action caps. A deployment may run several of these concurrently, each
/// against its own logged-in session.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentProfileConfig {
    pub agent_id: String,
    #[serde(default = "default_persona")]
    pub persona: String,
    #[serde(default = "default_rng_seed")]
    pub rng_seed: u64,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub sleep_hours: Option<(u32, u32)>,
    #[serde(default)]
    pub search_queries: Vec<String>,
    #[serde(default)]
    pub influencer_usernames: Vec<String>,
    #[serde(default)]
    pub daily_limits: DailyLimitsConfig,
}

fn default_persona() -> String {
    "default".into()
}

fn default_rng_seed() -> u64 {
    0
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DailyLimitsConfig {
    pub likes: Option<u32>,
    pub follows: Option<u32>,
    pub comments: Option<u32>,
    pub posts: Option<u32>,
}

impl From<&DailyLimitsConfig> for DailyLimits {
    fn from(c: &DailyLimitsConfig) -> Self {
        let default = DailyLimits::default();
        Self {
            likes: c.likes.unwrap_or(default.likes),
            follows: c.follows.unwrap_or(default.follows),
            comments: c.comments.unwrap_or(default.comments),
            posts: c.posts.unwrap_or(default.posts),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ActivityOperationNamesConfig {
    pub home_feed: Option<String>,
    pub search_engage: Option<String>,
    pub influencer_visit: Option<String>,
    pub create_content: Option<String>,
    pub engage_replies: Option<String>,
    pub explore: Option<String>,
    pub own_profile: Option<String>,
    pub search_people: Option<String>,
    pub like: Option<String>,
    pub follow: Option<String>,
    pub comment: Option<String>,
    pub post: Option<String>,
}

impl From<&ActivityOperationNamesConfig> for ActivityOperationNames {
    fn from(c: &ActivityOperationNamesConfig) -> Self {
        let default = ActivityOperationNames::default();
        Self {
            home_feed: c.home_feed.clone().unwrap_or(default.home_feed),
            search_engage: c.search_engage.clone().unwrap_or(default.search_engage),
            influencer_visit: c.influencer_visit.clone().unwrap_or(default.influencer_visit),
            create_content: c.create_content.clone().unwrap_or(default.create_content),
            engage_replies: c.engage_replies.clone().unwrap_or(default.engage_replies),
            explore: c.explore.clone().unwrap_or(default.explore),
            own_profile: c.own_profile.clone().unwrap_or(default.own_profile),
            search_people: c.search_people.clone().unwrap_or(default.search_people),
            like: c.like.clone().unwrap_or(default.like),
            follow: c.follow.clone().unwrap_or(default.follow),
            comment: c.comment.clone().unwrap_or(default.comment),
            post: c.post.clone().unwrap_or(default.post),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AgentsConfig {
    #[serde(default = "default_agent_operation_timeout_secs")]
    pub operation_timeout_secs: u64,
    #[serde(default)]
    pub operations: ActivityOperationNamesConfig,
    #[serde(default)]
    pub profiles: Vec<AgentProfileConfig>,
}

const fn default_agent_operation_timeout_secs() -> u64 {
    20
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            operation_timeout_secs: default_agent_operation_timeout_secs(),
            operations: ActivityOperationNamesConfig::default(),
            profiles: Vec::new(),
        }
    }
}

impl AgentProfileConfig {
    /// Build the core `AgentConfig` this profile describes. `ConfigError`
    /// propagates an unrecognized IANA timezone name.
    pub fn to_agent_config(&self) -> Result<AgentConfig> {
        let timezone = match &self.timezone {
            Some(name) => name.parse().map_err(|_| {
                crate::error::Error::Config(ConfigError::InvalidValue {
                    field: "timezone",
                    reason: format!("not a recognized IANA timezone: {name}"),
                })
            })?,
            None => chrono_tz::UTC,
        };
        let mut circadian = CircadianConfig { timezone, ..CircadianConfig::default() };
        if let Some(hours) = self.sleep_hours {
            circadian.sleep_hours = hours;
        }
        circadian.search_queries = self.search_queries.clone();
        circadian.influencer_usernames = self.influencer_usernames.clone();

        Ok(AgentConfig {
            agent_id: self.agent_id.clone(),
            circadian,
            daily_limits: DailyLimits::from(&self.daily_limits),
            persona: self.persona.clone(),
            rng_seed: self.rng_seed,
            sleep_poll: Duration::from_secs(60),
            quota_exhausted_wait: Duration::from_secs(15 * 60),
            error_wait: Duration::from_secs(30),
            rate_limited_wait: Duration::from_secs(15 * 60),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub streams: StreamsConfig,
    #[serde(default)]
    pub agents: AgentsConfig,
    /// Path the in-memory state store's periodic snapshot would be written
    /// to, if a durable backend were configured. Reserved for a future
    /// on-disk `StateStore`; the in-memory store ignores it.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            browser: BrowserConfig::default(),
            rate_limit: RateLimitConfig::default(),
            streams: StreamsConfig::default(),
            agents: AgentsConfig::default(),
            data_dir: None,
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        let config: Self = toml::from_str(&content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    #[allow(clippy::result_large_err)]
    fn validate(&self) -> Result<()> {
        if self.streams.min_interval_secs == 0 {
            return Err(ConfigError::InvalidValue { field: "streams.min_interval_secs", reason: "must be nonzero".into() }.into());
        }
        if self.streams.min_interval_secs > self.streams.max_interval_secs {
            return Err(ConfigError::InvalidValue {
                field: "streams.min_interval_secs",
                reason: "must not exceed streams.max_interval_secs".into(),
            }
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_inverted_interval_bounds() {
        let config = Config {
            streams: StreamsConfig { min_interval_secs: 100, max_interval_secs: 10, ..StreamsConfig::default() },
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn agent_profile_rejects_unknown_timezone() {
        let profile = AgentProfileConfig {
            agent_id: "a1".into(),
            persona: default_persona(),
            rng_seed: 0,
            timezone: Some("Not/ARealZone".into()),
            sleep_hours: None,
            search_queries: Vec::new(),
            influencer_usernames: Vec::new(),
            daily_limits: DailyLimitsConfig::default(),
        };
        assert!(profile.to_agent_config().is_err());
    }
}
