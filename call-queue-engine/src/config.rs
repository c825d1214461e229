use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Top-level engine configuration.
///
/// Loaded from environment variables with the `CALLQ_` prefix (see
/// [`EngineConfig::from_env`]), or constructed directly for tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub dispatch: DispatchConfig,
    pub supervisor: SupervisorConfig,
    pub provider: ProviderConfig,
    pub agent: AgentConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

/// Worker pool and rate limiting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Number of dispatcher workers pulling from the ready queues.
    pub queue_workers: usize,
    /// Hard ceiling on simultaneously supervised calls.
    pub max_concurrent_calls: usize,
    /// Token-bucket refill rate, calls initiated per second.
    pub rate_limit_per_second: u32,
    /// How often the scheduled-call promoter runs.
    pub promoter_interval: Duration,
    /// How often the sweeper scans the active set.
    pub sweeper_interval: Duration,
    /// Sweeper: force-complete a call whose supervisor has lived this long.
    pub hard_deadline: Duration,
    /// Sweeper: only force-complete if the last update is this stale.
    pub stuck_threshold: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_workers: 10,
            max_concurrent_calls: 100,
            rate_limit_per_second: 10,
            promoter_interval: Duration::from_secs(1),
            sweeper_interval: Duration::from_secs(30),
            hard_deadline: Duration::from_secs(300),
            stuck_threshold: Duration::from_secs(60),
        }
    }
}

/// Per-call supervision timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Delay after initiation before the first provider status poll.
    pub initial_status_delay: Duration,
    /// Interval between provider status polls thereafter.
    pub status_check_interval: Duration,
    /// Per-HTTP-call timeout for provider/agent/sink requests.
    pub request_timeout: Duration,
    /// Attempt ceiling for dispatching-entry retries on transient initiate errors.
    pub max_status_retries: u32,
    /// Wall-clock deadline before a non-terminal call is synthesized Missed.
    pub stuck_call_deadline: Duration,
    /// Duration below which a "completed" provider status is reclassified Missed.
    pub min_connected_seconds: i64,
    /// Consecutive transient polling errors tolerated before declaring the
    /// provider unreachable.
    pub max_consecutive_poll_errors: u32,
    /// Delivery retry ceiling for the backend sink POST.
    pub max_delivery_retries: u32,
    /// Backoff base for both initiate retries and delivery retries.
    pub backoff_base: Duration,
    /// Backoff cap.
    pub backoff_cap: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            initial_status_delay: Duration::from_secs(20),
            status_check_interval: Duration::from_secs(15),
            request_timeout: Duration::from_secs(30),
            max_status_retries: 3,
            stuck_call_deadline: Duration::from_secs(45),
            min_connected_seconds: 5,
            max_consecutive_poll_errors: 6,
            max_delivery_retries: 5,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(30),
        }
    }
}

/// Telephony provider credentials and endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,
    pub account_id: String,
    pub auth_token: String,
    pub outbound_number: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            account_id: String::new(),
            auth_token: String::new(),
            outbound_number: String::new(),
        }
    }
}

/// Voice-agent and backend sink endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub agent_base_url: String,
    pub backend_sink_url: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_base_url: String::new(),
            backend_sink_url: String::new(),
        }
    }
}

/// State store persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub database_url: String,
    pub terminal_retention: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://callq.db".to_string(),
            terminal_retention: Duration::from_secs(24 * 3600),
        }
    }
}

/// Structured logging output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dispatch: DispatchConfig::default(),
            supervisor: SupervisorConfig::default(),
            provider: ProviderConfig::default(),
            agent: AgentConfig::default(),
            store: StoreConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration, layering `CALLQ_*` environment variables over the
    /// compiled-in defaults.
    pub fn from_env() -> Result<Self> {
        let cfg: Self = config::Config::builder()
            .add_source(
                config::Environment::with_prefix("CALLQ")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| EngineError::config(format!("failed to build config: {e}")))?
            .try_deserialize()
            .unwrap_or_else(|_| EngineConfig::default());

        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject inconsistent configuration before the engine starts.
    pub fn validate(&self) -> Result<()> {
        if self.dispatch.queue_workers == 0 {
            return Err(EngineError::config("queue_workers must be greater than 0"));
        }
        if self.dispatch.max_concurrent_calls == 0 {
            return Err(EngineError::config(
                "max_concurrent_calls must be greater than 0",
            ));
        }
        if self.dispatch.rate_limit_per_second == 0 {
            return Err(EngineError::config(
                "rate_limit_per_second must be greater than 0",
            ));
        }
        if self.supervisor.min_connected_seconds < 0 {
            return Err(EngineError::config(
                "min_connected_seconds cannot be negative",
            ));
        }
        if self.provider.base_url.is_empty() {
            return Err(EngineError::config("provider.base_url is required"));
        }
        if self.provider.account_id.is_empty() || self.provider.auth_token.is_empty() {
            return Err(EngineError::config("provider credentials are required"));
        }
        if self.agent.agent_base_url.is_empty() {
            return Err(EngineError::config("agent.agent_base_url is required"));
        }
        if self.agent.backend_sink_url.is_empty() {
            return Err(EngineError::config("agent.backend_sink_url is required"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_fails_validation_without_credentials() {
        let cfg = EngineConfig::default();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn filled_in_config_validates() {
        let mut cfg = EngineConfig::default();
        cfg.provider.base_url = "https://provider.example.com".into();
        cfg.provider.account_id = "AC123".into();
        cfg.provider.auth_token = "secret".into();
        cfg.agent.agent_base_url = "https://agent.example.com".into();
        cfg.agent.backend_sink_url = "https://backend.example.com/calls".into();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_zero_workers() {
        let mut cfg = EngineConfig::default();
        cfg.dispatch.queue_workers = 0;
        assert!(cfg.validate().is_err());
    }
}
