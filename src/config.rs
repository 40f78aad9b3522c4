//! Notifier configuration.
//!
//! Env:
//! - WECOM_CORP_ID: corpid (starts with "ww")
//! - WECOM_AGENT_ID: app agentid, sent with every message
//! - WECOM_APP_SECRET: app Secret from the Admin Portal
//! - WECOM_REFRESH_MARGIN_SECS: refresh this long before expiry (default 300)
//! - WECOM_RETRY_INTERVAL_SECS: retry interval after a failed refresh (default 60)
//! - WECOM_HTTP_TIMEOUT_SECS: per-request timeout (default 10)
//! - WECOM_API_BASE: API host (default https://qyapi.weixin.qq.com)

use std::time::Duration;

use thiserror::Error;

use crate::token::DEFAULT_API_BASE;
use crate::token_cache::RefreshOptions;

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing {0}")]
    Missing(&'static str),

    #[error("invalid {field} ({value}): {reason}")]
    Invalid {
        field: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// App credentials. Immutable for the lifetime of a notifier.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub corp_id: String,
    /// Sent as `agentid`.
    pub app_id: i64,
    pub app_secret: String,
}

impl ProviderConfig {
    pub fn new(corp_id: impl Into<String>, app_id: i64, app_secret: impl Into<String>) -> Self {
        Self {
            corp_id: corp_id.into(),
            app_id,
            app_secret: app_secret.into(),
        }
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("corp_id", &self.corp_id)
            .field("app_id", &self.app_id)
            .field("app_secret", &"[redacted]")
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct NotifierConfig {
    pub provider: ProviderConfig,
    pub refresh: RefreshOptions,
    pub http_timeout: Duration,
    pub api_base: String,
}

impl NotifierConfig {
    pub fn new(provider: ProviderConfig) -> Self {
        Self {
            provider,
            refresh: RefreshOptions::default(),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }

    /// Build a config from `WECOM_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let corp_id = lookup("WECOM_CORP_ID").ok_or(ConfigError::Missing("WECOM_CORP_ID"))?;
        let app_secret =
            lookup("WECOM_APP_SECRET").ok_or(ConfigError::Missing("WECOM_APP_SECRET"))?;
        let agent_id = lookup("WECOM_AGENT_ID").ok_or(ConfigError::Missing("WECOM_AGENT_ID"))?;
        let app_id = agent_id
            .trim()
            .parse::<i64>()
            .map_err(|_| ConfigError::Invalid {
                field: "WECOM_AGENT_ID",
                value: agent_id.clone(),
                reason: "expected an integer",
            })?;

        let mut config = Self::new(ProviderConfig::new(corp_id, app_id, app_secret));
        if let Some(secs) = secs_var(&lookup, "WECOM_REFRESH_MARGIN_SECS")? {
            config.refresh.margin = secs;
        }
        if let Some(secs) = secs_var(&lookup, "WECOM_RETRY_INTERVAL_SECS")? {
            config.refresh.retry_interval = secs;
        }
        if let Some(secs) = secs_var(&lookup, "WECOM_HTTP_TIMEOUT_SECS")? {
            config.http_timeout = secs;
        }
        if let Some(base) = lookup("WECOM_API_BASE") {
            config.api_base = base;
        }
        Ok(config)
    }

    pub fn with_refresh(mut self, refresh: RefreshOptions) -> Self {
        self.refresh = refresh;
        self
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    /// Reject configurations the refresh loop cannot honor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider.corp_id.trim().is_empty() {
            return Err(ConfigError::Missing("corp_id"));
        }
        if self.provider.app_secret.is_empty() {
            return Err(ConfigError::Missing("app_secret"));
        }
        if self.refresh.retry_interval.is_zero() {
            return Err(ConfigError::Invalid {
                field: "retry_interval",
                value: "0s".into(),
                reason: "must be positive",
            });
        }
        if self.http_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                field: "http_timeout",
                value: "0s".into(),
                reason: "must be positive",
            });
        }
        // A request that outlives the margin lets the token expire mid-refresh.
        if self.http_timeout >= self.refresh.margin {
            return Err(ConfigError::Invalid {
                field: "http_timeout",
                value: format!("{}s", self.http_timeout.as_secs()),
                reason: "must be shorter than the refresh margin",
            });
        }
        Ok(())
    }
}

fn secs_var<F>(lookup: &F, key: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(|s| Some(Duration::from_secs(s)))
            .map_err(|_| ConfigError::Invalid {
                field: key,
                value: raw,
                reason: "expected whole seconds",
            }),
    }
}
