//! WeCom access_token module.
//!
//! Provides the HTTP client wrapper, the credential type and the unified
//! error type shared by the rest of the crate.
//!
//! Endpoint:
//! - GET https://qyapi.weixin.qq.com/cgi-bin/gettoken?corpid=CORP_ID&corpsecret=CORP_SECRET
//!
//! Response: `{"errcode":0,"errmsg":"ok","access_token":"...","expires_in":7200}`.
//! A non-zero `errcode` is a provider failure; `errmsg` carries the cause.
//!
//! Example:
//! ```ignore
//! use std::time::Duration;
//! use wecom_notify::{ProviderConfig, WeComClient};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = WeComClient::new(Duration::from_secs(10))?;
//!     let provider = ProviderConfig::new("ww_corp_id", 1000002, "app_secret");
//!     let credential = client.get_access_token(&provider).await?;
//!     println!("expires_in: {:?}", credential.expires_in);
//!     Ok(())
//! }
//! ```

use std::time::Duration;

use reqwest::Url;
use serde::Deserialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::config::{ConfigError, ProviderConfig};
use crate::errors;

/// Production API host.
pub const DEFAULT_API_BASE: &str = "https://qyapi.weixin.qq.com";

/// Longest `expires_in` accepted from gettoken (WeCom issues 7200s tokens).
pub const MAX_EXPIRES_IN_SECS: u64 = 7 * 24 * 3600;

/// Bearer credential plus its validity window.
///
/// Valid within `[acquired_at, acquired_at + expires_in)`.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub expires_in: Duration,
    pub acquired_at: Instant,
}

impl Credential {
    pub fn new(token: impl Into<String>, expires_in: Duration) -> Self {
        Self {
            token: token.into(),
            expires_in,
            acquired_at: Instant::now(),
        }
    }

    /// `None` when the lifetime does not fit in an `Instant` (never expires).
    pub fn expires_at(&self) -> Option<Instant> {
        self.acquired_at.checked_add(self.expires_in)
    }

    pub fn is_valid_at(&self, now: Instant) -> bool {
        now >= self.acquired_at && self.expires_at().is_none_or(|end| now < end)
    }

    /// Time left before expiry, zero once expired.
    pub fn remaining(&self, now: Instant) -> Duration {
        match self.expires_at() {
            Some(end) => end.saturating_duration_since(now),
            None => Duration::MAX,
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"[redacted]")
            .field("expires_in", &self.expires_in)
            .field("acquired_at", &self.acquired_at)
            .finish()
    }
}

/// Raw gettoken response. WeCom always sends `errcode`, even on success.
#[derive(Clone, Debug, Deserialize)]
struct TokenRawResp {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Unified error type
#[derive(Debug, Error)]
pub enum Error {
    #[error("http error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("{message}")]
    Provider { code: i64, message: String },

    #[error("unexpected response (status {status}): {error}; body: {body}")]
    Decode {
        status: u16,
        error: String,
        body: String,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_))
    }

    pub fn is_decode(&self) -> bool {
        matches!(self, Error::Decode { .. })
    }

    /// Provider `errcode`, if this is a provider-level failure.
    pub fn provider_code(&self) -> Option<i64> {
        match self {
            Error::Provider { code, .. } => Some(*code),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// HTTP client for the WeCom API
///
/// - Wraps `reqwest::Client`
/// - Token fetching only; refresh lives in `token_cache::TokenManager`
#[derive(Clone, Debug)]
pub struct WeComClient {
    http: reqwest::Client,
    base_url: String,
}

impl WeComClient {
    /// Build a client whose requests are bounded by `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .gzip(true)
            .timeout(timeout)
            .build()?;
        Ok(Self::with_http(http))
    }

    /// Use a custom `reqwest::Client`
    pub fn with_http(http: reqwest::Client) -> Self {
        Self {
            http,
            base_url: DEFAULT_API_BASE.to_string(),
        }
    }

    /// Point the client at another host (stub servers, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub(crate) fn endpoint(&self, path: &str) -> Result<Url> {
        Url::parse(&format!("{}{}", self.base_url, path)).map_err(|e| Error::InvalidUrl(e.to_string()))
    }

    /// Fetch access_token
    ///
    /// GET /cgi-bin/gettoken, params: corpid, corpsecret (never logged)
    #[instrument(level = "debug", skip(self, provider))]
    pub async fn get_access_token(&self, provider: &ProviderConfig) -> Result<Credential> {
        let mut url = self.endpoint("/cgi-bin/gettoken")?;
        {
            let mut qp = url.query_pairs_mut();
            qp.append_pair("corpid", &provider.corp_id);
            qp.append_pair("corpsecret", &provider.app_secret);
        }
        if provider.corp_id.starts_with("wx") {
            warn!(
                "Detected corpid starting with 'wx' (likely an OA/MP appid). WeCom app messages need the corpid (starts with 'ww') and the app Secret."
            );
        }
        debug!(
            corp_id = %redact_id(&provider.corp_id),
            "Requesting WeCom access_token"
        );

        let resp = self.http.get(url).send().await?.error_for_status()?;
        let status = resp.status().as_u16();
        let bytes = resp.bytes().await?;

        let credential = parse_token_response(status, &bytes)?;
        debug!(
            expires_in_secs = credential.expires_in.as_secs(),
            "access_token acquired"
        );
        Ok(credential)
    }
}

/// Decode a gettoken body into a credential stamped with the current instant.
pub(crate) fn parse_token_response(status: u16, bytes: &[u8]) -> Result<Credential> {
    let raw = match serde_json::from_slice::<TokenRawResp>(bytes) {
        Ok(raw) => raw,
        Err(de_err) => {
            return Err(Error::Decode {
                status,
                error: de_err.to_string(),
                body: redact_body(bytes),
            });
        }
    };

    if raw.errcode != 0 {
        warn!(
            errcode = raw.errcode,
            hint = errors::hint_for(raw.errcode),
            "gettoken rejected by provider"
        );
        return Err(Error::Provider {
            code: raw.errcode,
            message: raw.errmsg,
        });
    }

    match (raw.access_token, raw.expires_in) {
        (Some(_), Some(expires_in)) if expires_in > MAX_EXPIRES_IN_SECS => Err(Error::Decode {
            status,
            error: format!("expires_in {expires_in}s exceeds {MAX_EXPIRES_IN_SECS}s"),
            body: redact_body(bytes),
        }),
        (Some(token), Some(expires_in)) if !token.is_empty() => {
            Ok(Credential::new(token, Duration::from_secs(expires_in)))
        }
        _ => Err(Error::Decode {
            status,
            error: "missing access_token or expires_in".to_string(),
            body: redact_body(bytes),
        }),
    }
}

/// Render a response body for error reports: access_token redacted, capped at 2048 bytes.
pub(crate) fn redact_body(bytes: &[u8]) -> String {
    let mut body = String::from_utf8_lossy(bytes).to_string();
    if let Ok(mut v) = serde_json::from_str::<serde_json::Value>(&body) {
        if let Some(obj) = v.as_object_mut() {
            if obj.get("access_token").is_some() {
                obj.insert(
                    "access_token".to_string(),
                    serde_json::Value::String("[redacted]".into()),
                );
            }
        }
        if let Ok(s) = serde_json::to_string(&v) {
            body = s;
        }
    }
    if body.len() > 2048 {
        let mut cut = 2048;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push_str("...");
    }
    body
}

/// Redact an ID for logs: keep first 2 and last 2 chars where possible
pub(crate) fn redact_id(id: &str) -> String {
    let chars: Vec<char> = id.chars().collect();
    if chars.len() <= 4 {
        format!("{}***", id)
    } else {
        let head: String = chars[..2].iter().collect();
        let tail: String = chars[chars.len() - 2..].iter().collect();
        format!("{}***{}", head, tail)
    }
}
