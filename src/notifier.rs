//! Notifier interface and the WeCom implementation.
//!
//! `WeComNotifier` performs one synchronous token fetch when it connects,
//! then keeps the token fresh in the background. `notify` only reads the
//! latest token and issues the send call.
//!
//! Usage:
//! ```ignore
//! use wecom_notify::{NotifierConfig, Notifier, WeComNotifier};
//!
//! let notifier = WeComNotifier::connect(NotifierConfig::from_env()?).await?;
//! notifier.notify(&["zhangsan".to_string()], "disk almost full").await?;
//! notifier.close().await;
//! ```

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::instrument::WithSubscriber;
use tracing::{Dispatch, debug, info, warn};

use crate::config::NotifierConfig;
use crate::errors;
use crate::send_msg::{SendMessageResponse, TextMessageRequest};
use crate::token::{Error, Result, WeComClient, redact_id};
use crate::token_cache::{TokenManager, WeComTokenSource};

/// Delivers a text message to a set of recipients.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, recipients: &[String], message: &str) -> Result<()>;
}

/// Options for building a `WeComNotifier`.
pub struct NotifierBuilder {
    config: NotifierConfig,
    http: Option<reqwest::Client>,
    dispatch: Option<Dispatch>,
}

impl NotifierBuilder {
    /// Use a custom `reqwest::Client` instead of one built from `http_timeout`.
    pub fn with_http(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    /// Log through `dispatch` instead of the caller's default dispatcher.
    /// `Dispatch::none()` silences the notifier.
    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    /// Validate the config, fetch the first token and start the refresh task.
    pub async fn connect(self) -> Result<WeComNotifier> {
        let dispatch = self
            .dispatch
            .unwrap_or_else(|| tracing::dispatcher::get_default(Dispatch::clone));
        connect_with(self.config, self.http, dispatch.clone())
            .with_subscriber(dispatch)
            .await
    }
}

async fn connect_with(
    config: NotifierConfig,
    http: Option<reqwest::Client>,
    dispatch: Dispatch,
) -> Result<WeComNotifier> {
    config.validate()?;
    let client = match http {
        Some(http) => WeComClient::with_http(http),
        None => WeComClient::new(config.http_timeout)?,
    }
    .with_base_url(config.api_base.clone());

    let initial = client.get_access_token(&config.provider).await?;
    info!(
        corp_id = %redact_id(&config.provider.corp_id),
        api_base = client.base_url(),
        agentid = config.provider.app_id,
        expires_in_secs = initial.expires_in.as_secs(),
        "WeCom notifier connected"
    );

    let tokens = TokenManager::spawn(
        WeComTokenSource::new(client.clone(), config.provider.clone()),
        initial,
        config.refresh.clone(),
    );

    Ok(WeComNotifier {
        client,
        app_id: config.provider.app_id,
        tokens,
        dispatch,
    })
}

/// Sends WeCom app text messages with an internally managed access_token.
pub struct WeComNotifier {
    client: WeComClient,
    app_id: i64,
    tokens: TokenManager,
    dispatch: Dispatch,
}

impl WeComNotifier {
    pub fn builder(config: NotifierConfig) -> NotifierBuilder {
        NotifierBuilder {
            config,
            http: None,
            dispatch: None,
        }
    }

    /// Connect with default HTTP client and logging.
    pub async fn connect(config: NotifierConfig) -> Result<Self> {
        Self::builder(config).connect().await
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    /// Send and return the raw provider response.
    pub async fn send(&self, recipients: &[String], message: &str) -> Result<SendMessageResponse> {
        self.send_inner(recipients, message)
            .with_subscriber(self.dispatch.clone())
            .await
    }

    async fn send_inner(&self, recipients: &[String], message: &str) -> Result<SendMessageResponse> {
        if recipients.is_empty() {
            return Err(Error::InvalidRequest("no recipients"));
        }

        let credential = self.tokens.credential();
        let now = Instant::now();
        if !credential.is_valid_at(now) {
            warn!(
                expired_secs_ago = credential
                    .expires_at()
                    .map(|end| now.saturating_duration_since(end).as_secs())
                    .unwrap_or(0),
                "sending with an access_token past its lifetime; background refresh has not succeeded"
            );
        } else {
            debug!(
                token_remaining_secs = credential.remaining(now).as_secs(),
                "using cached access_token"
            );
        }

        let req = TextMessageRequest::new(recipients, self.app_id, message);
        match self.client.send_text(&credential.token, &req).await {
            Ok(resp) => {
                debug!(recipients = recipients.len(), "notification delivered");
                Ok(resp)
            }
            Err(e) => {
                if let Some(code) = e.provider_code() {
                    if errors::should_refresh_token(code) {
                        info!(errcode = code, "provider rejected access_token; requesting refresh");
                        self.tokens.refresh_now();
                    }
                }
                Err(e)
            }
        }
    }

    /// Stop the refresh task and wait for it to exit.
    pub async fn close(mut self) {
        let dispatch = self.dispatch.clone();
        self.tokens.shutdown().with_subscriber(dispatch).await;
    }
}

#[async_trait]
impl Notifier for WeComNotifier {
    async fn notify(&self, recipients: &[String], message: &str) -> Result<()> {
        self.send(recipients, message).await.map(|_| ())
    }
}
