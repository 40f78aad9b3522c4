//! In-process access_token manager with background refresh.
//!
//! Design notes:
//! - One background task per manager is the only writer of the credential.
//! - The credential is published through a `watch` channel; senders read the
//!   latest snapshot and never wait on the network.
//! - The task sleeps until `expires_in - margin`, refreshes, and repeats. A
//!   failed refresh is logged and retried after `retry_interval`; explicit
//!   refresh requests during that backoff do not shorten it.
//! - Cancellation is cooperative: observed while the task waits, never in the
//!   middle of an upstream call. `shutdown` cancels and joins; dropping the
//!   manager only cancels.
//!
//! Example:
//! ```ignore
//! use wecom_notify::token_cache::{RefreshOptions, TokenManager, WeComTokenSource};
//!
//! let initial = client.get_access_token(&provider).await?;
//! let mut tokens = TokenManager::spawn(
//!     WeComTokenSource::new(client, provider),
//!     initial,
//!     RefreshOptions::default(),
//! );
//! let token = tokens.access_token();
//! tokens.shutdown().await;
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;
use tracing::{debug, error, info, warn};

use crate::config::ProviderConfig;
use crate::errors;
use crate::token::{Credential, Result, WeComClient};

/// Anything that can produce a fresh credential.
#[async_trait]
pub trait TokenSource: Send + Sync + 'static {
    async fn acquire(&self) -> Result<Credential>;
}

/// Fetches credentials from the WeCom gettoken endpoint.
#[derive(Clone, Debug)]
pub struct WeComTokenSource {
    client: WeComClient,
    provider: ProviderConfig,
}

impl WeComTokenSource {
    pub fn new(client: WeComClient, provider: ProviderConfig) -> Self {
        Self { client, provider }
    }
}

#[async_trait]
impl TokenSource for WeComTokenSource {
    async fn acquire(&self) -> Result<Credential> {
        self.client.get_access_token(&self.provider).await
    }
}

/// Timing knobs for the refresh loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefreshOptions {
    /// Refresh this long before the credential expires (default: 300s)
    pub margin: Duration,
    /// Wait after a failed refresh before trying again (default: 60s)
    pub retry_interval: Duration,
}

impl Default for RefreshOptions {
    fn default() -> Self {
        Self {
            margin: Duration::from_secs(300),
            retry_interval: Duration::from_secs(60),
        }
    }
}

impl RefreshOptions {
    /// How long to wait before refreshing a credential with lifetime `expires_in`.
    ///
    /// A lifetime no longer than the margin refreshes at half-life so the
    /// loop never spins; a zero lifetime falls back to `retry_interval`.
    pub fn refresh_delay(&self, expires_in: Duration) -> Duration {
        if expires_in > self.margin {
            expires_in - self.margin
        } else if expires_in.is_zero() {
            self.retry_interval
        } else {
            expires_in / 2
        }
    }
}

/// Owns the current credential and the task that keeps it fresh.
pub struct TokenManager {
    current: watch::Receiver<Credential>,
    refresh: Arc<Notify>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl TokenManager {
    /// Publish `initial` and start refreshing it in the background.
    ///
    /// Must be called inside a Tokio runtime. The task logs through the
    /// caller's current default dispatcher.
    pub fn spawn<S: TokenSource>(source: S, initial: Credential, opts: RefreshOptions) -> Self {
        let (tx, rx) = watch::channel(initial);
        let refresh = Arc::new(Notify::new());
        let cancel = CancellationToken::new();

        let task = tokio::spawn(
            refresh_loop(source, tx, refresh.clone(), cancel.clone(), opts)
                .with_current_subscriber(),
        );

        Self {
            current: rx,
            refresh,
            cancel,
            task: Some(task),
        }
    }

    /// Snapshot of the current credential.
    pub fn credential(&self) -> Credential {
        self.current.borrow().clone()
    }

    pub fn access_token(&self) -> String {
        self.current.borrow().token.clone()
    }

    /// Receiver that observes every published credential.
    pub fn subscribe(&self) -> watch::Receiver<Credential> {
        self.current.clone()
    }

    /// Wake the loop for an immediate refresh. Requests coalesce, and are
    /// held back while the loop waits out a failed refresh.
    pub fn refresh_now(&self) {
        self.refresh.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel the refresh task and wait for it to exit.
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("token refresh task did not exit cleanly: {e}");
            } else {
                debug!("token refresh task stopped");
            }
        }
    }
}

impl Drop for TokenManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn refresh_loop<S: TokenSource>(
    source: S,
    tx: watch::Sender<Credential>,
    refresh: Arc<Notify>,
    cancel: CancellationToken,
    opts: RefreshOptions,
) {
    let mut deadline = deadline_after(opts.refresh_delay(tx.borrow().expires_in));
    // Set after a failed acquire; refresh requests wait out the retry interval.
    let mut backing_off = false;
    let mut round = 0u64;

    loop {
        let requested = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("token refresh cancelled");
                return;
            }
            _ = refresh.notified() => true,
            _ = sleep_until(deadline) => false,
        };
        if requested {
            if backing_off {
                debug!(
                    retry_in_secs = deadline.saturating_duration_since(Instant::now()).as_secs(),
                    "token refresh requested during retry backoff; deferred"
                );
                continue;
            }
            debug!("token refresh requested");
        }

        round += 1;
        match source.acquire().await {
            Ok(credential) => {
                if credential.expires_in <= opts.margin {
                    warn!(
                        expires_in_secs = credential.expires_in.as_secs(),
                        margin_secs = opts.margin.as_secs(),
                        "token lifetime does not exceed refresh margin; refreshing at half-life"
                    );
                }
                let wait = opts.refresh_delay(credential.expires_in);
                deadline = deadline_after(wait);
                backing_off = false;
                info!(
                    round,
                    expires_in_secs = credential.expires_in.as_secs(),
                    next_refresh_secs = wait.as_secs(),
                    "access_token refreshed"
                );
                tx.send_replace(credential);
            }
            Err(e) => {
                deadline = deadline_after(opts.retry_interval);
                backing_off = true;
                let retry_in_secs = opts.retry_interval.as_secs();
                let code = e.provider_code();
                let hint = code.map(errors::hint_for).unwrap_or("");
                if code.is_some_and(errors::is_temporary) {
                    warn!(round, retry_in_secs, hint, "access_token refresh failed: {e}");
                } else {
                    error!(round, retry_in_secs, hint, "access_token refresh failed: {e}");
                }
            }
        }
    }
}

/// `now + wait`, clamped to a far-off instant when the sum overflows.
fn deadline_after(wait: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(wait)
        .unwrap_or_else(|| now + Duration::from_secs(86400 * 365 * 30))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Error;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::sleep;

    type Step = std::result::Result<u64, &'static str>;

    /// Replays scripted outcomes and records when each acquisition happened.
    #[derive(Clone, Default)]
    struct ScriptedSource {
        script: Arc<Mutex<VecDeque<Step>>>,
        calls: Arc<Mutex<Vec<Instant>>>,
    }

    impl ScriptedSource {
        fn new(steps: &[Step]) -> Self {
            Self {
                script: Arc::new(Mutex::new(steps.iter().cloned().collect())),
                calls: Arc::default(),
            }
        }

        fn offsets(&self, start: Instant) -> Vec<u64> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|at| at.duration_since(start).as_secs())
                .collect()
        }
    }

    #[async_trait]
    impl TokenSource for ScriptedSource {
        async fn acquire(&self) -> Result<Credential> {
            let n = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(Instant::now());
                calls.len()
            };
            let step = self.script.lock().unwrap().pop_front().unwrap_or(Ok(7200));
            match step {
                Ok(secs) => Ok(Credential::new(
                    format!("T{}", n + 1),
                    Duration::from_secs(secs),
                )),
                Err(msg) => Err(Error::Provider {
                    code: -1,
                    message: msg.to_string(),
                }),
            }
        }
    }

    fn opts(margin: u64, retry: u64) -> RefreshOptions {
        RefreshOptions {
            margin: Duration::from_secs(margin),
            retry_interval: Duration::from_secs(retry),
        }
    }

    #[test]
    fn refresh_delay_rules() {
        let o = opts(100, 60);
        assert_eq!(o.refresh_delay(Duration::from_secs(7200)), Duration::from_secs(7100));
        assert_eq!(o.refresh_delay(Duration::from_secs(100)), Duration::from_secs(50));
        assert_eq!(o.refresh_delay(Duration::from_secs(40)), Duration::from_secs(20));
        assert_eq!(o.refresh_delay(Duration::ZERO), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn refreshes_margin_before_expiry() {
        let source = ScriptedSource::new(&[Ok(3600), Ok(7200)]);
        let start = Instant::now();
        let mut tokens = TokenManager::spawn(
            source.clone(),
            Credential::new("T1", Duration::from_secs(7200)),
            opts(100, 60),
        );

        sleep(Duration::from_secs(7100 + 3500 + 1)).await;
        assert_eq!(source.offsets(start), vec![7100, 10600]);

        let current = tokens.credential();
        assert_eq!(current.token, "T3");
        assert_eq!(current.expires_in, Duration::from_secs(7200));
        // T2 (3600s, acquired at 7100) was replaced before it ran out
        assert!(current.acquired_at < start + Duration::from_secs(7100 + 3600));

        tokens.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_retries_after_interval() {
        let source = ScriptedSource::new(&[Ok(7200), Err("system busy"), Ok(7200)]);
        let start = Instant::now();
        let mut tokens = TokenManager::spawn(
            source.clone(),
            Credential::new("T1", Duration::from_secs(7200)),
            opts(100, 60),
        );

        sleep(Duration::from_secs(14261)).await;
        let offsets = source.offsets(start);
        assert_eq!(offsets, vec![7100, 14200, 14260]);
        assert_eq!(tokens.access_token(), "T4");

        tokens.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failure_keeps_previous_credential() {
        let source = ScriptedSource::new(&[Err("system busy")]);
        let mut tokens = TokenManager::spawn(
            source.clone(),
            Credential::new("T1", Duration::from_secs(7200)),
            opts(100, 60),
        );

        sleep(Duration::from_secs(7101)).await;
        assert_eq!(source.calls.lock().unwrap().len(), 1);
        assert_eq!(tokens.access_token(), "T1");

        tokens.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_without_acquiring() {
        let source = ScriptedSource::new(&[]);
        let mut tokens = TokenManager::spawn(
            source.clone(),
            Credential::new("T1", Duration::from_secs(7200)),
            opts(100, 60),
        );

        sleep(Duration::from_secs(50)).await;
        tokens.shutdown().await;
        assert!(tokens.is_closed());

        sleep(Duration::from_secs(20_000)).await;
        assert!(source.calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn drop_cancels_task() {
        let source = ScriptedSource::new(&[]);
        let tokens = TokenManager::spawn(
            source.clone(),
            Credential::new("T1", Duration::from_secs(7200)),
            opts(100, 60),
        );
        drop(tokens);

        sleep(Duration::from_secs(20_000)).await;
        assert!(source.calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_now_wakes_loop() {
        let source = ScriptedSource::new(&[Ok(7200)]);
        let start = Instant::now();
        let mut tokens = TokenManager::spawn(
            source.clone(),
            Credential::new("T1", Duration::from_secs(7200)),
            opts(100, 60),
        );
        let mut updates = tokens.subscribe();

        tokens.refresh_now();
        updates.changed().await.expect("credential published");

        assert_eq!(source.offsets(start), vec![0]);
        assert_eq!(updates.borrow().token, "T2");

        tokens.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_request_waits_out_retry_backoff() {
        let source = ScriptedSource::new(&[Err("system busy"), Ok(7200), Ok(7200)]);
        let start = Instant::now();
        let mut tokens = TokenManager::spawn(
            source.clone(),
            Credential::new("T1", Duration::from_secs(7200)),
            opts(100, 60),
        );
        let mut updates = tokens.subscribe();

        sleep(Duration::from_secs(7101)).await;
        assert_eq!(source.offsets(start), vec![7100]);

        for _ in 0..10 {
            tokens.refresh_now();
            sleep(Duration::from_millis(50)).await;
        }
        sleep(Duration::from_secs(10)).await;
        assert_eq!(source.offsets(start), vec![7100]);

        // retry fires exactly one interval after the failure
        sleep(Duration::from_secs(50)).await;
        assert_eq!(source.offsets(start), vec![7100, 7160]);
        assert_eq!(tokens.access_token(), "T3");

        // with a healthy token, a request refreshes right away again
        let _ = updates.borrow_and_update();
        tokens.refresh_now();
        updates.changed().await.expect("credential published");
        assert_eq!(source.offsets(start), vec![7100, 7160, 7161]);

        tokens.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn short_lifetime_does_not_spin() {
        let source = ScriptedSource::new(&[Ok(60), Ok(60)]);
        let start = Instant::now();
        let mut tokens = TokenManager::spawn(
            source.clone(),
            Credential::new("T1", Duration::from_secs(60)),
            opts(100, 10),
        );

        sleep(Duration::from_secs(61)).await;
        assert_eq!(source.offsets(start), vec![30, 60]);

        tokens.shutdown().await;
    }
}
