/*!
Example: send a text notification through a WeCom app

Run:
  WECOM_CORP_ID=ww... \
  WECOM_AGENT_ID=1000002 \
  WECOM_APP_SECRET=your_app_secret \
  WECOM_TOUSER="zhangsan|lisi" \
  [optional] WECOM_TEXT="hello from wecom-notify" \
  [optional] RUST_LOG=wecom_notify=debug \
  cargo run --example send_text

Notes:
- Recipients are WeCom userids separated by '|'.
- The app Secret must belong to the app whose AgentId is given.
*/

use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use tracing_subscriber::EnvFilter;
use wecom_notify::{Notifier, NotifierConfig, WeComNotifier};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let config = NotifierConfig::from_env().context("set WECOM_CORP_ID, WECOM_AGENT_ID and WECOM_APP_SECRET")?;
    let recipients: Vec<String> = env::var("WECOM_TOUSER")
        .context("set WECOM_TOUSER to one or more userids separated by '|'")?
        .split('|')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    let text = env::var("WECOM_TEXT").unwrap_or_else(|_| "hello from wecom-notify".to_string());

    // 1) Fetch the first token and start background refresh
    let notifier = WeComNotifier::connect(config)
        .await
        .context("failed to connect to WeCom")?;

    // 2) Send
    let result = notifier.notify(&recipients, &text).await;

    // 3) Stop the refresh task before exiting
    notifier.close().await;

    result.context("message/send failed")?;
    println!("sent to {} recipient(s)", recipients.len());
    Ok(())
}
