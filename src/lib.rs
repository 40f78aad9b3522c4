#![doc = r#"
wecom-notify

Text notifications through WeCom (Enterprise WeChat) app messages.

The crate keeps one access_token per notifier fresh in the background and
exposes a single `Notifier::notify(recipients, message)` call.

Modules:
- token: HTTP client, credential type, unified error type.
- send_msg: text message envelope and the message/send call.
- token_cache: background token refresh (`TokenManager`).
- notifier: `Notifier` trait and `WeComNotifier`.
- config: credentials, refresh timing, env loading.
- errors: errcode classification and hints.
- mock: recording `Notifier` for tests.

Quick usage:

```ignore
use wecom_notify::{Notifier, NotifierConfig, ProviderConfig, WeComNotifier};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = NotifierConfig::new(ProviderConfig::new(
        "your_corp_id",
        1000002,
        "your_app_secret",
    ));
    let notifier = WeComNotifier::connect(config).await?;

    notifier
        .notify(&["zhangsan".to_string()], "deploy finished")
        .await?;

    notifier.close().await;
    Ok(())
}
```
"#]

pub mod config;
pub mod errors;
pub mod mock;
pub mod notifier;
pub mod send_msg;
pub mod token;
pub mod token_cache;

pub use config::{ConfigError, NotifierConfig, ProviderConfig};
pub use notifier::{Notifier, NotifierBuilder, WeComNotifier};
pub use token::*;
pub use token_cache::{RefreshOptions, TokenManager, TokenSource, WeComTokenSource};
