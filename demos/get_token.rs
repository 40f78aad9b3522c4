use dotenvy::dotenv;
use wecom_notify::{NotifierConfig, WeComClient};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Run:
    //   cargo run --example get_token
    //
    // Env: WECOM_CORP_ID, WECOM_AGENT_ID, WECOM_APP_SECRET
    let _ = dotenv();
    tracing_subscriber::fmt::init();

    let config = NotifierConfig::from_env()?;
    let client = WeComClient::new(config.http_timeout)?.with_base_url(config.api_base.clone());

    match client.get_access_token(&config.provider).await {
        Ok(credential) => {
            println!(
                "[OK] access_token acquired (len {}), expires_in: {}s, next refresh in {}s",
                credential.token.len(),
                credential.expires_in.as_secs(),
                config.refresh.refresh_delay(credential.expires_in).as_secs()
            );
        }
        Err(e) => {
            eprintln!("[ERR] access_token request failed: {e}");
            if let Some(code) = e.provider_code() {
                eprintln!("{}", wecom_notify::errors::explain(code, &e.to_string()));
            }
        }
    }

    Ok(())
}
