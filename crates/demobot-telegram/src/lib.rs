//! Telegram adapter.
//!
//! [`HttpTransport`] implements the core `ApiTransport` port over the Bot API's
//! JSON-over-HTTPS interface; [`router`] wires the moderation handlers onto a
//! dispatcher and runs the bot.

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::sleep;

pub mod handlers;
pub mod router;

use demobot_core::{
    api::{parse_envelope, ApiTransport},
    errors::Error,
    Result,
};

/// Slack on top of the long-poll timeout before the HTTP client gives up.
const HTTP_GRACE: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(api_url: &str, token: &str, long_poll_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(long_poll_timeout + HTTP_GRACE)
            .build()
            .map_err(|e| Error::Transport(format!("http client build: {e}")))?;
        Ok(Self {
            http,
            base_url: format!("{}/bot{token}", api_url.trim_end_matches('/')),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{method}", self.base_url)
    }

    async fn post(&self, method: &str, params: &Value) -> Result<Value> {
        let resp = self
            .http
            .post(self.method_url(method))
            .json(params)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("{method}: {}", e.without_url())))?;

        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| Error::Transport(format!("{method}: reading body: {}", e.without_url())))?;
        parse_envelope(status, &body)
    }
}

#[async_trait]
impl ApiTransport for HttpTransport {
    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        with_retry(|| self.post(method, &params)).await
    }
}

/// Retry once when Telegram asks us to slow down (`429` with `retry_after`).
async fn with_retry<Fut>(mut op: impl FnMut() -> Fut) -> Result<Value>
where
    Fut: Future<Output = Result<Value>>,
{
    const MAX_RETRIES: usize = 1;
    let mut attempts = 0usize;
    loop {
        match op().await {
            Err(Error::Api {
                retry_after: Some(secs),
                ..
            }) if attempts < MAX_RETRIES => {
                attempts += 1;
                tracing::warn!(retry_after = secs, "flood control, retrying");
                sleep(Duration::from_secs(secs)).await;
            }
            other => return other,
        }
    }
}
