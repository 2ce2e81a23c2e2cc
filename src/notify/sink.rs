use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("notification transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// External notification target.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver `payload` and return the response status code.
    async fn send(&self, payload: Bytes) -> Result<u16, SinkError>;
}

/// Posts payloads as JSON to a webhook.
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(WebhookSink {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn send(&self, payload: Bytes) -> Result<u16, SinkError> {
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await?;

        Ok(response.status().as_u16())
    }
}
