use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::message::Message;
use super::traits::{BrokerError, MessageSource};

/// Processes one fetched message.
///
/// Returning `Ok` commits the message. Returning an error leaves it
/// uncommitted so the broker delivers it again.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn handle(&self, message: &Message) -> Result<(), Self::Error>;
}

/// Where a message ended up after processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Committed,
    NotCommitted,
}

/// Sequential fetch-process-commit loop over one topic.
///
/// There is no per-message timeout: a handler that blocks stalls the loop.
pub struct ConsumerLoop<S, H> {
    name: String,
    source: S,
    handler: H,
}

impl<S, H> ConsumerLoop<S, H>
where
    S: MessageSource,
    H: MessageHandler,
{
    pub fn new(name: impl Into<String>, source: S, handler: H) -> Self {
        ConsumerLoop {
            name: name.into(),
            source,
            handler,
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Run until cancelled. Fetch and commit failures are fatal.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), BrokerError> {
        info!(consumer = %self.name, "Consumer running");

        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => {
                    info!(consumer = %self.name, "Consumer stopping");
                    return Ok(());
                }
                fetched = self.source.fetch() => fetched?,
            };

            self.process(&message).await?;
        }
    }

    /// Fetch and process a single message.
    pub async fn step(&self) -> Result<Delivery, BrokerError> {
        let message = self.source.fetch().await?;
        self.process(&message).await
    }

    async fn process(&self, message: &Message) -> Result<Delivery, BrokerError> {
        match self.handler.handle(message).await {
            Ok(()) => {
                self.source.commit(message).await?;
                debug!(
                    consumer = %self.name,
                    topic = %message.topic,
                    offset = message.offset,
                    "Message committed"
                );
                Ok(Delivery::Committed)
            }
            Err(e) => {
                warn!(
                    consumer = %self.name,
                    topic = %message.topic,
                    offset = message.offset,
                    error = %e,
                    "Handler failed, message left uncommitted"
                );
                Ok(Delivery::NotCommitted)
            }
        }
    }
}
