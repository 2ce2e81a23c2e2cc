use anyhow::Context;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::api::{create_router, AppState};
use crate::broker::{
    BrokerError, ConsumerLoop, MemoryBroker, MemorySubscription, MessageHandler, MessageSource,
};
use crate::config::Config;
use crate::notify::{
    DeadLetterRouter, DedupGate, InMemoryDedupGate, NotificationDispatcher, NotificationSink,
    WebhookSink,
};
use crate::observability::MetricsRegistry;
use crate::pipeline::{
    DecisionApplier, DecisionFinalizer, EventPublisher, OutboxWriter, PublishAcknowledger,
};
use crate::storage::{MemoryStore, OutboxStore, PaymentStore, PostgresStore};

/// Payment and outbox persistence chosen at startup.
pub struct Stores {
    pub payments: Arc<dyn PaymentStore>,
    pub outbox: Arc<dyn OutboxStore>,
}

impl Stores {
    pub fn memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Stores {
            payments: store.clone(),
            outbox: store,
        }
    }

    /// Connect to PostgreSQL when a URL is configured, otherwise keep
    /// everything in memory. Connection and migration failures are fatal.
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let Some(url) = config.database_url.as_deref() else {
            info!("No database configured, using in-memory store");
            return Ok(Stores::memory());
        };

        let store = PostgresStore::connect(url, config.db_min_connections, config.db_max_connections)
            .await
            .context("failed to connect to database")?;
        store
            .run_migrations()
            .await
            .context("failed to run database migrations")?;
        info!("Connected to PostgreSQL");

        let store = Arc::new(store);
        Ok(Stores {
            payments: store.clone(),
            outbox: store,
        })
    }
}

/// Both consumers plus the HTTP router, wired onto one broker.
pub struct Services {
    pub finalizer: ConsumerLoop<MemorySubscription, DecisionFinalizer>,
    pub notifier: ConsumerLoop<MemorySubscription, NotificationDispatcher>,
    pub router: Router,
    pub metrics: Arc<MetricsRegistry>,
}

impl Services {
    pub fn build(
        config: &Config,
        broker: Arc<MemoryBroker>,
        stores: Stores,
        gate: Arc<dyn DedupGate>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let metrics = Arc::new(MetricsRegistry::new());

        let publisher = EventPublisher::new(broker.clone(), metrics.clone())
            .with_max_attempts(config.producer_retries)
            .with_ack_timeout(config.producer_timeout())
            .with_retry_backoff(config.producer_retry_backoff());

        let finalizer = DecisionFinalizer::new(
            DecisionApplier::new(stores.payments.clone(), metrics.clone()),
            OutboxWriter::new(stores.outbox.clone(), metrics.clone()),
            publisher,
            PublishAcknowledger::new(stores.outbox, metrics.clone()),
            config.outbox_topic.clone(),
            metrics.clone(),
        );

        let dispatcher = NotificationDispatcher::new(
            gate,
            sink,
            DeadLetterRouter::new(broker.clone(), config.dlq_topic.clone(), metrics.clone()),
            metrics.clone(),
        );

        let state = Arc::new(AppState {
            producer: broker.clone(),
            decisions_topic: config.decisions_topic.clone(),
            payments: stores.payments,
            metrics: metrics.clone(),
            start_time: Instant::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        });

        Services {
            finalizer: ConsumerLoop::new(
                "decision-orchestrator",
                broker.subscribe(&config.decisions_topic, &config.orchestrator_group),
                finalizer,
            ),
            notifier: ConsumerLoop::new(
                "notifier",
                broker.subscribe(&config.outbox_topic, &config.notifier_group),
                dispatcher,
            ),
            router: create_router(state),
            metrics,
        }
    }
}

/// First broker failure reported by any consumer loop.
#[derive(Debug, Clone, Default)]
pub struct ConsumerFailure(Arc<Mutex<Option<BrokerError>>>);

impl ConsumerFailure {
    fn record(&self, err: &BrokerError) {
        self.0.lock().get_or_insert_with(|| err.clone());
    }

    pub fn get(&self) -> Option<BrokerError> {
        self.0.lock().clone()
    }
}

/// Spawn a consumer loop. A broker failure is recorded in `failure` before
/// the token is cancelled, so whoever observes the cancellation can tell
/// it apart from a requested shutdown.
fn spawn_consumer<S, H>(
    consumer: ConsumerLoop<S, H>,
    cancel: CancellationToken,
    failure: ConsumerFailure,
) -> JoinHandle<Result<(), BrokerError>>
where
    S: MessageSource + 'static,
    H: MessageHandler + 'static,
{
    tokio::spawn(async move {
        let result = consumer.run(cancel.clone()).await;
        if let Err(e) = &result {
            error!(error = %e, "Consumer failed, shutting down");
            failure.record(e);
            cancel.cancel();
        }
        result
    })
}

/// Serve HTTP until `cancel` fires. Fails when the cancellation came from
/// a consumer failure.
async fn serve(
    listener: TcpListener,
    router: Router,
    cancel: CancellationToken,
    failure: ConsumerFailure,
) -> anyhow::Result<()> {
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    info!("HTTP server stopped");

    match failure.get() {
        Some(e) => Err(anyhow::Error::new(e).context("consumer loop failed")),
        None => Ok(()),
    }
}

/// Run both consumers and the HTTP server until `cancel` fires.
///
/// Returns once the server has stopped accepting connections. Consumer
/// tasks observe the same token and are not awaited. A consumer that
/// stopped on a broker error makes this return `Err`.
pub async fn run(config: Config, cancel: CancellationToken) -> anyhow::Result<()> {
    let stores = Stores::open(&config).await?;
    let sink = WebhookSink::new(config.notify_webhook.clone(), config.notify_timeout())
        .context("failed to build webhook client")?;
    info!(url = %sink.url(), "Notification sink configured");

    let broker = Arc::new(MemoryBroker::new());
    let services = Services::build(
        &config,
        broker,
        stores,
        Arc::new(InMemoryDedupGate::new()),
        Arc::new(sink),
    );

    let failure = ConsumerFailure::default();
    spawn_consumer(services.finalizer, cancel.clone(), failure.clone());
    spawn_consumer(services.notifier, cancel.clone(), failure.clone());

    let addr: SocketAddr = config.listen_addr.parse()?;
    info!(addr = %addr, "Starting HTTP server");

    let listener = TcpListener::bind(addr).await?;
    serve(listener, services.router, cancel, failure).await
}
