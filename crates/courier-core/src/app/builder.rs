//! EndpointBuilder: wiring an endpoint together, with start-up validation.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::dispatcher::Dispatcher;
use crate::app::heartbeat_loop::HeartbeatLoop;
use crate::app::metrics_loop::MetricsLoop;
use crate::app::outgoing::Outgoing;
use crate::app::routing::Router;
use crate::app::session::MessageSession;
use crate::app::status::EndpointMetrics;
use crate::app::worker_loop::WorkerGroup;
use crate::config::EndpointConfig;
use crate::domain::EndpointAddress;
use crate::error::Result;
use crate::impls::{InMemoryStore, QueueMetricsSink, StoreTransport};
use crate::ports::{Clock, DurableStore, MetricsSink, SystemClock, Transport};
use crate::subscriptions::SubscriptionCache;
use crate::typed::{Handler, HandlerRegistry, TypedMessage};

/// Builds an [`Endpoint`].
///
/// ```ignore
/// let endpoint = EndpointBuilder::new(config)
///     .store(store)
///     .register::<OrderPlaced, _>(ShipOrder)?
///     .expect_messages(&["acme.sales.order_placed.v1"])
///     .build()?;
/// let running = endpoint.start().await?;
/// ```
///
/// `build()` fails if any type passed to `expect_messages` has not been registered.
pub struct EndpointBuilder {
    config: EndpointConfig,
    store: Option<Arc<dyn DurableStore>>,
    clock: Arc<dyn Clock>,
    registry: HandlerRegistry,
    expected_messages: Option<Vec<String>>,
    metrics_sink: Option<Arc<dyn MetricsSink>>,
}

impl EndpointBuilder {
    pub fn new(config: EndpointConfig) -> Self {
        Self {
            config,
            store: None,
            clock: Arc::new(SystemClock),
            registry: HandlerRegistry::new(),
            expected_messages: None,
            metrics_sink: None,
        }
    }

    /// Defaults to an `InMemoryStore` on the builder's clock.
    pub fn store(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn register<M: TypedMessage, H: Handler<M> + 'static>(mut self, handler: H) -> Result<Self> {
        self.registry.register::<M, H>(handler)?;
        Ok(self)
    }

    /// Make `M` known (decodable) without handling it here.
    pub fn register_message<M: TypedMessage>(mut self) -> Self {
        self.registry.register_message::<M>();
        self
    }

    pub fn expect_messages(mut self, message_types: &[&str]) -> Self {
        self.expected_messages = Some(message_types.iter().map(|t| t.to_string()).collect());
        self
    }

    /// Defaults to a `QueueMetricsSink` on the configured metrics destination.
    pub fn metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics_sink = Some(sink);
        self
    }

    pub fn build(self) -> Result<Endpoint> {
        if let Some(expected) = &self.expected_messages {
            self.registry
                .ensure_known(expected.iter().map(String::as_str))?;
        }

        let clock = self.clock;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryStore::new(Arc::clone(&clock))));
        let transport: Arc<dyn Transport> = Arc::new(StoreTransport::new(Arc::clone(&store)));
        let subscriptions = Arc::new(SubscriptionCache::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            self.config.subscription_cache_ttl(),
        ));
        let outgoing = Arc::new(Outgoing::new(
            self.config.name().clone(),
            Arc::clone(&transport),
            Router::new(self.config.routes().clone()),
            subscriptions,
            Arc::clone(&clock),
        ));
        let registry = Arc::new(self.registry);
        let metrics = Arc::new(EndpointMetrics::new());
        let dispatcher = Arc::new(Dispatcher::new(
            &self.config,
            Arc::clone(&store),
            Arc::clone(&transport),
            Arc::clone(&registry),
            Arc::clone(&outgoing),
            Arc::clone(&clock),
            Arc::clone(&metrics),
        ));
        let metrics_sink = self.metrics_sink.unwrap_or_else(|| {
            Arc::new(QueueMetricsSink::new(
                Arc::clone(&store),
                Arc::clone(&transport),
                Arc::clone(&clock),
                self.config.metrics().destination.clone(),
            ))
        });

        Ok(Endpoint {
            session: MessageSession::new(Arc::clone(&store), outgoing),
            config: self.config,
            store,
            transport,
            clock,
            registry,
            metrics,
            metrics_sink,
            dispatcher,
        })
    }
}

/// A configured endpoint that has not started its workers yet.
pub struct Endpoint {
    config: EndpointConfig,
    store: Arc<dyn DurableStore>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    registry: Arc<HandlerRegistry>,
    metrics: Arc<EndpointMetrics>,
    metrics_sink: Arc<dyn MetricsSink>,
    dispatcher: Arc<Dispatcher>,
    session: MessageSession,
}

impl Endpoint {
    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn DurableStore> {
        &self.store
    }

    pub fn session(&self) -> MessageSession {
        self.session.clone()
    }

    pub fn metrics(&self) -> &Arc<EndpointMetrics> {
        &self.metrics
    }

    /// For driving the endpoint by hand, one message at a time.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub async fn start(self) -> Result<RunningEndpoint> {
        if self.config.auto_subscribe() {
            for event_type in self.registry.handled_events() {
                self.session.subscribe_type(&event_type).await?;
            }
        }

        let workers = WorkerGroup::spawn(self.config.workers(), Arc::clone(&self.dispatcher));

        let (background_tx, background_rx) = watch::channel(false);
        let mut background = Vec::new();
        let heartbeat = self.config.heartbeat();
        if heartbeat.enabled {
            let beat = HeartbeatLoop::new(
                Arc::clone(&self.store),
                Arc::clone(&self.transport),
                Arc::clone(&self.clock),
                self.config.name().clone(),
                self.config.heartbeat_destination().clone(),
                heartbeat.interval,
            );
            background.push(tokio::spawn(beat.run(background_rx.clone())));
        }
        let metrics = self.config.metrics();
        if metrics.enabled {
            let push = MetricsLoop::new(
                Arc::clone(&self.store),
                Arc::clone(&self.metrics),
                Arc::clone(&self.metrics_sink),
                Arc::clone(&self.clock),
                self.config.name().clone(),
                metrics.interval,
            );
            background.push(tokio::spawn(push.run(background_rx)));
        }

        info!(
            endpoint = %self.config.name(),
            workers = workers.len(),
            heartbeat = heartbeat.enabled,
            metrics = metrics.enabled,
            "endpoint started"
        );
        Ok(RunningEndpoint {
            name: self.config.name().clone(),
            session: self.session,
            metrics: self.metrics,
            workers,
            background_tx,
            background,
        })
    }
}

pub struct RunningEndpoint {
    name: EndpointAddress,
    session: MessageSession,
    metrics: Arc<EndpointMetrics>,
    workers: WorkerGroup,
    background_tx: watch::Sender<bool>,
    background: Vec<JoinHandle<()>>,
}

impl RunningEndpoint {
    pub fn session(&self) -> MessageSession {
        self.session.clone()
    }

    pub fn metrics(&self) -> &Arc<EndpointMetrics> {
        &self.metrics
    }

    /// Stop taking messages, let in-flight ones finish, then stop the
    /// heartbeat and metrics loops.
    pub async fn stop(self) {
        self.workers.shutdown_and_join().await;
        let _ = self.background_tx.send(true);
        for j in self.background {
            if let Err(err) = j.await {
                error!(error = %err, "background task panicked");
            }
        }
        info!(endpoint = %self.name, "endpoint stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::context::HandlerContext;
    use crate::config::{HeartbeatConfig, MetricsConfig};
    use crate::domain::{MessageType, Subscription};
    use crate::error::CourierError;
    use crate::impls::LogMetricsSink;
    use crate::typed::message::fixtures::{ChargeCard, OrderPlaced, PlaceOrder};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn config(workers: usize) -> EndpointConfig {
        EndpointConfig::builder("sales")
            .workers(workers)
            .receive_timeout(Duration::from_millis(20))
            .build()
            .unwrap()
    }

    struct Noop;

    #[async_trait]
    impl Handler<PlaceOrder> for Noop {
        async fn handle(&self, _m: PlaceOrder, _ctx: &HandlerContext) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct Recorder {
        seen: Arc<Mutex<HashSet<u64>>>,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Handler<PlaceOrder> for Recorder {
        async fn handle(&self, m: PlaceOrder, ctx: &HandlerContext) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .insert(m.order_id);
            ctx.publish(&OrderPlaced { order_id: m.order_id }).await?;
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct Shipper {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Handler<OrderPlaced> for Shipper {
        async fn handle(&self, _m: OrderPlaced, _ctx: &HandlerContext) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[test]
    fn build_succeeds_when_expected_types_are_registered() {
        let endpoint = EndpointBuilder::new(config(1))
            .register::<PlaceOrder, _>(Noop)
            .unwrap()
            .expect_messages(&[PlaceOrder::TYPE])
            .build();
        assert!(endpoint.is_ok());
    }

    #[test]
    fn build_lists_missing_message_types() {
        let endpoint = EndpointBuilder::new(config(1))
            .register::<PlaceOrder, _>(Noop)
            .unwrap()
            .register_message::<ChargeCard>()
            .expect_messages(&[PlaceOrder::TYPE, ChargeCard::TYPE, OrderPlaced::TYPE])
            .build();
        assert!(matches!(
            endpoint,
            Err(CourierError::MissingMessageTypes(missing)) if missing == vec![OrderPlaced::TYPE.to_string()]
        ));
    }

    #[test]
    fn duplicate_handler_fails_registration() {
        let result = EndpointBuilder::new(config(1))
            .register::<PlaceOrder, _>(Noop)
            .unwrap()
            .register::<PlaceOrder, _>(Noop);
        assert!(matches!(result, Err(CourierError::DuplicateHandler(_))));
    }

    #[tokio::test]
    async fn start_subscribes_handled_events_only() {
        let store = Arc::new(InMemoryStore::default());
        let running = EndpointBuilder::new(config(1))
            .store(store.clone())
            .register::<PlaceOrder, _>(Noop)
            .unwrap()
            .register::<OrderPlaced, _>(Shipper::default())
            .unwrap()
            .build()
            .unwrap()
            .start()
            .await
            .unwrap();

        assert_eq!(
            store.subscriptions().await,
            vec![Subscription::new(
                MessageType::new(OrderPlaced::TYPE),
                EndpointAddress::new("sales")
            )]
        );
        running.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn workers_process_each_message_exactly_once() {
        let store = Arc::new(InMemoryStore::default());
        let recorder = Recorder::default();
        let shipper = Shipper::default();
        let running = EndpointBuilder::new(config(4))
            .store(store.clone())
            .register::<PlaceOrder, _>(recorder.clone())
            .unwrap()
            .register::<OrderPlaced, _>(shipper.clone())
            .unwrap()
            .build()
            .unwrap()
            .start()
            .await
            .unwrap();

        let session = running.session();
        for order_id in 0..50 {
            session.send_local(&PlaceOrder { order_id }).await.unwrap();
        }

        eventually(|| shipper.calls.load(Ordering::SeqCst) == 50).await;
        running.stop().await;

        assert_eq!(recorder.calls.load(Ordering::SeqCst), 50);
        assert_eq!(recorder.seen.lock().unwrap().len(), 50);
        assert_eq!(shipper.calls.load(Ordering::SeqCst), 50);
        assert_eq!(
            store
                .queue_depth(&EndpointAddress::new("sales"))
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn heartbeats_and_metrics_run_when_enabled() {
        let store = Arc::new(InMemoryStore::default());
        let config = EndpointConfig::builder("sales")
            .heartbeat(HeartbeatConfig {
                enabled: true,
                destination: Some(EndpointAddress::new("monitor")),
                interval: Duration::from_millis(10),
            })
            .metrics(MetricsConfig {
                enabled: true,
                destination: EndpointAddress::new("metrics"),
                interval: Duration::from_millis(10),
            })
            .build()
            .unwrap();
        let running = EndpointBuilder::new(config)
            .store(store.clone())
            .build()
            .unwrap()
            .start()
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        running.stop().await;

        assert!(!store.messages(&EndpointAddress::new("monitor")).await.is_empty());
        assert!(!store.messages(&EndpointAddress::new("metrics")).await.is_empty());
    }

    #[tokio::test]
    async fn custom_metrics_sink_replaces_the_queue() {
        let store = Arc::new(InMemoryStore::default());
        let config = EndpointConfig::builder("sales")
            .metrics(MetricsConfig {
                enabled: true,
                destination: EndpointAddress::new("metrics"),
                interval: Duration::from_millis(10),
            })
            .build()
            .unwrap();
        let running = EndpointBuilder::new(config)
            .store(store.clone())
            .metrics_sink(Arc::new(LogMetricsSink))
            .build()
            .unwrap()
            .start()
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        running.stop().await;

        assert!(store.messages(&EndpointAddress::new("metrics")).await.is_empty());
    }
}
