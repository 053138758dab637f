//! End-to-end tests: typed client and listener connection over the
//! in-process broker.
//!
//! Deliveries happen on broker tasks, so handlers report through channels
//! and every receive is bounded by a timeout.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use typed_broker_client::advanced::{InMemoryMessage, MessageKind};
use typed_broker_client::prelude::*;
use typed_broker_client::{ConnectionOverride, Destination, DispatchOutcome, Dispatcher};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct OrderCreated {
	id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PaymentCaptured {
	reference: String,
	amount_cents: u64,
}

struct Probe<T> {
	topic: &'static str,
	sub_queue: Option<&'static str>,
	shared: bool,
	connection: Option<ConnectionOverride>,
	tx: mpsc::UnboundedSender<Message<T>>,
}

impl<T> Probe<T> {
	fn new(topic: &'static str) -> (Self, mpsc::UnboundedReceiver<Message<T>>) {
		let (tx, rx) = mpsc::unbounded_channel();
		let probe = Self {
			topic,
			sub_queue: None,
			shared: false,
			connection: None,
			tx,
		};
		(probe, rx)
	}

	fn shared(mut self, group: &'static str) -> Self {
		self.sub_queue = Some(group);
		self.shared = true;
		self
	}
}

#[async_trait]
impl<T> Subscriber for Probe<T>
where T: Send + Sync + 'static
{
	type Payload = T;

	fn topic(&self) -> &str {
		self.topic
	}

	fn sub_queue(&self) -> Option<&str> {
		self.sub_queue
	}

	fn is_shared(&self) -> bool {
		self.shared
	}

	fn connection(&self) -> Option<ConnectionOverride> {
		self.connection.clone()
	}

	async fn handle(&self, message: Message<T>) -> std::result::Result<(), BoxError> {
		self.tx
			.send(message)
			.map_err(|_| BoxError::from("probe receiver dropped"))
	}
}

async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
	tokio::time::timeout(Duration::from_secs(2), rx.recv())
		.await
		.expect("timed out waiting for delivery")
		.expect("channel closed")
}

async fn assert_silent<T>(rx: &mut mpsc::UnboundedReceiver<T>) {
	let quiet = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
	assert!(quiet.is_err(), "unexpected delivery");
}

async fn connect(
	broker: &InMemoryBroker,
	registry: SubscriberRegistry,
) -> (TypedClient<InMemoryBroker>, ListenerConnection<InMemoryBroker>) {
	TypedClient::connect_with_config(
		BrokerConfig::new("vm://local").with_instance_id("e2e"),
		broker.clone(),
		registry,
	)
	.await
	.expect("client should connect")
}

#[tokio::test]
async fn published_order_reaches_its_subscriber() {
	let broker = InMemoryBroker::new();
	let (orders, mut rx) = Probe::<OrderCreated>::new("orders");
	let registry = SubscriberRegistry::builder(JsonCodec::new())
		.register(orders)
		.unwrap()
		.build();
	let (client, connection) = connect(&broker, registry).await;

	client
		.publish("orders", &OrderCreated { id: "42".into() }, None)
		.await
		.unwrap();

	let message = next(&mut rx).await;
	assert_eq!(*message.model, OrderCreated { id: "42".into() });
	assert!(message.headers.is_empty());
	assert_silent(&mut rx).await;

	connection.shutdown().await.unwrap();
}

#[tokio::test]
async fn headers_travel_with_the_message() {
	let broker = InMemoryBroker::new();
	let (orders, mut rx) = Probe::<OrderCreated>::new("orders");
	let registry = SubscriberRegistry::builder(JsonCodec::new())
		.register(orders)
		.unwrap()
		.build();
	let (client, connection) = connect(&broker, registry).await;

	let publisher = client.get_publisher::<OrderCreated>("orders").unwrap();
	let headers = Headers::from([
		("trace-id".to_string(), HeaderValue::from("abc")),
		("retry".to_string(), HeaderValue::from(false)),
	]);
	publisher
		.publish_with_headers(&OrderCreated { id: "7".into() }, &headers)
		.await
		.unwrap();

	let message = next(&mut rx).await;
	assert_eq!(message.header("trace-id"), Some(&HeaderValue::from("abc")));
	assert_eq!(message.header("retry").and_then(HeaderValue::as_bool), Some(false));

	connection.shutdown().await.unwrap();
}

#[tokio::test]
async fn shared_topic_decodes_as_last_registered_type() {
	let broker = InMemoryBroker::new();
	let (orders, mut orders_rx) = Probe::<OrderCreated>::new("events");
	let (payments, mut payments_rx) = Probe::<PaymentCaptured>::new("events");
	let registry = SubscriberRegistry::builder(JsonCodec::new())
		.register(orders)
		.unwrap()
		.register(payments)
		.unwrap()
		.build();
	let (client, connection) = connect(&broker, registry).await;

	let payment = PaymentCaptured {
		reference: "PAY-1".into(),
		amount_cents: 1999,
	};
	client.publish("events", &payment, None).await.unwrap();

	let message = next(&mut payments_rx).await;
	assert_eq!(*message.model, payment);
	// The first subscriber declares another type and is skipped.
	assert_silent(&mut orders_rx).await;
	assert_silent(&mut payments_rx).await;

	connection.shutdown().await.unwrap();
}

#[tokio::test]
async fn single_delivery_fans_out_once_decoded() {
	let (first, mut first_rx) = Probe::<OrderCreated>::new("orders");
	let (second, mut second_rx) = Probe::<OrderCreated>::new("orders");
	let (payments, mut payments_rx) = Probe::<PaymentCaptured>::new("events");
	let registry = SubscriberRegistry::builder(JsonCodec::new())
		.register(payments)
		.unwrap()
		.register(first)
		.unwrap()
		.register(second)
		.unwrap()
		.build();
	let dispatcher = Dispatcher::new(
		std::sync::Arc::new(registry),
		ExchangeKind::Topic,
		&Default::default(),
	);

	let message = InMemoryMessage::text(Destination::topic("orders"), r#"{"id":"3"}"#);
	let outcome = dispatcher.dispatch(&message).await.unwrap();

	assert_eq!(outcome, DispatchOutcome::Delivered {
		topic: "orders".into(),
		delivered: 2,
		skipped: 0,
		failed: 0,
	});
	assert_eq!(next(&mut first_rx).await.model.id, "3");
	assert_eq!(next(&mut second_rx).await.model.id, "3");
	assert_silent(&mut payments_rx).await;
}

#[tokio::test]
async fn shared_subscription_splits_deliveries() {
	let broker = InMemoryBroker::new();
	let (first, mut rx) = Probe::<OrderCreated>::new("orders");
	let second = Probe {
		tx: first.tx.clone(),
		..Probe::new("orders").0
	};
	let registry = SubscriberRegistry::builder(JsonCodec::new())
		.register(first.shared("order-workers"))
		.unwrap()
		.register(second.shared("order-workers"))
		.unwrap()
		.build();
	let (client, connection) = connect(&broker, registry).await;

	for id in ["a", "b"] {
		client
			.publish("orders", &OrderCreated { id: id.into() }, None)
			.await
			.unwrap();
	}

	let mut ids = vec![
		next(&mut rx).await.model.id.clone(),
		next(&mut rx).await.model.id.clone(),
	];
	ids.sort();
	assert_eq!(ids, vec!["a", "b"]);
	assert_silent(&mut rx).await;

	connection.shutdown().await.unwrap();
}

#[tokio::test]
async fn malformed_deliveries_are_dropped() {
	let broker = InMemoryBroker::new();
	let (orders, mut rx) = Probe::<OrderCreated>::new("orders");
	let registry = SubscriberRegistry::builder(JsonCodec::new())
		.register(orders)
		.unwrap()
		.build();
	let (client, connection) = connect(&broker, registry).await;

	let bytes = InMemoryMessage::of_kind(Destination::topic("orders"), MessageKind::Bytes);
	assert_eq!(broker.inject(bytes), 1);
	broker.inject(InMemoryMessage::text(Destination::topic("orders"), "not json"));
	client
		.publish("refunds", &OrderCreated { id: "r".into() }, None)
		.await
		.unwrap();
	assert_silent(&mut rx).await;

	// The session survives bad deliveries.
	client
		.publish("orders", &OrderCreated { id: "ok".into() }, None)
		.await
		.unwrap();
	assert_eq!(next(&mut rx).await.model.id, "ok");

	connection.shutdown().await.unwrap();
}

#[tokio::test]
async fn failed_session_is_isolated_and_restartable() {
	let broker = InMemoryBroker::new();
	broker.reject_url("vm://flaky");
	let (mut flaky, mut flaky_rx) = Probe::<OrderCreated>::new("audit");
	flaky.connection = Some(ConnectionOverride::url("vm://flaky"));
	let (orders, mut orders_rx) = Probe::<OrderCreated>::new("orders");
	let registry = SubscriberRegistry::builder(JsonCodec::new())
		.register(flaky)
		.unwrap()
		.register(orders)
		.unwrap()
		.build();
	let (client, mut connection) = connect(&broker, registry).await;

	let report = connection.start_report();
	assert!(!report.is_complete());
	assert_eq!(report.started, vec!["listener_orders_1"]);
	assert_eq!(report.failed.len(), 1);

	client
		.publish("orders", &OrderCreated { id: "1".into() }, None)
		.await
		.unwrap();
	assert_eq!(next(&mut orders_rx).await.model.id, "1");

	// Still rejected: the retry reports the same failure, nothing duplicates.
	let retry = connection.restart_missing().await.unwrap();
	assert_eq!(retry.already_active, vec!["listener_orders_1"]);
	assert_eq!(retry.failed.len(), 1);
	assert_eq!(connection.active_sessions(), vec!["listener_orders_1"]);
	assert_silent(&mut flaky_rx).await;

	connection.shutdown().await.unwrap();
	assert_eq!(broker.open_connections(), 0);
}

#[tokio::test]
async fn empty_registry_fails_startup() {
	let result = TypedClient::<_, JsonCodec>::connect_with_config(
		BrokerConfig::new("vm://local"),
		InMemoryBroker::new(),
		SubscriberRegistry::default(),
	)
	.await;
	assert!(result.is_err());
}

#[tokio::test]
async fn shutdown_stops_every_session() {
	let broker = InMemoryBroker::new();
	let (orders, mut rx) = Probe::<OrderCreated>::new("orders");
	let (payments, _payments_rx) = Probe::<PaymentCaptured>::new("payments");
	let registry = SubscriberRegistry::builder(JsonCodec::new())
		.register(orders)
		.unwrap()
		.register(payments)
		.unwrap()
		.build();
	let (client, mut connection) = connect(&broker, registry).await;
	assert_eq!(broker.open_connections(), 2);

	assert!(connection.stop_session("listener_orders_0").await.unwrap());
	client
		.publish("orders", &OrderCreated { id: "late".into() }, None)
		.await
		.unwrap();
	assert_silent(&mut rx).await;

	connection.shutdown().await.unwrap();
	assert_eq!(broker.open_connections(), 0);
	assert!(broker.consumer_sessions().is_empty());

	// Publishing does not depend on the listener side.
	client
		.publish("orders", &OrderCreated { id: "after".into() }, None)
		.await
		.unwrap();
	assert_eq!(broker.sent_count(), 2);
}
