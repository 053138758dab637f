//! # Configuration - Typed Broker Client
//!
//! Shows how sessions are configured:
//! - broker settings from `BROKER_*` environment variables (or `.env`)
//! - a connection override for every subscriber and one per subscriber
//! - durable, shared and queue subscriptions
//! - the start report when one subscriber cannot connect
//! - a publish-only client

mod shared;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use typed_broker_client::advanced::SessionConfig;
use typed_broker_client::prelude::*;
use typed_broker_client::{ConnectionOverride, DispatchSettings, UnmatchedTopicPolicy};

#[derive(Debug, Serialize, Deserialize)]
struct Invoice {
	number: u32,
}

/// Durable subscription that survives restarts under a fixed name.
struct InvoiceArchive;

#[async_trait]
impl Subscriber for InvoiceArchive {
	type Payload = Invoice;

	fn topic(&self) -> &str {
		"invoices"
	}

	fn sub_queue(&self) -> Option<&str> {
		Some("invoice-archive")
	}

	fn is_durable(&self) -> bool {
		true
	}

	async fn handle(&self, message: Message<Invoice>) -> std::result::Result<(), BoxError> {
		println!("[archive] invoice #{}", message.number);
		Ok(())
	}
}

/// Shared subscription: instances of this service split the load.
struct InvoiceWorker;

#[async_trait]
impl Subscriber for InvoiceWorker {
	type Payload = Invoice;

	fn topic(&self) -> &str {
		"invoices"
	}

	fn sub_queue(&self) -> Option<&str> {
		Some("invoice-workers")
	}

	fn is_shared(&self) -> bool {
		true
	}

	async fn handle(&self, message: Message<Invoice>) -> std::result::Result<(), BoxError> {
		println!("[worker] processing invoice #{}", message.number);
		Ok(())
	}
}

/// Queue consumer on a broker that does not exist.
struct LegacyQueue;

#[async_trait]
impl Subscriber for LegacyQueue {
	type Payload = Invoice;

	fn topic(&self) -> &str {
		"legacy.invoices"
	}

	fn exchange_kind(&self) -> ExchangeKind {
		ExchangeKind::Queue
	}

	fn connection(&self) -> Option<ConnectionOverride> {
		Some(ConnectionOverride::url("tcp://legacy-broker:61616"))
	}

	async fn handle(&self, _message: Message<Invoice>) -> std::result::Result<(), BoxError> {
		Ok(())
	}
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
	shared::tracing::setup(Some("info"));

	let config = shared::config::broker_config("configuration")
		.with_credentials("app", "app-secret")
		.with_subscriber_override(ConnectionOverride::credentials("reader", "reader-secret"))
		.with_settings(DispatchSettings {
			decode_concurrency: 4,
			unmatched_topic_policy: UnmatchedTopicPolicy::Warn,
		});

	let broker = InMemoryBroker::new();
	broker.reject_url("tcp://legacy-broker:61616");

	let registry = SubscriberRegistry::builder(JsonCodec::new())
		.register(InvoiceArchive)?
		.register(InvoiceWorker)?
		.register(LegacyQueue)?
		.build();
	for descriptor in registry.descriptors() {
		let session = SessionConfig::for_subscriber(&descriptor, &config);
		println!(
			"{} -> {} client_id={} durable={} shared={} subscription={:?} user={:?}",
			session.name,
			session.destination,
			session.client_id,
			session.durable,
			session.shared,
			session.subscription_name,
			session.connection.user,
		);
	}

	let (client, connection) =
		TypedClient::<_, JsonCodec>::connect_with_config(config.clone(), broker.clone(), registry)
			.await?;
	let report = connection.start_report();
	println!("started: {:?}", report.started);
	for failure in &report.failed {
		println!("failed: {failure}");
	}

	client.publish("invoices", &Invoice { number: 1001 }, None).await?;
	// Nobody listens here; logged as a warning by the dispatcher policy.
	client.publish("refunds", &Invoice { number: 1 }, None).await?;

	let notifier = TypedClient::<_, JsonCodec>::publisher_only(config, broker)?;
	notifier.publish("invoices", &Invoice { number: 1002 }, None).await?;

	tokio::time::sleep(Duration::from_millis(100)).await;
	connection.shutdown().await?;
	Ok(())
}
