//! # Fan-out - Typed Broker Client
//!
//! Three subscribers share the `orders` topic. The last one registered
//! decides the payload type, so the body is decoded into `OrderCreated`
//! and delivered to both `OrderCreated` subscribers. The
//! `AuditRecord` subscriber declares another type and is skipped, which is
//! logged as a `Subscriber skipped` warning.
//!
//! Headers set by the publisher arrive with the message.

mod shared;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use typed_broker_client::prelude::*;

#[derive(Debug, Serialize, Deserialize)]
struct OrderCreated {
	id: String,
	amount_cents: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct AuditRecord {
	actor: String,
}

struct Billing(mpsc::UnboundedSender<String>);
struct Shipping(mpsc::UnboundedSender<String>);
struct Audit;

#[async_trait]
impl Subscriber for Audit {
	type Payload = AuditRecord;

	fn topic(&self) -> &str {
		"orders"
	}

	async fn handle(
		&self,
		message: Message<AuditRecord>,
	) -> std::result::Result<(), BoxError> {
		println!("[audit] never reached for {}", message.actor);
		Ok(())
	}
}

#[async_trait]
impl Subscriber for Billing {
	type Payload = OrderCreated;

	fn topic(&self) -> &str {
		"orders"
	}

	async fn handle(
		&self,
		message: Message<OrderCreated>,
	) -> std::result::Result<(), BoxError> {
		let trace = message
			.header("trace-id")
			.map(ToString::to_string)
			.unwrap_or_default();
		self.0.send(format!(
			"[billing] charging {} cents for {} (trace {trace})",
			message.amount_cents, message.id
		))?;
		Ok(())
	}
}

#[async_trait]
impl Subscriber for Shipping {
	type Payload = OrderCreated;

	fn topic(&self) -> &str {
		"orders"
	}

	async fn handle(
		&self,
		message: Message<OrderCreated>,
	) -> std::result::Result<(), BoxError> {
		self.0.send(format!("[shipping] preparing order {}", message.id))?;
		Ok(())
	}
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
	shared::tracing::setup(Some("warn"));

	let (tx, mut rx) = mpsc::unbounded_channel();
	let registry = SubscriberRegistry::builder(JsonCodec::new())
		.register(Audit)?
		.register(Billing(tx.clone()))?
		.register(Shipping(tx))?
		.build();

	let (client, connection) = TypedClient::<_, JsonCodec>::connect_with_config(
		shared::config::broker_config("fan_out"),
		InMemoryBroker::new(),
		registry,
	)
	.await?;

	let orders = client.get_publisher::<OrderCreated>("orders")?;
	let headers = Headers::from([("trace-id".to_string(), HeaderValue::from("abc-123"))]);
	orders
		.publish_with_headers(
			&OrderCreated {
				id: "A-1".into(),
				amount_cents: 4200,
			},
			&headers,
		)
		.await?;

	for _ in 0..2 {
		match tokio::time::timeout(Duration::from_secs(1), rx.recv()).await {
			| Ok(Some(line)) => println!("{line}"),
			| _ => break,
		}
	}

	connection.shutdown().await?;
	Ok(())
}
