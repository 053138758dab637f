//! # Hello World - Typed Broker Client
//!
//! One subscriber on the `greetings` topic, one publish, one delivery.
//!
//! Runs against the in-process broker, no infrastructure needed:
//! `cargo run --example 000_hello_world`

mod shared;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use typed_broker_client::prelude::*;

#[derive(Debug, Serialize, Deserialize)]
struct Greeting {
	sender: String,
	text: String,
}

struct GreetingListener {
	done: mpsc::UnboundedSender<()>,
}

#[async_trait]
impl Subscriber for GreetingListener {
	type Payload = Greeting;

	fn topic(&self) -> &str {
		"greetings"
	}

	async fn handle(
		&self,
		message: Message<Greeting>,
	) -> std::result::Result<(), BoxError> {
		println!("{} says: {}", message.sender, message.text);
		self.done.send(())?;
		Ok(())
	}
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
	shared::tracing::setup(None);

	let (done_tx, mut done_rx) = mpsc::unbounded_channel();
	let registry = SubscriberRegistry::builder(JsonCodec::new())
		.register(GreetingListener { done: done_tx })?
		.build();

	let (client, connection) = TypedClient::<_, JsonCodec>::connect_with_config(
		shared::config::broker_config("hello_world"),
		InMemoryBroker::new(),
		registry,
	)
	.await?;
	println!("Listening on {:?}", connection.active_sessions());

	let greeting = Greeting {
		sender: "rust".into(),
		text: "Hello, broker!".into(),
	};
	client.publish("greetings", &greeting, None).await?;
	done_rx.recv().await;

	connection.shutdown().await?;
	Ok(())
}
