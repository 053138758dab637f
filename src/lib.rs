//! # Typed Broker Client
//!
//! Typed publish/subscribe over a message broker with one independently
//! managed session per subscriber.
//!
//! This crate re-exports [`typed_broker_client_core`]; see its
//! documentation for the full API.
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use serde::{Deserialize, Serialize};
//! use typed_broker_client::prelude::*;
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct SensorReading {
//!     sensor: String,
//!     celsius: f64,
//! }
//!
//! struct Thermometer;
//!
//! #[async_trait]
//! impl Subscriber for Thermometer {
//!     type Payload = SensorReading;
//!
//!     fn topic(&self) -> &str {
//!         "sensors.temperature"
//!     }
//!
//!     async fn handle(&self, message: Message<SensorReading>) -> std::result::Result<(), BoxError> {
//!         println!("{}: {}", message.model.sensor, message.model.celsius);
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let registry = SubscriberRegistry::builder(JsonCodec::new())
//!         .register(Thermometer)?
//!         .build();
//!     let (client, connection) = TypedClient::<_, JsonCodec>::connect_with_config(
//!         BrokerConfig::from_env()?,
//!         InMemoryBroker::new(),
//!         registry,
//!     )
//!     .await?;
//!
//!     let reading = SensorReading { sensor: "hall".into(), celsius: 21.5 };
//!     client.publish("sensors.temperature", &reading, None).await?;
//!
//!     connection.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub use typed_broker_client_core::*;
