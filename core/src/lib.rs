//! # Typed Broker Client
//!
//! A typed publish/subscribe client over a message broker. Producers
//! publish typed payloads to named topics or queues. Consumers register
//! typed subscribers keyed by topic, and every subscriber gets its own
//! listening session with its own connection, transacted acknowledgement
//! and optional durable or shared subscription.
//!
//! ## Features
//!
//! - **Typed Subscribers**: one [`Subscriber`] per topic and payload type
//! - **Single Decode, Fan-out**: subscribers sharing a topic receive one
//!   decoded value
//! - **Isolated Sessions**: a subscriber that cannot connect never affects
//!   the others
//! - **Header Propagation**: message properties travel with every message
//! - **Pluggable Codecs**: JSON by default, RON behind the `ron` feature
//! - **Pluggable Transports**: in-process broker included, MQTT v5 behind the
//!   `mqtt` feature
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use serde::{Deserialize, Serialize};
//! use typed_broker_client_core::prelude::*;
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct OrderCreated {
//!     id: String,
//! }
//!
//! struct OrderListener;
//!
//! #[async_trait]
//! impl Subscriber for OrderListener {
//!     type Payload = OrderCreated;
//!
//!     fn topic(&self) -> &str {
//!         "orders"
//!     }
//!
//!     async fn handle(&self, message: Message<OrderCreated>) -> std::result::Result<(), BoxError> {
//!         println!("order {} created", message.model.id);
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let registry = SubscriberRegistry::builder(JsonCodec::new())
//!         .register(OrderListener)?
//!         .build();
//!
//!     let (client, connection) = TypedClient::<_, JsonCodec>::connect_with_config(
//!         BrokerConfig::new("vm://local"),
//!         InMemoryBroker::new(),
//!         registry,
//!     )
//!     .await?;
//!
//!     client
//!         .publish("orders", &OrderCreated { id: "42".into() }, None)
//!         .await?;
//!
//!     connection.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Shared Topics
//!
//! When several subscribers share a topic, the last one registered decides
//! the payload type. The body is decoded once into that type and handed to
//! every subscriber of the topic declaring it; subscribers declaring a
//! different type are skipped and the skip is logged.

#![warn(missing_docs)]

pub mod broker;
pub mod client;
pub mod codec;
pub mod connection;
pub mod message;
pub mod routing;

// === Core Public API ===
pub use broker::{
	BoxError, BrokerClient, BrokerConnection, InMemoryBroker, InboundMessage,
	MessageListener, OutgoingMessage, TransportError,
};
#[cfg(feature = "mqtt")]
pub use broker::{MqttBroker, MqttConnection};
pub use client::{
	BrokerClientError, BrokerConfig, ConnectionOverride, DispatchSettings,
	PublishError, Publisher, Subscriber, TopicPublisher, TypedClient,
	UnmatchedTopicPolicy,
};
#[cfg(feature = "ron")]
pub use codec::RonCodec;
pub use codec::{JsonCodec, MessageCodec};
pub use connection::ListenerConnection;
pub use message::{
	Destination, ExchangeKind, HeaderValue, Headers, Message, MessageEnvelope,
	PublishRequest,
};
// === Advanced API ===
pub use routing::{
	DispatchOutcome, Dispatcher, StartReport, SubscriberRegistry,
	SubscriptionManager,
};

/// Result type alias for operations that may fail with BrokerClientError
pub type Result<T> = std::result::Result<T, BrokerClientError>;

/// Prelude module for convenient imports
///
/// Essential types for most applications.
///
/// ```rust
/// use typed_broker_client_core::prelude::*;
/// ```
pub mod prelude {
	#[cfg(feature = "ron")]
	pub use crate::RonCodec;
	pub use crate::{
		BoxError, BrokerClientError, BrokerConfig, ExchangeKind, HeaderValue,
		Headers, InMemoryBroker, JsonCodec, ListenerConnection, Message,
		MessageCodec, Result, Subscriber, SubscriberRegistry, TypedClient,
	};
}

/// Advanced types for custom transports and direct pipeline access
///
/// ```rust
/// use typed_broker_client_core::advanced::*;
/// ```
pub mod advanced {
	pub use crate::broker::InMemoryMessage;
	pub use crate::client::{
		ConnectionSettings, PayloadType, SubscriberDescriptor, SubscriberId,
	};
	pub use crate::message::MessageKind;
	pub use crate::routing::{
		AcknowledgeMode, DecodedPayload, EnvelopeExtractor, ErasedHandler,
		RegistryBuilder, Session, SessionConfig, SessionListener,
	};
}

/// Error types used throughout the library
///
/// ```rust
/// use typed_broker_client_core::errors::*;
/// ```
pub mod errors {
	pub use crate::client::{BrokerClientError, ConfigError, PublishError};
	pub use crate::routing::{
		DispatchError, ExtractionError, HandlerInvocationError, ShutdownError,
		SubscriptionError,
	};
	pub use crate::TransportError;
}
