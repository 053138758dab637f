//! Broker transport abstraction
//!
//! The dispatch layer never talks to a wire protocol directly. It consumes
//! a [`BrokerClient`] that opens connections, sends messages and delivers
//! inbound messages to a [`MessageListener`].

pub mod error;
pub mod in_memory;
#[cfg(feature = "mqtt")]
pub mod mqtt;
pub mod transport;

pub use error::{BoxError, TransportError};
pub use in_memory::{InMemoryBroker, InMemoryConnection, InMemoryMessage};
#[cfg(feature = "mqtt")]
pub use mqtt::{MqttBroker, MqttConnection, MqttInboundMessage, MqttOutgoingMessage};
pub use transport::{
	BrokerClient, BrokerConnection, InboundMessage, MessageListener,
	OutgoingMessage,
};
