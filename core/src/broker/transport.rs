//! Transport traits implemented by broker clients.

use std::sync::Arc;

use async_trait::async_trait;

use super::error::TransportError;
use crate::client::config::ConnectionSettings;
use crate::message::{Destination, HeaderValue, MessageKind};
use crate::routing::session::SessionConfig;

/// Message delivered by a broker connection.
///
/// Accessors are fallible because brokers may refuse reads on a message
/// (wrong body kind, closed session, unreadable property).
pub trait InboundMessage: Send + Sync + 'static {
	/// Kind of body carried by the message
	fn kind(&self) -> MessageKind;
	/// Text body; only valid for [`MessageKind::Text`]
	fn text(&self) -> Result<String, TransportError>;
	/// Destination the message was delivered on
	fn destination(&self) -> Result<Destination, TransportError>;
	/// Names of every property set on the message
	fn property_names(&self) -> Result<Vec<String>, TransportError>;
	/// Value of a single property
	fn property(&self, name: &str) -> Result<HeaderValue, TransportError>;
}

/// Message being prepared for sending.
pub trait OutgoingMessage: Send + 'static {
	/// Sets a property on the message
	fn set_property(
		&mut self,
		name: &str,
		value: HeaderValue,
	) -> Result<(), TransportError>;
}

/// Callback invoked by a connection for every delivered message.
#[async_trait]
pub trait MessageListener<M>: Send + Sync + 'static
where M: Send + 'static
{
	/// Handles one delivered message.
	///
	/// The delivery is considered processed once the returned future
	/// completes; transacted sessions commit at that point.
	async fn on_message(&self, message: M);
}

/// Broker client: connection factory plus the publishing side.
#[async_trait]
pub trait BrokerClient: Send + Sync + 'static {
	/// Inbound message type delivered to listeners
	type Message: InboundMessage;
	/// Outgoing message type built by [`BrokerClient::create_message`]
	type Outgoing: OutgoingMessage;
	/// Listening connection type
	type Connection: BrokerConnection<Message = Self::Message>;

	/// Opens a fresh connection with the given settings.
	async fn connect(
		&self,
		settings: &ConnectionSettings,
	) -> Result<Self::Connection, TransportError>;

	/// Creates an outgoing text message.
	fn create_message(&self, body: String) -> Self::Outgoing;

	/// Sends a message. Returns once the broker client accepted it.
	async fn send(
		&self,
		destination: &Destination,
		message: Self::Outgoing,
	) -> Result<(), TransportError>;
}

/// A dedicated connection owning one listening consumer.
#[async_trait]
pub trait BrokerConnection: Send + Sync + 'static {
	/// Inbound message type
	type Message: InboundMessage;

	/// Creates the consumer described by `config` and starts delivering
	/// messages to `listener`.
	async fn listen(
		&mut self,
		config: &SessionConfig,
		listener: Arc<dyn MessageListener<Self::Message>>,
	) -> Result<(), TransportError>;

	/// Releases the consumer and closes the connection.
	async fn close(&mut self) -> Result<(), TransportError>;
}
