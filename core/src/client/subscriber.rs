//! Subscriber contract and registration records.

use std::any::TypeId;
use std::fmt;

use arcstr::ArcStr;
use async_trait::async_trait;

use super::config::ConnectionOverride;
use crate::broker::BoxError;
use crate::message::{ExchangeKind, Message};

/// Message handler bound to one topic and one payload type.
///
/// Every registered subscriber gets its own broker session. Only the
/// topic and [`Subscriber::handle`] are required; the remaining methods
/// describe how the session subscribes and default to a plain,
/// non-durable, non-shared topic subscription.
///
/// ```rust
/// use async_trait::async_trait;
/// use serde::Deserialize;
/// use typed_broker_client_core::{BoxError, Message, Subscriber};
///
/// #[derive(Debug, Deserialize)]
/// struct OrderCreated {
///     id: String,
/// }
///
/// struct OrderListener;
///
/// #[async_trait]
/// impl Subscriber for OrderListener {
///     type Payload = OrderCreated;
///
///     fn topic(&self) -> &str {
///         "orders"
///     }
///
///     async fn handle(&self, message: Message<OrderCreated>) -> Result<(), BoxError> {
///         println!("order {}", message.model.id);
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Subscriber: Send + Sync + 'static {
	/// Type the message body is decoded into
	type Payload: Send + Sync + 'static;

	/// Name of the subscribed topic or queue
	fn topic(&self) -> &str;

	/// Subscription (sub-queue) name for topic subscriptions
	fn sub_queue(&self) -> Option<&str> {
		None
	}

	/// Client id of the session; generated when absent or blank
	fn client_id(&self) -> Option<&str> {
		None
	}

	/// Keeps the subscription while the client is offline (topics only)
	fn is_durable(&self) -> bool {
		false
	}

	/// Lets several consumers share the subscription (topics only)
	fn is_shared(&self) -> bool {
		false
	}

	/// Kind of destination subscribed to
	fn exchange_kind(&self) -> ExchangeKind {
		ExchangeKind::Topic
	}

	/// Connection values replacing the configured ones for this subscriber
	fn connection(&self) -> Option<ConnectionOverride> {
		None
	}

	/// Handles one decoded message
	async fn handle(&self, message: Message<Self::Payload>) -> Result<(), BoxError>;
}

/// Registration ordinal of a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(pub(crate) usize);

impl fmt::Display for SubscriberId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Runtime description of a payload type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PayloadType {
	id: TypeId,
	name: &'static str,
}

impl PayloadType {
	/// Descriptor of `T`.
	pub fn of<T: 'static>() -> Self {
		Self {
			id: TypeId::of::<T>(),
			name: std::any::type_name::<T>(),
		}
	}

	/// Full type name.
	pub fn name(&self) -> &'static str {
		self.name
	}

	/// `true` if this describes `T`.
	pub fn is<T: 'static>(&self) -> bool {
		self.id == TypeId::of::<T>()
	}
}

impl fmt::Display for PayloadType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.name)
	}
}

/// Immutable registration record of one subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberDescriptor {
	/// Registration ordinal, unique within a registry
	pub id: SubscriberId,
	/// Subscribed topic
	pub topic: ArcStr,
	/// Declared payload type
	pub payload_type: PayloadType,
	/// Destination kind
	pub exchange_kind: ExchangeKind,
	/// Durable subscription flag
	pub durable: bool,
	/// Shared subscription flag
	pub shared: bool,
	/// Subscription name
	pub sub_queue: Option<String>,
	/// Requested client id
	pub client_id: Option<String>,
	/// Connection override
	pub connection: Option<ConnectionOverride>,
}

impl SubscriberDescriptor {
	/// Captures the registration data of `subscriber`.
	pub fn of<S: Subscriber>(id: SubscriberId, subscriber: &S) -> Self {
		Self {
			id,
			topic: ArcStr::from(subscriber.topic()),
			payload_type: PayloadType::of::<S::Payload>(),
			exchange_kind: subscriber.exchange_kind(),
			durable: subscriber.is_durable(),
			shared: subscriber.is_shared(),
			sub_queue: subscriber.sub_queue().map(str::to_string),
			client_id: subscriber.client_id().map(str::to_string),
			connection: subscriber.connection().filter(|c| !c.is_empty()),
		}
	}

	/// Synthetic session name, unique per descriptor.
	pub fn session_name(&self) -> String {
		format!("listener_{}_{}", self.topic, self.id)
	}
}
