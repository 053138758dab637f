//! Immutable table of registered subscribers.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use arcstr::ArcStr;
use async_trait::async_trait;
use tracing::debug;

use super::error::{HandlerInvocationError, SubscriptionError};
use crate::broker::BoxError;
use crate::client::subscriber::{
	PayloadType, Subscriber, SubscriberDescriptor, SubscriberId,
};
use crate::codec::MessageCodec;
use crate::message::{Headers, Message};

/// Payload decoded once and shared by every handler of a topic.
#[derive(Clone)]
pub struct DecodedPayload {
	value: Arc<dyn Any + Send + Sync>,
	payload_type: PayloadType,
}

impl DecodedPayload {
	/// Wraps a decoded value.
	pub fn new<T>(value: T) -> Self
	where T: Send + Sync + 'static {
		Self {
			value: Arc::new(value),
			payload_type: PayloadType::of::<T>(),
		}
	}

	/// Type the value was decoded into.
	pub fn payload_type(&self) -> PayloadType {
		self.payload_type
	}

	/// Typed view of the value, `None` if it is not a `T`.
	pub fn downcast<T>(&self) -> Option<Arc<T>>
	where T: Send + Sync + 'static {
		Arc::clone(&self.value).downcast::<T>().ok()
	}
}

impl std::fmt::Debug for DecodedPayload {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("DecodedPayload")
			.field("payload_type", &self.payload_type)
			.finish_non_exhaustive()
	}
}

/// Subscriber with its payload type erased.
#[async_trait]
pub trait ErasedHandler: Send + Sync + 'static {
	/// Registration record
	fn descriptor(&self) -> &Arc<SubscriberDescriptor>;

	/// Decodes a body into this handler's payload type
	fn decode(&self, body: &str) -> Result<DecodedPayload, BoxError>;

	/// Invokes the handler if `payload` has its declared type
	async fn invoke(
		&self,
		payload: DecodedPayload,
		headers: Arc<Headers>,
	) -> Result<(), HandlerInvocationError>;
}

struct TypedHandler<S, C> {
	descriptor: Arc<SubscriberDescriptor>,
	subscriber: Arc<S>,
	codec: C,
}

#[async_trait]
impl<S, C> ErasedHandler for TypedHandler<S, C>
where
	S: Subscriber,
	C: MessageCodec<S::Payload>,
{
	fn descriptor(&self) -> &Arc<SubscriberDescriptor> {
		&self.descriptor
	}

	fn decode(&self, body: &str) -> Result<DecodedPayload, BoxError> {
		let value = self.codec.decode(body).map_err(BoxError::from)?;
		Ok(DecodedPayload::new(value))
	}

	async fn invoke(
		&self,
		payload: DecodedPayload,
		headers: Arc<Headers>,
	) -> Result<(), HandlerInvocationError> {
		let model = payload.downcast::<S::Payload>().ok_or(
			HandlerInvocationError::PayloadTypeMismatch {
				expected: self.descriptor.payload_type.name(),
				actual: payload.payload_type().name(),
			},
		)?;
		self.subscriber
			.handle(Message::new(model, headers))
			.await
			.map_err(HandlerInvocationError::Failed)
	}
}

/// Registered subscribers, indexed by topic.
///
/// Built once through [`RegistryBuilder`] and never mutated afterwards, so
/// it can be shared between every session without locking.
#[derive(Default)]
pub struct SubscriberRegistry {
	handlers: Vec<Arc<dyn ErasedHandler>>,
	by_topic: HashMap<ArcStr, Vec<usize>>,
}

impl SubscriberRegistry {
	/// Starts a registry whose subscribers decode with `codec` by default.
	pub fn builder<C>(codec: C) -> RegistryBuilder<C>
	where C: Clone + Send + Sync + 'static {
		RegistryBuilder {
			codec,
			handlers: Vec::new(),
		}
	}

	/// Descriptors in registration order.
	pub fn descriptors(&self) -> Vec<Arc<SubscriberDescriptor>> {
		self.handlers
			.iter()
			.map(|handler| Arc::clone(handler.descriptor()))
			.collect()
	}

	/// Number of registered subscribers.
	pub fn len(&self) -> usize {
		self.handlers.len()
	}

	/// `true` if nothing is registered.
	pub fn is_empty(&self) -> bool {
		self.handlers.is_empty()
	}

	/// Handlers bound to `topic`, in registration order.
	pub fn resolve(&self, topic: &str) -> Vec<Arc<dyn ErasedHandler>> {
		self.by_topic
			.get(topic)
			.map(|indices| {
				indices
					.iter()
					.map(|&index| Arc::clone(&self.handlers[index]))
					.collect()
			})
			.unwrap_or_default()
	}

	/// Handler registered under `id`.
	pub fn get(&self, id: SubscriberId) -> Option<&Arc<dyn ErasedHandler>> {
		self.handlers.get(id.0)
	}
}

impl std::fmt::Debug for SubscriberRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SubscriberRegistry")
			.field("subscribers", &self.handlers.len())
			.field("topics", &self.by_topic.len())
			.finish()
	}
}

/// Collects subscribers before freezing them into a [`SubscriberRegistry`].
pub struct RegistryBuilder<C> {
	codec: C,
	handlers: Vec<Arc<dyn ErasedHandler>>,
}

impl<C> RegistryBuilder<C>
where C: Clone + Send + Sync + 'static
{
	/// Registers a subscriber decoded with the builder's codec.
	pub fn register<S>(self, subscriber: S) -> Result<Self, SubscriptionError>
	where
		S: Subscriber,
		C: MessageCodec<S::Payload>,
	{
		self.register_arc(Arc::new(subscriber))
	}

	/// Registers a shared subscriber decoded with the builder's codec.
	pub fn register_arc<S>(
		self,
		subscriber: Arc<S>,
	) -> Result<Self, SubscriptionError>
	where
		S: Subscriber,
		C: MessageCodec<S::Payload>,
	{
		let codec = self.codec.clone();
		self.push(subscriber, codec)
	}

	/// Registers a subscriber decoded with its own codec.
	pub fn register_with_codec<S, K>(
		self,
		subscriber: S,
		codec: K,
	) -> Result<Self, SubscriptionError>
	where
		S: Subscriber,
		K: MessageCodec<S::Payload>,
	{
		self.push(Arc::new(subscriber), codec)
	}

	fn push<S, K>(
		mut self,
		subscriber: Arc<S>,
		codec: K,
	) -> Result<Self, SubscriptionError>
	where
		S: Subscriber,
		K: MessageCodec<S::Payload>,
	{
		if subscriber.topic().trim().is_empty() {
			return Err(SubscriptionError::InvalidTopic {
				subscriber: std::any::type_name::<S>(),
			});
		}
		let id = SubscriberId(self.handlers.len());
		let descriptor = Arc::new(SubscriberDescriptor::of(id, subscriber.as_ref()));
		debug!(
			topic = %descriptor.topic,
			payload_type = %descriptor.payload_type,
			subscriber_id = %id,
			"Registered subscriber"
		);
		self.handlers.push(Arc::new(TypedHandler::<S, K> {
			descriptor,
			subscriber,
			codec,
		}));
		Ok(self)
	}

	/// Freezes the registry.
	pub fn build(self) -> SubscriberRegistry {
		let mut by_topic: HashMap<ArcStr, Vec<usize>> = HashMap::new();
		for (index, handler) in self.handlers.iter().enumerate() {
			by_topic
				.entry(handler.descriptor().topic.clone())
				.or_default()
				.push(index);
		}
		SubscriberRegistry {
			handlers: self.handlers,
			by_topic,
		}
	}
}

#[cfg(test)]
mod tests {
	use serde::{Deserialize, Serialize};

	use super::*;
	use crate::codec::JsonCodec;

	#[derive(Debug, PartialEq, Serialize, Deserialize)]
	struct Ping {
		seq: u32,
	}

	struct PingListener(&'static str);

	#[async_trait]
	impl Subscriber for PingListener {
		type Payload = Ping;

		fn topic(&self) -> &str {
			self.0
		}

		async fn handle(&self, _message: Message<Ping>) -> Result<(), BoxError> {
			Ok(())
		}
	}

	struct TextListener;

	#[async_trait]
	impl Subscriber for TextListener {
		type Payload = String;

		fn topic(&self) -> &str {
			"pings"
		}

		async fn handle(&self, _message: Message<String>) -> Result<(), BoxError> {
			Ok(())
		}
	}

	#[test]
	fn resolves_in_registration_order() {
		let registry = SubscriberRegistry::builder(JsonCodec::new())
			.register(PingListener("pings"))
			.unwrap()
			.register(PingListener("other"))
			.unwrap()
			.register(TextListener)
			.unwrap()
			.build();

		assert_eq!(registry.len(), 3);
		let matches = registry.resolve("pings");
		let ids: Vec<_> = matches.iter().map(|h| h.descriptor().id).collect();
		assert_eq!(ids, vec![SubscriberId(0), SubscriberId(2)]);
		assert!(registry.resolve("unknown").is_empty());
		assert!(registry.resolve("ping").is_empty());
	}

	#[test]
	fn rejects_blank_topic() {
		let result = SubscriberRegistry::builder(JsonCodec::new())
			.register(PingListener("  "));
		assert!(matches!(
			result,
			Err(SubscriptionError::InvalidTopic { .. })
		));
	}

	#[tokio::test]
	async fn handler_rejects_foreign_payload_type() {
		let registry = SubscriberRegistry::builder(JsonCodec::new())
			.register(PingListener("pings"))
			.unwrap()
			.build();
		let handler = &registry.resolve("pings")[0];

		let decoded = handler.decode(r#"{"seq":7}"#).unwrap();
		assert!(decoded.payload_type().is::<Ping>());
		assert_eq!(decoded.downcast::<Ping>().unwrap().seq, 7);
		assert!(handler.invoke(decoded, Arc::default()).await.is_ok());

		let foreign = DecodedPayload::new("text".to_string());
		assert!(matches!(
			handler.invoke(foreign, Arc::default()).await,
			Err(HandlerInvocationError::PayloadTypeMismatch { .. })
		));
		assert!(handler.decode("not json").is_err());
	}
}
