//! Typed publishers.

use std::marker::PhantomData;
use std::sync::Arc;

use arcstr::ArcStr;
use tracing::debug;

use super::error::PublishError;
use crate::broker::{BrokerClient, OutgoingMessage};
use crate::codec::MessageCodec;
use crate::message::{Destination, ExchangeKind, Headers, PublishRequest};

/// Encodes payloads and sends them through the broker client.
///
/// Every publish goes to a destination of the configured exchange kind.
pub struct Publisher<B, C> {
	broker: Arc<B>,
	codec: C,
	exchange_kind: ExchangeKind,
}

impl<B, C> Clone for Publisher<B, C>
where C: Clone
{
	fn clone(&self) -> Self {
		Self {
			broker: Arc::clone(&self.broker),
			codec: self.codec.clone(),
			exchange_kind: self.exchange_kind,
		}
	}
}

impl<B, C> Publisher<B, C>
where
	B: BrokerClient,
	C: Clone + Send + Sync + 'static,
{
	/// Creates a publisher sending to `exchange_kind` destinations.
	pub fn new(broker: Arc<B>, codec: C, exchange_kind: ExchangeKind) -> Self {
		Self {
			broker,
			codec,
			exchange_kind,
		}
	}

	/// Kind of destination messages are sent to.
	pub fn exchange_kind(&self) -> ExchangeKind {
		self.exchange_kind
	}

	/// Publishes `payload` to `topic`.
	///
	/// Every header is applied before anything is sent; if one fails the
	/// message is discarded. `None` and an empty map both mean no headers.
	pub async fn publish<T>(
		&self,
		topic: &str,
		payload: &T,
		headers: Option<&Headers>,
	) -> Result<(), PublishError>
	where C: MessageCodec<T> {
		if topic.trim().is_empty() {
			return Err(PublishError::InvalidTopic);
		}
		let body = self.codec.encode(payload).map_err(|err| {
			PublishError::Serialization {
				payload_type: std::any::type_name::<T>(),
				source: Box::new(err),
			}
		})?;

		let mut message = self.broker.create_message(body);
		for (name, value) in headers.into_iter().flatten() {
			message.set_property(name, value.clone()).map_err(|source| {
				PublishError::HeaderApplication {
					name: name.clone(),
					source,
				}
			})?;
		}

		let destination = Destination::new(topic, self.exchange_kind);
		self.broker.send(&destination, message).await?;
		debug!(
			destination = %destination,
			headers = headers.map_or(0, Headers::len),
			"Message published"
		);
		Ok(())
	}

	/// Publishes a prepared request.
	pub async fn publish_request<T>(
		&self,
		request: &PublishRequest<T>,
	) -> Result<(), PublishError>
	where C: MessageCodec<T> {
		self.publish(&request.topic, &request.payload, Some(&request.headers))
			.await
	}

	/// Publisher bound to one topic and payload type.
	pub fn for_topic<T>(
		&self,
		topic: impl Into<ArcStr>,
	) -> Result<TopicPublisher<T, B, C>, PublishError>
	where C: MessageCodec<T> {
		let topic = topic.into();
		if topic.trim().is_empty() {
			return Err(PublishError::InvalidTopic);
		}
		Ok(TopicPublisher {
			publisher: self.clone(),
			topic,
			_phantom: PhantomData,
		})
	}
}

/// Typed publisher for a specific topic.
///
/// Created via [`TypedClient::get_publisher`](super::TypedClient::get_publisher).
pub struct TopicPublisher<T, B, C> {
	publisher: Publisher<B, C>,
	topic: ArcStr,
	_phantom: PhantomData<fn(&T)>,
}

impl<T, B, C> TopicPublisher<T, B, C>
where
	B: BrokerClient,
	C: MessageCodec<T>,
{
	/// Topic this publisher sends to.
	pub fn topic(&self) -> &ArcStr {
		&self.topic
	}

	/// Publishes without headers.
	pub async fn publish(&self, payload: &T) -> Result<(), PublishError> {
		self.publisher.publish(&self.topic, payload, None).await
	}

	/// Publishes with headers.
	pub async fn publish_with_headers(
		&self,
		payload: &T,
		headers: &Headers,
	) -> Result<(), PublishError> {
		self.publisher
			.publish(&self.topic, payload, Some(headers))
			.await
	}
}

#[cfg(test)]
mod tests {
	use serde::{Deserialize, Serialize, Serializer};

	use super::*;
	use crate::broker::{InMemoryBroker, TransportError};
	use crate::codec::JsonCodec;
	use crate::message::HeaderValue;

	#[derive(Debug, PartialEq, Serialize, Deserialize)]
	struct OrderCreated {
		id: String,
	}

	#[derive(Debug, Deserialize)]
	struct Unserializable;

	impl Serialize for Unserializable {
		fn serialize<S: Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
			Err(serde::ser::Error::custom("refused"))
		}
	}

	fn publisher(
		broker: &InMemoryBroker,
		kind: ExchangeKind,
	) -> Publisher<InMemoryBroker, JsonCodec> {
		Publisher::new(Arc::new(broker.clone()), JsonCodec::new(), kind)
	}

	#[tokio::test]
	async fn publishes_encoded_body_with_headers() {
		let broker = InMemoryBroker::recording();
		let headers = Headers::from([
			("trace-id".to_string(), HeaderValue::from("abc")),
			("attempt".to_string(), HeaderValue::from(2)),
		]);

		publisher(&broker, ExchangeKind::Topic)
			.publish("orders", &OrderCreated { id: "42".into() }, Some(&headers))
			.await
			.unwrap();

		let sent = broker.sent_messages();
		assert_eq!(sent.len(), 1);
		assert_eq!(sent[0].body(), Some(r#"{"id":"42"}"#));
		assert_eq!(sent[0].properties().len(), 2);
		assert_eq!(
			crate::broker::InboundMessage::destination(&sent[0]).unwrap(),
			Destination::topic("orders")
		);
	}

	#[tokio::test]
	async fn uses_configured_exchange_kind() {
		let broker = InMemoryBroker::recording();
		let request = PublishRequest::new("jobs", OrderCreated { id: "1".into() });
		publisher(&broker, ExchangeKind::Queue)
			.publish_request(&request)
			.await
			.unwrap();
		let sent = broker.sent_messages();
		assert_eq!(
			crate::broker::InboundMessage::destination(&sent[0]).unwrap(),
			Destination::queue("jobs")
		);
		assert!(sent[0].properties().is_empty());
	}

	#[tokio::test]
	async fn rejected_header_aborts_send() {
		let broker = InMemoryBroker::recording();
		let headers = Headers::from([
			("trace-id".to_string(), HeaderValue::from("abc")),
			("JMSPriority".to_string(), HeaderValue::from(4)),
		]);

		let result = publisher(&broker, ExchangeKind::Topic)
			.publish("orders", &OrderCreated { id: "1".into() }, Some(&headers))
			.await;

		match result {
			| Err(PublishError::HeaderApplication { name, source }) => {
				assert_eq!(name, "JMSPriority");
				assert!(matches!(source, TransportError::InvalidPropertyName(_)));
			}
			| other => panic!("unexpected result: {other:?}"),
		}
		assert!(broker.sent_messages().is_empty());
	}

	#[tokio::test]
	async fn blank_topic_and_encode_failure_are_reported() {
		let broker = InMemoryBroker::recording();
		let publisher = publisher(&broker, ExchangeKind::Topic);

		assert!(matches!(
			publisher.publish(" ", &OrderCreated { id: "1".into() }, None).await,
			Err(PublishError::InvalidTopic)
		));
		assert!(matches!(
			publisher.publish("orders", &Unserializable, None).await,
			Err(PublishError::Serialization { .. })
		));
		assert!(matches!(
			publisher.for_topic::<OrderCreated>(""),
			Err(PublishError::InvalidTopic)
		));
		assert!(broker.sent_messages().is_empty());
	}

	#[tokio::test]
	async fn topic_publisher_sends_to_its_topic() {
		let broker = InMemoryBroker::recording();
		let orders = publisher(&broker, ExchangeKind::Topic)
			.for_topic::<OrderCreated>("orders")
			.unwrap();
		orders.publish(&OrderCreated { id: "7".into() }).await.unwrap();
		assert_eq!(orders.topic(), "orders");
		assert_eq!(broker.sent_messages().len(), 1);
	}
}
