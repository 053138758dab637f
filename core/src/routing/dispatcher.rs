//! Envelope dispatch: extract, resolve, decode once, fan out.

use std::any::Any;
use std::sync::Arc;

use arcstr::ArcStr;
use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

use super::error::{DispatchError, HandlerInvocationError};
use super::extractor::EnvelopeExtractor;
use super::registry::{DecodedPayload, ErasedHandler, SubscriberRegistry};
use crate::broker::{InboundMessage, MessageListener};
use crate::client::config::{DispatchSettings, UnmatchedTopicPolicy};
use crate::client::subscriber::SubscriberId;
use crate::message::{ExchangeKind, Headers};

/// Result of dispatching one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
	/// No subscriber is bound to the topic; the message was dropped
	Unmatched {
		/// Topic of the message
		topic: ArcStr,
	},
	/// The payload was decoded once and offered to every bound handler
	Delivered {
		/// Topic of the message
		topic: ArcStr,
		/// Handlers that completed successfully
		delivered: usize,
		/// Handlers skipped because they declare another payload type
		skipped: usize,
		/// Handlers that returned an error or panicked
		failed: usize,
	},
}

/// Entry point invoked for every delivered message.
///
/// Holds no per-message state; one instance is shared by every session.
/// The last-registered subscriber of a topic decides the payload type, the
/// body is decoded once into that type and the value is handed to every
/// subscriber of the topic declaring the same type. Handlers run
/// concurrently and their failures never leave the dispatcher.
pub struct Dispatcher {
	registry: Arc<SubscriberRegistry>,
	exchange_kind: ExchangeKind,
	unmatched_topic_policy: UnmatchedTopicPolicy,
	decode_permits: Semaphore,
}

impl Dispatcher {
	/// Creates a dispatcher expecting destinations of `exchange_kind`.
	pub fn new(
		registry: Arc<SubscriberRegistry>,
		exchange_kind: ExchangeKind,
		settings: &DispatchSettings,
	) -> Self {
		Self {
			registry,
			exchange_kind,
			unmatched_topic_policy: settings.unmatched_topic_policy,
			decode_permits: Semaphore::new(settings.decode_concurrency.max(1)),
		}
	}

	/// Registry the dispatcher routes to.
	pub fn registry(&self) -> &Arc<SubscriberRegistry> {
		&self.registry
	}

	/// Dispatches a message delivered on a destination of the default kind.
	pub async fn dispatch<M>(
		&self,
		message: &M,
	) -> Result<DispatchOutcome, DispatchError>
	where M: InboundMessage {
		self.dispatch_as(message, self.exchange_kind).await
	}

	/// Dispatches a message that must have arrived on a destination of
	/// `exchange_kind`.
	pub async fn dispatch_as<M>(
		&self,
		message: &M,
		exchange_kind: ExchangeKind,
	) -> Result<DispatchOutcome, DispatchError>
	where M: InboundMessage {
		self.route(message, exchange_kind, None).await
	}

	/// Dispatches a message received by the session of `owner`.
	///
	/// The payload type is still resolved from the whole topic, but only
	/// `owner` is invoked: every session receives its own copy of a topic
	/// message, so each subscriber sees it once.
	pub async fn dispatch_to<M>(
		&self,
		message: &M,
		exchange_kind: ExchangeKind,
		owner: SubscriberId,
	) -> Result<DispatchOutcome, DispatchError>
	where M: InboundMessage {
		self.route(message, exchange_kind, Some(owner)).await
	}

	async fn route<M>(
		&self,
		message: &M,
		exchange_kind: ExchangeKind,
		owner: Option<SubscriberId>,
	) -> Result<DispatchOutcome, DispatchError>
	where M: InboundMessage {
		let envelope = EnvelopeExtractor::new(exchange_kind).extract(message)?;
		let topic = envelope.topic;
		let mut handlers = self.registry.resolve(&topic);
		let decoder = handlers.last().cloned();
		if let Some(owner) = owner {
			handlers.retain(|handler| handler.descriptor().id == owner);
		}
		let Some(decoder) = decoder.filter(|_| !handlers.is_empty()) else {
			match self.unmatched_topic_policy {
				| UnmatchedTopicPolicy::Ignore => {
					debug!(topic = %topic, "No subscriber for topic, message dropped")
				}
				| UnmatchedTopicPolicy::Warn => {
					warn!(topic = %topic, "No subscriber for topic, message dropped")
				}
			}
			return Ok(DispatchOutcome::Unmatched { topic });
		};

		let payload = self
			.decode(decoder, topic.clone(), envelope.raw_body)
			.await?;
		let headers = Arc::new(envelope.headers);
		Ok(self.invoke_all(topic, handlers, payload, headers).await)
	}

	async fn decode(
		&self,
		handler: Arc<dyn ErasedHandler>,
		topic: ArcStr,
		body: String,
	) -> Result<DecodedPayload, DispatchError> {
		let payload_type = handler.descriptor().payload_type.name();
		let _permit = self
			.decode_permits
			.acquire()
			.await
			.map_err(|err| DispatchError::Worker(err.to_string()))?;
		tokio::task::spawn_blocking(move || handler.decode(&body))
			.await
			.map_err(|err| DispatchError::Worker(err.to_string()))?
			.map_err(|source| DispatchError::MessageDeserialization {
				topic,
				payload_type,
				source,
			})
	}

	async fn invoke_all(
		&self,
		topic: ArcStr,
		handlers: Vec<Arc<dyn ErasedHandler>>,
		payload: DecodedPayload,
		headers: Arc<Headers>,
	) -> DispatchOutcome {
		let descriptors: Vec<_> = handlers
			.iter()
			.map(|handler| Arc::clone(handler.descriptor()))
			.collect();
		let invocations = handlers.into_iter().map(|handler| {
			let payload = payload.clone();
			let headers = Arc::clone(&headers);
			tokio::spawn(async move { handler.invoke(payload, headers).await })
		});
		let results = join_all(invocations).await;

		let (mut delivered, mut skipped, mut failed) = (0, 0, 0);
		for (descriptor, result) in descriptors.iter().zip(results) {
			let result = result.unwrap_or_else(|join_error| {
				Err(HandlerInvocationError::Panicked(
					match join_error.try_into_panic() {
						| Ok(panic) => panic_message(panic),
						| Err(join_error) => join_error.to_string(),
					},
				))
			});
			match result {
				| Ok(()) => delivered += 1,
				| Err(err @ HandlerInvocationError::PayloadTypeMismatch { .. }) => {
					skipped += 1;
					warn!(
						topic = %topic,
						subscriber_id = %descriptor.id,
						error = %err,
						"Subscriber skipped"
					);
				}
				| Err(err) => {
					failed += 1;
					error!(
						topic = %topic,
						subscriber_id = %descriptor.id,
						payload_type = %descriptor.payload_type,
						error = %err,
						"Subscriber failed to handle message"
					);
				}
			}
		}
		DispatchOutcome::Delivered {
			topic,
			delivered,
			skipped,
			failed,
		}
	}

	async fn process<M>(
		&self,
		message: &M,
		exchange_kind: ExchangeKind,
		owner: Option<SubscriberId>,
	) where M: InboundMessage {
		match self.route(message, exchange_kind, owner).await {
			| Ok(DispatchOutcome::Unmatched { .. }) => {}
			| Ok(DispatchOutcome::Delivered {
				topic,
				delivered,
				skipped,
				failed,
			}) => {
				debug!(topic = %topic, delivered, skipped, failed, "Message dispatched");
			}
			| Err(err) => {
				error!(error = %err, "Failed to dispatch message, message dropped");
			}
		}
	}
}

#[async_trait]
impl<M> MessageListener<M> for Dispatcher
where M: InboundMessage
{
	async fn on_message(&self, message: M) {
		self.process(&message, self.exchange_kind, None).await
	}
}

/// Listener of one session.
///
/// Checks deliveries against the session's destination kind and hands them
/// to the subscriber owning the session.
pub struct SessionListener {
	dispatcher: Arc<Dispatcher>,
	exchange_kind: ExchangeKind,
	owner: SubscriberId,
}

impl SessionListener {
	/// Listener for the session of `owner`, consuming from `exchange_kind`
	/// destinations.
	pub fn new(
		dispatcher: Arc<Dispatcher>,
		exchange_kind: ExchangeKind,
		owner: SubscriberId,
	) -> Self {
		Self {
			dispatcher,
			exchange_kind,
			owner,
		}
	}
}

#[async_trait]
impl<M> MessageListener<M> for SessionListener
where M: InboundMessage
{
	async fn on_message(&self, message: M) {
		self.dispatcher
			.process(&message, self.exchange_kind, Some(self.owner))
			.await
	}
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
	if let Some(message) = panic.downcast_ref::<&str>() {
		(*message).to_string()
	} else if let Some(message) = panic.downcast_ref::<String>() {
		message.clone()
	} else {
		"unknown panic".to_string()
	}
}
