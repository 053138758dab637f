//! Typed broker client.

use std::sync::Arc;

use arcstr::ArcStr;
use tracing::{info, warn};

use super::config::BrokerConfig;
use super::error::{BrokerClientError, PublishError};
use super::publisher::{Publisher, TopicPublisher};
use crate::broker::BrokerClient;
use crate::codec::{JsonCodec, MessageCodec};
use crate::connection::ListenerConnection;
use crate::message::{Headers, PublishRequest};
use crate::routing::{SubscriberRegistry, SubscriptionManager};

/// Typed broker client.
///
/// Publishes typed payloads encoded with `C`. Receiving is driven by the
/// [`ListenerConnection`] returned next to the client, which owns one
/// session per registered subscriber.
pub struct TypedClient<B, C = JsonCodec> {
	config: Arc<BrokerConfig>,
	publisher: Publisher<B, C>,
}

impl<B, C> Clone for TypedClient<B, C>
where C: Clone
{
	fn clone(&self) -> Self {
		Self {
			config: Arc::clone(&self.config),
			publisher: self.publisher.clone(),
		}
	}
}

impl<B, C> TypedClient<B, C>
where
	B: BrokerClient,
	C: Default + Clone + Send + Sync + 'static,
{
	/// Validates `config` and starts a session for every subscriber of
	/// `registry`.
	///
	/// Sessions that fail to start are logged and listed in
	/// [`ListenerConnection::start_report`]; they do not fail the call.
	/// An empty registry does.
	pub async fn connect_with_config(
		config: BrokerConfig,
		broker: B,
		registry: SubscriberRegistry,
	) -> Result<(Self, ListenerConnection<B>), BrokerClientError> {
		config.validate()?;
		let broker = Arc::new(broker);
		let mut manager = SubscriptionManager::new(
			Arc::clone(&broker),
			config.clone(),
			Arc::new(registry),
		);
		let report = manager.start_registered().await?;
		if report.is_complete() {
			info!(sessions = report.started.len(), "All subscription sessions started");
		} else {
			warn!(
				started = report.started.len(),
				failed = report.failed.len(),
				"Some subscription sessions failed to start"
			);
		}

		let client = Self::with_broker(config, broker);
		Ok((client, ListenerConnection::new(manager, report)))
	}

	/// Client that only publishes; no session is started.
	pub fn publisher_only(
		config: BrokerConfig,
		broker: B,
	) -> Result<Self, BrokerClientError> {
		config.validate()?;
		Ok(Self::with_broker(config, Arc::new(broker)))
	}

	fn with_broker(config: BrokerConfig, broker: Arc<B>) -> Self {
		let publisher = Publisher::new(broker, C::default(), config.exchange_kind);
		Self {
			config: Arc::new(config),
			publisher,
		}
	}

	/// Configuration the client was created with.
	pub fn config(&self) -> &BrokerConfig {
		&self.config
	}

	/// Untyped publisher sharing this client's broker and codec.
	pub fn publisher(&self) -> &Publisher<B, C> {
		&self.publisher
	}

	/// Publishes `payload` to `topic` with optional headers.
	pub async fn publish<T>(
		&self,
		topic: &str,
		payload: &T,
		headers: Option<&Headers>,
	) -> Result<(), PublishError>
	where C: MessageCodec<T> {
		self.publisher.publish(topic, payload, headers).await
	}

	/// Publishes a prepared request.
	pub async fn publish_request<T>(
		&self,
		request: &PublishRequest<T>,
	) -> Result<(), PublishError>
	where C: MessageCodec<T> {
		self.publisher.publish_request(request).await
	}

	/// Creates a typed publisher for a specific topic.
	///
	/// The topic must not be blank.
	pub fn get_publisher<T>(
		&self,
		topic: impl Into<ArcStr>,
	) -> Result<TopicPublisher<T, B, C>, PublishError>
	where C: MessageCodec<T> {
		self.publisher.for_topic(topic)
	}
}
