//! Per-subscriber session configuration and handle.

use std::sync::Arc;

use uuid::Uuid;

use crate::broker::{BrokerConnection, TransportError};
use crate::client::config::{BrokerConfig, ConnectionSettings};
use crate::client::subscriber::SubscriberDescriptor;
use crate::message::Destination;

/// Acknowledgement mode of a listening session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AcknowledgeMode {
	/// Broker acknowledges on delivery
	Auto,
	/// Listener acknowledges explicitly
	Client,
	/// Lazy acknowledgement, duplicates allowed
	DupsOk,
	/// Every delivery runs inside a local transaction committed after
	/// the listener returns
	Transacted,
}

/// Everything a broker connection needs to create one consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
	/// Synthetic session name
	pub name: String,
	/// Destination consumed from
	pub destination: Destination,
	/// Acknowledgement mode
	pub acknowledge_mode: AcknowledgeMode,
	/// Client id of the connection
	pub client_id: String,
	/// Durable subscription flag
	pub durable: bool,
	/// Shared subscription flag
	pub shared: bool,
	/// Subscription name
	pub subscription_name: Option<String>,
	/// Durable subscription name
	pub durable_subscription_name: Option<String>,
	/// Connection settings of the session
	pub connection: ConnectionSettings,
}

impl SessionConfig {
	/// Derives the session configuration of `descriptor`.
	///
	/// Subscription flags and names only apply to topic destinations. A
	/// durable subscription with a sub-queue name uses that name as its
	/// client id.
	pub fn for_subscriber(
		descriptor: &SubscriberDescriptor,
		config: &BrokerConfig,
	) -> Self {
		let client_id = descriptor
			.client_id
			.as_deref()
			.filter(|id| !id.trim().is_empty())
			.map(str::to_string)
			.unwrap_or_else(|| generate_client_id(&config.instance_id));

		let mut session = Self {
			name: descriptor.session_name(),
			destination: Destination::new(
				descriptor.topic.clone(),
				descriptor.exchange_kind,
			),
			acknowledge_mode: AcknowledgeMode::Transacted,
			client_id,
			durable: false,
			shared: false,
			subscription_name: None,
			durable_subscription_name: None,
			connection: config.subscriber_settings(descriptor.connection.as_ref()),
		};

		if descriptor.exchange_kind.supports_subscriptions() {
			session.durable = descriptor.durable;
			session.shared = descriptor.shared;
			let sub_queue = descriptor
				.sub_queue
				.as_deref()
				.filter(|name| !name.trim().is_empty());
			if let Some(sub_queue) = sub_queue {
				session.subscription_name = Some(sub_queue.to_string());
				if descriptor.durable {
					session.durable_subscription_name = Some(sub_queue.to_string());
					session.client_id = sub_queue.to_string();
				}
			}
		}
		session
	}
}

/// `<instance_id>_<uuid>`
pub fn generate_client_id(instance_id: &str) -> String {
	format!("{instance_id}_{}", Uuid::new_v4())
}

/// Live listening session bound to exactly one subscriber.
pub struct Session<C> {
	config: SessionConfig,
	descriptor: Arc<SubscriberDescriptor>,
	connection: C,
}

impl<C> Session<C>
where C: BrokerConnection
{
	pub(crate) fn new(
		config: SessionConfig,
		descriptor: Arc<SubscriberDescriptor>,
		connection: C,
	) -> Self {
		Self {
			config,
			descriptor,
			connection,
		}
	}

	/// Session name.
	pub fn name(&self) -> &str {
		&self.config.name
	}

	/// Configuration the session was started with.
	pub fn config(&self) -> &SessionConfig {
		&self.config
	}

	/// Subscriber served by this session.
	pub fn descriptor(&self) -> &Arc<SubscriberDescriptor> {
		&self.descriptor
	}

	/// Releases the consumer and closes the connection.
	pub async fn stop(mut self) -> Result<(), TransportError> {
		self.connection.close().await
	}
}
