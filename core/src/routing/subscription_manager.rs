//! Session startup and shutdown.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::StreamExt;
use futures::future::join_all;
use futures::stream::FuturesUnordered;
use tracing::{debug, error, info, warn};

use super::dispatcher::{Dispatcher, SessionListener};
use super::error::{ShutdownError, SubscriptionError};
use super::registry::SubscriberRegistry;
use super::session::{Session, SessionConfig};
use crate::broker::{
	BrokerClient, BrokerConnection, MessageListener, TransportError,
};
use crate::client::config::BrokerConfig;
use crate::client::subscriber::SubscriberDescriptor;

/// Result of a [`SubscriptionManager::start_all`] call.
#[derive(Debug, Default)]
pub struct StartReport {
	/// Sessions started by this call
	pub started: Vec<String>,
	/// Sessions that were already running and left untouched
	pub already_active: Vec<String>,
	/// Sessions that failed to start
	pub failed: Vec<SubscriptionError>,
}

impl StartReport {
	/// `true` when every requested session is running.
	pub fn is_complete(&self) -> bool {
		self.failed.is_empty()
	}
}

/// Starts and stops one listening session per subscriber.
///
/// Sessions are keyed by [`SubscriberDescriptor::session_name`], which
/// makes starting idempotent. Each session owns its own connection, so a
/// subscriber that cannot connect never affects the others.
pub struct SubscriptionManager<B>
where B: BrokerClient
{
	broker: Arc<B>,
	config: BrokerConfig,
	dispatcher: Arc<Dispatcher>,
	sessions: BTreeMap<String, Session<B::Connection>>,
}

impl<B> SubscriptionManager<B>
where B: BrokerClient
{
	/// Creates a manager with no running session.
	pub fn new(
		broker: Arc<B>,
		config: BrokerConfig,
		registry: Arc<SubscriberRegistry>,
	) -> Self {
		let dispatcher = Arc::new(Dispatcher::new(
			registry,
			config.exchange_kind,
			&config.settings,
		));
		Self {
			broker,
			config,
			dispatcher,
			sessions: BTreeMap::new(),
		}
	}

	/// Dispatcher shared by every session.
	pub fn dispatcher(&self) -> &Arc<Dispatcher> {
		&self.dispatcher
	}

	/// Starts a session for every subscriber of the registry.
	pub async fn start_registered(&mut self) -> Result<StartReport, SubscriptionError> {
		let descriptors = self.dispatcher.registry().descriptors();
		self.start_all(&descriptors).await
	}

	/// Starts a session for each descriptor that has none yet.
	///
	/// Sessions connect concurrently. A session that fails to start is
	/// listed in [`StartReport::failed`]; only an empty descriptor set is
	/// an error.
	pub async fn start_all(
		&mut self,
		descriptors: &[Arc<SubscriberDescriptor>],
	) -> Result<StartReport, SubscriptionError> {
		if descriptors.is_empty() {
			return Err(SubscriptionError::SubscriberNotFound);
		}

		let mut report = StartReport::default();
		let mut pending = FuturesUnordered::new();
		let mut requested = Vec::with_capacity(descriptors.len());
		for descriptor in descriptors {
			let name = descriptor.session_name();
			if self.sessions.contains_key(&name) || requested.contains(&name) {
				debug!(session = %name, "Session already active");
				report.already_active.push(name);
				continue;
			}
			requested.push(name);
			let config = SessionConfig::for_subscriber(descriptor, &self.config);
			pending.push(self.start_session(config, Arc::clone(descriptor)));
		}

		let mut started = Vec::new();
		while let Some(result) = pending.next().await {
			match result {
				| Ok(session) => started.push(session),
				| Err(err) => {
					error!(error = %err, "Failed to start session");
					report.failed.push(err);
				}
			}
		}
		drop(pending);

		for session in started {
			let name = session.name().to_string();
			report.started.push(name.clone());
			self.sessions.insert(name, session);
		}
		report.started.sort();
		Ok(report)
	}

	async fn start_session(
		&self,
		config: SessionConfig,
		descriptor: Arc<SubscriberDescriptor>,
	) -> Result<Session<B::Connection>, SubscriptionError> {
		let start_failed = |source: TransportError| SubscriptionError::StartFailed {
			session: config.name.clone(),
			source,
		};
		let mut connection = self
			.broker
			.connect(&config.connection)
			.await
			.map_err(start_failed)?;
		let listener: Arc<dyn MessageListener<B::Message>> =
			Arc::new(SessionListener::new(
				Arc::clone(&self.dispatcher),
				config.destination.kind,
				descriptor.id,
			));
		if let Err(err) = connection.listen(&config, listener).await {
			if let Err(close_err) = connection.close().await {
				warn!(
					session = %config.name,
					error = %close_err,
					"Failed to close connection of session that did not start"
				);
			}
			return Err(start_failed(err));
		}
		info!(
			session = %config.name,
			destination = %config.destination,
			client_id = %config.client_id,
			durable = config.durable,
			shared = config.shared,
			"Session started"
		);
		Ok(Session::new(config, descriptor, connection))
	}

	/// Names of the running sessions, sorted.
	pub fn active_sessions(&self) -> Vec<String> {
		self.sessions.keys().cloned().collect()
	}

	/// `true` if a session named `name` is running.
	pub fn is_active(&self, name: &str) -> bool {
		self.sessions.contains_key(name)
	}

	/// Stops one session. Returns `false` if no such session was running.
	pub async fn stop(&mut self, name: &str) -> Result<bool, TransportError> {
		let Some(session) = self.sessions.remove(name) else {
			return Ok(false);
		};
		session.stop().await?;
		info!(session = %name, "Session stopped");
		Ok(true)
	}

	/// Stops every session.
	///
	/// All sessions are attempted even if some fail; the failures are
	/// returned together.
	pub async fn stop_all(&mut self) -> Result<(), ShutdownError> {
		let sessions = std::mem::take(&mut self.sessions);
		let count = sessions.len();
		let stops = sessions.into_iter().map(|(name, session)| async move {
			(name, session.stop().await)
		});

		let failures: Vec<_> = join_all(stops)
			.await
			.into_iter()
			.filter_map(|(name, result)| match result {
				| Ok(()) => None,
				| Err(err) => {
					error!(session = %name, error = %err, "Failed to stop session");
					Some((name, err))
				}
			})
			.collect();

		info!(
			stopped = count - failures.len(),
			failed = failures.len(),
			"Subscription sessions stopped"
		);
		if failures.is_empty() {
			Ok(())
		} else {
			Err(ShutdownError { failures })
		}
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use async_trait::async_trait;
	use serde::{Deserialize, Serialize};
	use tokio::sync::mpsc;

	use super::*;
	use crate::broker::{BoxError, InMemoryBroker, InMemoryMessage};
	use crate::client::config::ConnectionOverride;
	use crate::client::subscriber::Subscriber;
	use crate::codec::JsonCodec;
	use crate::message::{Destination, ExchangeKind, Message};

	#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
	struct Tick {
		n: u32,
	}

	struct TickListener {
		topic: &'static str,
		kind: ExchangeKind,
		connection: Option<ConnectionOverride>,
		tx: mpsc::UnboundedSender<u32>,
	}

	impl TickListener {
		fn new(topic: &'static str, tx: &mpsc::UnboundedSender<u32>) -> Self {
			Self {
				topic,
				kind: ExchangeKind::Topic,
				connection: None,
				tx: tx.clone(),
			}
		}
	}

	#[async_trait]
	impl Subscriber for TickListener {
		type Payload = Tick;

		fn topic(&self) -> &str {
			self.topic
		}

		fn exchange_kind(&self) -> ExchangeKind {
			self.kind
		}

		fn connection(&self) -> Option<ConnectionOverride> {
			self.connection.clone()
		}

		async fn handle(&self, message: Message<Tick>) -> Result<(), BoxError> {
			self.tx.send(message.model.n)?;
			Ok(())
		}
	}

	fn manager(
		broker: &InMemoryBroker,
		config: BrokerConfig,
		subscribers: Vec<TickListener>,
	) -> SubscriptionManager<InMemoryBroker> {
		let mut builder = SubscriberRegistry::builder(JsonCodec::new());
		for subscriber in subscribers {
			builder = builder.register(subscriber).unwrap();
		}
		SubscriptionManager::new(Arc::new(broker.clone()), config, Arc::new(builder.build()))
	}

	fn config() -> BrokerConfig {
		BrokerConfig::new("vm://local")
	}

	#[tokio::test]
	async fn empty_descriptor_set_is_rejected() {
		let broker = InMemoryBroker::new();
		let mut manager = manager(&broker, config(), Vec::new());
		assert!(matches!(
			manager.start_registered().await,
			Err(SubscriptionError::SubscriberNotFound)
		));
	}

	#[tokio::test]
	async fn start_all_is_idempotent() {
		let broker = InMemoryBroker::new();
		let (tx, _rx) = mpsc::unbounded_channel();
		let mut manager = manager(&broker, config(), vec![
			TickListener::new("ticks", &tx),
			TickListener::new("ticks", &tx),
		]);

		let first = manager.start_registered().await.unwrap();
		assert_eq!(first.started, vec!["listener_ticks_0", "listener_ticks_1"]);
		assert!(first.is_complete());

		let second = manager.start_registered().await.unwrap();
		assert!(second.started.is_empty());
		assert_eq!(second.already_active.len(), 2);
		assert_eq!(broker.connect_count(), 2);
		assert_eq!(broker.consumer_sessions().len(), 2);
		assert_eq!(manager.active_sessions().len(), 2);
	}

	#[tokio::test]
	async fn failing_session_does_not_block_others() {
		let broker = InMemoryBroker::new();
		broker.reject_url("vm://down");
		let (tx, _rx) = mpsc::unbounded_channel();
		let mut broken = TickListener::new("broken", &tx);
		broken.connection = Some(ConnectionOverride::url("vm://down"));
		let mut manager = manager(&broker, config(), vec![
			broken,
			TickListener::new("ticks", &tx),
		]);

		let report = manager.start_registered().await.unwrap();
		assert_eq!(report.started, vec!["listener_ticks_1"]);
		assert_eq!(report.failed.len(), 1);
		assert!(matches!(
			&report.failed[0],
			SubscriptionError::StartFailed { session, .. } if session == "listener_broken_0"
		));
		assert_eq!(broker.open_connections(), 1);
	}

	#[tokio::test]
	async fn subscriber_credentials_override_broker_defaults() {
		let broker = InMemoryBroker::new();
		broker.require_credentials("reader", "reader-pass");
		let (tx, _rx) = mpsc::unbounded_channel();
		let config = config()
			.with_credentials("writer", "writer-pass")
			.with_subscriber_override(ConnectionOverride::credentials(
				"reader",
				"reader-pass",
			));
		let mut manager = manager(&broker, config, vec![TickListener::new("ticks", &tx)]);

		let report = manager.start_registered().await.unwrap();
		assert!(report.is_complete());
		assert_eq!(report.started.len(), 1);
	}

	#[tokio::test]
	async fn sessions_deliver_until_stopped() {
		let broker = InMemoryBroker::new();
		let (tx, mut rx) = mpsc::unbounded_channel();
		let mut jobs = TickListener::new("jobs", &tx);
		jobs.kind = ExchangeKind::Queue;
		let mut manager = manager(&broker, config(), vec![
			TickListener::new("ticks", &tx),
			jobs,
		]);
		manager.start_registered().await.unwrap();

		broker.inject(InMemoryMessage::text(Destination::topic("ticks"), r#"{"n":1}"#));
		broker.inject(InMemoryMessage::text(Destination::queue("jobs"), r#"{"n":2}"#));
		let mut received = vec![
			tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap(),
			tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap(),
		];
		received.sort();
		assert_eq!(received, vec![1, 2]);

		assert!(manager.stop("listener_ticks_0").await.unwrap());
		assert!(!manager.stop("listener_ticks_0").await.unwrap());
		assert_eq!(manager.active_sessions(), vec!["listener_jobs_1"]);
		assert_eq!(
			broker.inject(InMemoryMessage::text(Destination::topic("ticks"), "{}")),
			0
		);

		manager.stop_all().await.unwrap();
		assert!(manager.active_sessions().is_empty());
		assert_eq!(broker.open_connections(), 0);
		manager.stop_all().await.unwrap();
	}
}
