//! In-process broker.
//!
//! Routes messages between connections of the same [`InMemoryBroker`]
//! without any network I/O. Topic destinations fan out to every
//! subscription (shared subscriptions with the same name count once),
//! queue destinations deliver to a single consumer in round-robin order.
//! Each delivery runs on its own tokio task, the way a real broker client
//! invokes listeners from its own worker threads.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::error::TransportError;
use super::transport::{
	BrokerClient, BrokerConnection, InboundMessage, MessageListener,
	OutgoingMessage,
};
use crate::client::config::ConnectionSettings;
use crate::message::{Destination, ExchangeKind, HeaderValue, MessageKind};
use crate::routing::session::SessionConfig;

/// URL schemes accepted by [`InMemoryBroker::connect`].
const ACCEPTED_SCHEMES: [&str; 3] = ["vm", "tcp", "memory"];

/// Message stored and delivered by the in-memory broker.
#[derive(Debug, Clone, PartialEq)]
pub struct InMemoryMessage {
	kind: MessageKind,
	body: Option<String>,
	destination: Option<Destination>,
	properties: Vec<(String, HeaderValue)>,
	unreadable: HashSet<String>,
	unlistable: bool,
}

impl InMemoryMessage {
	/// Text message with no destination yet.
	pub fn new_text(body: impl Into<String>) -> Self {
		Self {
			kind: MessageKind::Text,
			body: Some(body.into()),
			destination: None,
			properties: Vec::new(),
			unreadable: HashSet::new(),
			unlistable: false,
		}
	}

	/// Text message addressed to `destination`.
	pub fn text(destination: Destination, body: impl Into<String>) -> Self {
		Self::new_text(body).with_destination(destination)
	}

	/// Non-text message of the given kind addressed to `destination`.
	pub fn of_kind(destination: Destination, kind: MessageKind) -> Self {
		Self {
			kind,
			body: None,
			destination: Some(destination),
			properties: Vec::new(),
			unreadable: HashSet::new(),
			unlistable: false,
		}
	}

	/// Sets the destination.
	pub fn with_destination(mut self, destination: Destination) -> Self {
		self.destination = Some(destination);
		self
	}

	/// Adds a property without name validation.
	pub fn with_property(
		mut self,
		name: impl Into<String>,
		value: impl Into<HeaderValue>,
	) -> Self {
		self.put_property(name.into(), value.into());
		self
	}

	/// Adds a property whose reads always fail.
	pub fn with_unreadable_property(mut self, name: impl Into<String>) -> Self {
		let name = name.into();
		self.put_property(name.clone(), HeaderValue::Text(String::new()));
		self.unreadable.insert(name);
		self
	}

	/// Makes listing the property names fail.
	pub fn with_unlistable_properties(mut self) -> Self {
		self.unlistable = true;
		self
	}

	/// Raw text body, if any.
	pub fn body(&self) -> Option<&str> {
		self.body.as_deref()
	}

	/// Properties in insertion order.
	pub fn properties(&self) -> &[(String, HeaderValue)] {
		&self.properties
	}

	fn put_property(&mut self, name: String, value: HeaderValue) {
		match self.properties.iter_mut().find(|(key, _)| *key == name) {
			| Some(entry) => entry.1 = value,
			| None => self.properties.push((name, value)),
		}
	}
}

impl InboundMessage for InMemoryMessage {
	fn kind(&self) -> MessageKind {
		self.kind
	}

	fn text(&self) -> Result<String, TransportError> {
		match (&self.kind, &self.body) {
			| (MessageKind::Text, Some(body)) => Ok(body.clone()),
			| (MessageKind::Text, None) => Ok(String::new()),
			| (kind, _) => Err(TransportError::UnsupportedMessageKind(*kind)),
		}
	}

	fn destination(&self) -> Result<Destination, TransportError> {
		self.destination.clone().ok_or_else(|| {
			TransportError::property("destination", "message has no destination")
		})
	}

	fn property_names(&self) -> Result<Vec<String>, TransportError> {
		if self.unlistable {
			return Err(TransportError::property("*", "property names are unavailable"));
		}
		Ok(self.properties.iter().map(|(name, _)| name.clone()).collect())
	}

	fn property(&self, name: &str) -> Result<HeaderValue, TransportError> {
		if self.unreadable.contains(name) {
			return Err(TransportError::property(name, "property is unreadable"));
		}
		self.properties
			.iter()
			.find(|(key, _)| key == name)
			.map(|(_, value)| value.clone())
			.ok_or_else(|| TransportError::property(name, "no such property"))
	}
}

impl OutgoingMessage for InMemoryMessage {
	fn set_property(
		&mut self,
		name: &str,
		value: HeaderValue,
	) -> Result<(), TransportError> {
		validate_property_name(name)?;
		self.put_property(name.to_string(), value);
		Ok(())
	}
}

/// Property names must be non-blank, free of whitespace and outside the
/// reserved `JMS` header namespace.
fn validate_property_name(name: &str) -> Result<(), TransportError> {
	if name.trim().is_empty()
		|| name.chars().any(char::is_whitespace)
		|| name.starts_with("JMS")
	{
		return Err(TransportError::InvalidPropertyName(name.to_string()));
	}
	Ok(())
}

type Listener = Arc<dyn MessageListener<InMemoryMessage>>;

struct Consumer {
	connection_id: u64,
	session: String,
	destination: Destination,
	shared_name: Option<String>,
	listener: Listener,
}

#[derive(Default)]
struct BrokerState {
	consumers: Vec<Consumer>,
	open_connections: HashSet<u64>,
	rejected_urls: HashSet<String>,
	credentials: Option<(String, String)>,
	record_sent: bool,
	sent: Vec<InMemoryMessage>,
}

#[derive(Default)]
struct Shared {
	state: Mutex<BrokerState>,
	next_connection_id: AtomicU64,
	round_robin: AtomicUsize,
	connects: AtomicUsize,
	sends: AtomicUsize,
}

impl Shared {
	fn lock(&self) -> MutexGuard<'_, BrokerState> {
		// State is only mutated by short, non-panicking critical sections.
		self.state
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
	}
}

/// In-process broker client.
///
/// Cloning yields another handle to the same broker. Sent messages are only
/// retained by a broker created with [`InMemoryBroker::recording`].
#[derive(Clone, Default)]
pub struct InMemoryBroker {
	shared: Arc<Shared>,
}

impl InMemoryBroker {
	/// Creates an empty broker.
	pub fn new() -> Self {
		Self::default()
	}

	/// Creates an empty broker that keeps a copy of every sent message,
	/// see [`InMemoryBroker::sent_messages`].
	pub fn recording() -> Self {
		let broker = Self::new();
		broker.shared.lock().record_sent = true;
		broker
	}

	/// Makes every subsequent connect to `url` fail.
	pub fn reject_url(&self, url: impl Into<String>) {
		self.shared.lock().rejected_urls.insert(url.into());
	}

	/// Requires connections to authenticate with these credentials.
	pub fn require_credentials(
		&self,
		user: impl Into<String>,
		password: impl Into<String>,
	) {
		self.shared.lock().credentials = Some((user.into(), password.into()));
	}

	/// Number of connections currently open.
	pub fn open_connections(&self) -> usize {
		self.shared.lock().open_connections.len()
	}

	/// Total number of successful connects.
	pub fn connect_count(&self) -> usize {
		self.shared.connects.load(Ordering::SeqCst)
	}

	/// Session names of every live consumer.
	pub fn consumer_sessions(&self) -> Vec<String> {
		self.shared
			.lock()
			.consumers
			.iter()
			.map(|consumer| consumer.session.clone())
			.collect()
	}

	/// Number of messages accepted by [`BrokerClient::send`] so far.
	pub fn sent_count(&self) -> usize {
		self.shared.sends.load(Ordering::SeqCst)
	}

	/// Messages accepted by [`BrokerClient::send`] and not yet taken.
	///
	/// Always empty unless the broker was created with
	/// [`InMemoryBroker::recording`].
	pub fn sent_messages(&self) -> Vec<InMemoryMessage> {
		self.shared.lock().sent.clone()
	}

	/// Drains the recorded messages.
	pub fn take_sent_messages(&self) -> Vec<InMemoryMessage> {
		std::mem::take(&mut self.shared.lock().sent)
	}

	/// Delivers a message as-is, bypassing the publishing side.
	///
	/// Useful to feed malformed or non-text messages to listeners.
	/// Returns the number of consumers that received it.
	pub fn inject(&self, message: InMemoryMessage) -> usize {
		match message.destination.clone() {
			| Some(destination) => self.route(&destination, message),
			| None => {
				warn!("Injected message has no destination, dropping");
				0
			}
		}
	}

	fn route(&self, destination: &Destination, message: InMemoryMessage) -> usize {
		let targets = self.select_consumers(destination);
		for listener in &targets {
			let listener = Arc::clone(listener);
			let message = message.clone();
			tokio::spawn(async move { listener.on_message(message).await });
		}
		debug!(
			destination = %destination,
			consumers = targets.len(),
			"Routed in-memory message"
		);
		targets.len()
	}

	fn select_consumers(&self, destination: &Destination) -> Vec<Listener> {
		let state = self.shared.lock();
		let matching: Vec<&Consumer> = state
			.consumers
			.iter()
			.filter(|consumer| consumer.destination == *destination)
			.collect();
		if matching.is_empty() {
			return Vec::new();
		}
		let turn = self.shared.round_robin.fetch_add(1, Ordering::Relaxed);
		match destination.kind {
			| ExchangeKind::Queue => {
				vec![Arc::clone(&matching[turn % matching.len()].listener)]
			}
			| ExchangeKind::Topic => {
				let mut selected = Vec::new();
				let mut groups: HashMap<&str, Vec<&Consumer>> = HashMap::new();
				for consumer in matching {
					match consumer.shared_name.as_deref() {
						| Some(name) => groups.entry(name).or_default().push(consumer),
						| None => selected.push(Arc::clone(&consumer.listener)),
					}
				}
				for members in groups.values() {
					selected.push(Arc::clone(&members[turn % members.len()].listener));
				}
				selected
			}
		}
	}
}

#[async_trait]
impl BrokerClient for InMemoryBroker {
	type Connection = InMemoryConnection;
	type Message = InMemoryMessage;
	type Outgoing = InMemoryMessage;

	async fn connect(
		&self,
		settings: &ConnectionSettings,
	) -> Result<Self::Connection, TransportError> {
		let url = settings.url.as_str();
		let scheme = url.split_once("://").map(|(scheme, _)| scheme);
		if !scheme.is_some_and(|scheme| ACCEPTED_SCHEMES.contains(&scheme)) {
			return Err(TransportError::connection(url, "unsupported broker URL"));
		}
		let mut state = self.shared.lock();
		if state.rejected_urls.contains(url) {
			return Err(TransportError::connection(url, "connection refused"));
		}
		if let Some((user, password)) = &state.credentials {
			let granted = settings.user.as_deref() == Some(user.as_str())
				&& settings.password.as_deref() == Some(password.as_str());
			if !granted {
				return Err(TransportError::Authentication {
					user: settings.user.clone().unwrap_or_default(),
				});
			}
		}
		let id = self.shared.next_connection_id.fetch_add(1, Ordering::SeqCst);
		state.open_connections.insert(id);
		self.shared.connects.fetch_add(1, Ordering::SeqCst);
		debug!(connection_id = id, url = %url, "In-memory connection opened");
		Ok(InMemoryConnection {
			id,
			shared: Arc::clone(&self.shared),
			closed: false,
		})
	}

	fn create_message(&self, body: String) -> Self::Outgoing {
		InMemoryMessage::new_text(body)
	}

	async fn send(
		&self,
		destination: &Destination,
		message: Self::Outgoing,
	) -> Result<(), TransportError> {
		let message = message.with_destination(destination.clone());
		{
			let mut state = self.shared.lock();
			if state.record_sent {
				state.sent.push(message.clone());
			}
		}
		self.shared.sends.fetch_add(1, Ordering::SeqCst);
		self.route(destination, message);
		Ok(())
	}
}

/// Connection opened by [`InMemoryBroker`].
pub struct InMemoryConnection {
	id: u64,
	shared: Arc<Shared>,
	closed: bool,
}

#[async_trait]
impl BrokerConnection for InMemoryConnection {
	type Message = InMemoryMessage;

	async fn listen(
		&mut self,
		config: &SessionConfig,
		listener: Arc<dyn MessageListener<Self::Message>>,
	) -> Result<(), TransportError> {
		if self.closed {
			return Err(TransportError::Closed(config.name.clone()));
		}
		let shared_name = config.shared.then(|| {
			config
				.subscription_name
				.clone()
				.unwrap_or_else(|| config.destination.name.to_string())
		});
		self.shared.lock().consumers.push(Consumer {
			connection_id: self.id,
			session: config.name.clone(),
			destination: config.destination.clone(),
			shared_name,
			listener,
		});
		debug!(session = %config.name, destination = %config.destination, "Consumer registered");
		Ok(())
	}

	async fn close(&mut self) -> Result<(), TransportError> {
		if self.closed {
			return Err(TransportError::Closed(format!("connection-{}", self.id)));
		}
		self.closed = true;
		let mut state = self.shared.lock();
		state.consumers.retain(|consumer| consumer.connection_id != self.id);
		state.open_connections.remove(&self.id);
		debug!(connection_id = self.id, "In-memory connection closed");
		Ok(())
	}
}

impl Drop for InMemoryConnection {
	fn drop(&mut self) {
		if !self.closed {
			let mut state = self.shared.lock();
			state.consumers.retain(|consumer| consumer.connection_id != self.id);
			state.open_connections.remove(&self.id);
		}
	}
}
