//! MQTT v5 transport over `rumqttc`.
//!
//! Each listening session opens its own MQTT connection using the session's
//! client id. Deliveries are acknowledged manually once the listener
//! returns, which gives the session its transacted boundary. Message
//! properties travel as MQTT user properties.
//!
//! MQTT has no queues: a queue destination is consumed through a shared
//! subscription named after the queue, so each message reaches one
//! consumer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::mqttbytes::v5::{
	ConnAck, ConnectProperties, ConnectReturnCode, Packet, Publish,
	PublishProperties,
};
use rumqttc::v5::{AsyncClient, Event, EventLoop, MqttOptions};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::error::TransportError;
use super::transport::{
	BrokerClient, BrokerConnection, InboundMessage, MessageListener,
	OutgoingMessage,
};
use crate::client::config::ConnectionSettings;
use crate::message::{Destination, ExchangeKind, HeaderValue, MessageKind};
use crate::routing::session::{SessionConfig, generate_client_id};

const DEFAULT_PORT: u16 = 1883;
const EVENT_LOOP_CAPACITY: usize = 64;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const KEEP_ALIVE: Duration = Duration::from_secs(30);
/// Session expiry requested by durable sessions: never expire.
const DURABLE_SESSION_EXPIRY: u32 = u32::MAX;

/// Message received from an MQTT session.
#[derive(Debug, Clone)]
pub struct MqttInboundMessage {
	destination: Destination,
	payload: Bytes,
	properties: Vec<(String, String)>,
}

impl MqttInboundMessage {
	fn from_publish(publish: &Publish, kind: ExchangeKind) -> Self {
		let topic = String::from_utf8_lossy(&publish.topic).into_owned();
		let properties = publish
			.properties
			.as_ref()
			.map(|properties| properties.user_properties.clone())
			.unwrap_or_default();
		Self {
			destination: Destination::new(topic, kind),
			payload: publish.payload.clone(),
			properties,
		}
	}
}

impl InboundMessage for MqttInboundMessage {
	fn kind(&self) -> MessageKind {
		match std::str::from_utf8(&self.payload) {
			| Ok(_) => MessageKind::Text,
			| Err(_) => MessageKind::Bytes,
		}
	}

	fn text(&self) -> Result<String, TransportError> {
		String::from_utf8(self.payload.to_vec())
			.map_err(|_| TransportError::UnsupportedMessageKind(MessageKind::Bytes))
	}

	fn destination(&self) -> Result<Destination, TransportError> {
		Ok(self.destination.clone())
	}

	fn property_names(&self) -> Result<Vec<String>, TransportError> {
		Ok(self.properties.iter().map(|(name, _)| name.clone()).collect())
	}

	fn property(&self, name: &str) -> Result<HeaderValue, TransportError> {
		self.properties
			.iter()
			.rev()
			.find(|(key, _)| key == name)
			.map(|(_, value)| HeaderValue::Text(value.clone()))
			.ok_or_else(|| TransportError::property(name, "no such user property"))
	}
}

/// Message being prepared for an MQTT publish.
#[derive(Debug, Clone, Default)]
pub struct MqttOutgoingMessage {
	body: String,
	properties: Vec<(String, String)>,
}

impl OutgoingMessage for MqttOutgoingMessage {
	fn set_property(
		&mut self,
		name: &str,
		value: HeaderValue,
	) -> Result<(), TransportError> {
		if name.trim().is_empty() {
			return Err(TransportError::InvalidPropertyName(name.to_string()));
		}
		self.properties.push((name.to_string(), value.to_string()));
		Ok(())
	}
}

/// MQTT v5 broker client.
///
/// Publishing uses one shared connection opened by [`MqttBroker::connect_publisher`];
/// every listening session opens its own.
pub struct MqttBroker {
	client: AsyncClient,
	event_loop: JoinHandle<()>,
}

impl MqttBroker {
	/// Opens the publishing connection.
	pub async fn connect_publisher(
		settings: &ConnectionSettings,
		instance_id: &str,
	) -> Result<Self, TransportError> {
		let options = mqtt_options(settings, &generate_client_id(instance_id))?;
		let (client, event_loop) = AsyncClient::new(options, EVENT_LOOP_CAPACITY);
		let event_loop = establish_connection(&settings.url, event_loop).await?;
		let event_loop = tokio::spawn(run_publisher(event_loop));
		info!(url = %settings.url, "MQTT publisher connected");
		Ok(Self { client, event_loop })
	}

	/// Disconnects the publishing connection.
	pub async fn disconnect(self) -> Result<(), TransportError> {
		self.client.disconnect().await.map_err(transport_error)?;
		if let Err(err) = self.event_loop.await {
			warn!(error = %err, "MQTT publisher event loop task failed");
		}
		Ok(())
	}
}

#[async_trait]
impl BrokerClient for MqttBroker {
	type Connection = MqttConnection;
	type Message = MqttInboundMessage;
	type Outgoing = MqttOutgoingMessage;

	async fn connect(
		&self,
		settings: &ConnectionSettings,
	) -> Result<Self::Connection, TransportError> {
		parse_broker_url(&settings.url)?;
		Ok(MqttConnection {
			settings: settings.clone(),
			session: None,
		})
	}

	fn create_message(&self, body: String) -> Self::Outgoing {
		MqttOutgoingMessage {
			body,
			properties: Vec::new(),
		}
	}

	async fn send(
		&self,
		destination: &Destination,
		message: Self::Outgoing,
	) -> Result<(), TransportError> {
		let properties = PublishProperties {
			user_properties: message.properties,
			..PublishProperties::default()
		};
		self.client
			.publish_with_properties(
				destination.name.to_string(),
				QoS::AtLeastOnce,
				false,
				message.body,
				properties,
			)
			.await
			.map_err(transport_error)
	}
}

struct LiveSession {
	name: String,
	client: AsyncClient,
	event_loop: JoinHandle<()>,
}

/// One MQTT connection serving a single listening session.
///
/// The network connection is opened by [`BrokerConnection::listen`], once
/// the session's client id is known.
pub struct MqttConnection {
	settings: ConnectionSettings,
	session: Option<LiveSession>,
}

#[async_trait]
impl BrokerConnection for MqttConnection {
	type Message = MqttInboundMessage;

	async fn listen(
		&mut self,
		config: &SessionConfig,
		listener: Arc<dyn MessageListener<Self::Message>>,
	) -> Result<(), TransportError> {
		if self.session.is_some() {
			return Err(TransportError::Other(
				format!("session '{}' is already listening", config.name).into(),
			));
		}
		let options = session_options(&self.settings, config)?;
		let (client, event_loop) = AsyncClient::new(options, EVENT_LOOP_CAPACITY);
		let event_loop = establish_connection(&self.settings.url, event_loop).await?;
		let filter = subscription_filter(config);
		client
			.subscribe(filter.clone(), QoS::AtLeastOnce)
			.await
			.map_err(transport_error)?;
		debug!(session = %config.name, filter = %filter, "MQTT subscription requested");

		let event_loop = tokio::spawn(run_session(
			event_loop,
			client.clone(),
			listener,
			SessionRoute {
				session: config.name.clone(),
				filter,
				kind: config.destination.kind,
			},
		));
		self.session = Some(LiveSession {
			name: config.name.clone(),
			client,
			event_loop,
		});
		Ok(())
	}

	async fn close(&mut self) -> Result<(), TransportError> {
		let Some(session) = self.session.take() else {
			return Err(TransportError::Closed(self.settings.url.clone()));
		};
		session.client.disconnect().await.map_err(transport_error)?;
		if let Err(err) = session.event_loop.await {
			warn!(session = %session.name, error = %err, "MQTT event loop task failed");
		}
		Ok(())
	}
}

impl Drop for MqttConnection {
	fn drop(&mut self) {
		if let Some(session) = self.session.take() {
			session.event_loop.abort();
		}
	}
}

fn mqtt_options(
	settings: &ConnectionSettings,
	client_id: &str,
) -> Result<MqttOptions, TransportError> {
	let (host, port) = parse_broker_url(&settings.url)?;
	let mut options = MqttOptions::new(client_id, host, port);
	options.set_keep_alive(KEEP_ALIVE);
	if let Some(user) = settings.user.as_deref() {
		options.set_credentials(user, settings.password.as_deref().unwrap_or_default());
	}
	Ok(options)
}

/// Options of a listening session.
///
/// Durable sessions keep their broker state across disconnects: no clean
/// start and an explicit session expiry interval (a missing one means zero).
fn session_options(
	settings: &ConnectionSettings,
	config: &SessionConfig,
) -> Result<MqttOptions, TransportError> {
	let mut options = mqtt_options(settings, &config.client_id)?;
	options.set_clean_start(!config.durable);
	options.set_manual_acks(true);
	if config.durable {
		options.set_connect_properties(ConnectProperties {
			session_expiry_interval: Some(DURABLE_SESSION_EXPIRY),
			..ConnectProperties::default()
		});
	}
	Ok(options)
}

/// `mqtt://host[:port]` or `tcp://host[:port]`.
fn parse_broker_url(url: &str) -> Result<(String, u16), TransportError> {
	let rest = url
		.strip_prefix("mqtt://")
		.or_else(|| url.strip_prefix("tcp://"))
		.ok_or_else(|| TransportError::connection(url, "unsupported broker URL"))?;
	let authority = rest.split(['/', '?']).next().unwrap_or_default();
	let (host, port) = match authority.rsplit_once(':') {
		| Some((host, port)) => {
			let port = port
				.parse()
				.map_err(|_| TransportError::connection(url, "invalid port"))?;
			(host, port)
		}
		| None => (authority, DEFAULT_PORT),
	};
	if host.is_empty() {
		return Err(TransportError::connection(url, "missing host"));
	}
	Ok((host.to_string(), port))
}

fn subscription_filter(config: &SessionConfig) -> String {
	let topic = &config.destination.name;
	let group = match config.destination.kind {
		| ExchangeKind::Queue => Some(topic.to_string()),
		| ExchangeKind::Topic if config.shared => Some(
			config
				.subscription_name
				.clone()
				.unwrap_or_else(|| topic.to_string()),
		),
		| ExchangeKind::Topic => None,
	};
	match group {
		| Some(group) => format!("$share/{}/{topic}", group.replace(['/', '+', '#'], "_")),
		| None => topic.to_string(),
	}
}

async fn establish_connection(
	url: &str,
	mut event_loop: EventLoop,
) -> Result<EventLoop, TransportError> {
	let handshake = async {
		loop {
			match event_loop.poll().await {
				| Ok(Event::Incoming(Packet::ConnAck(ack))) => {
					if ack.code == ConnectReturnCode::Success {
						return Ok(());
					}
					return Err(TransportError::connection(
						url,
						format!("broker rejected connection: {:?}", ack.code),
					));
				}
				| Ok(event) => debug!(event = ?event, "MQTT bootstrap event"),
				| Err(err) => return Err(TransportError::connection(url, err.to_string())),
			}
		}
	};
	tokio::time::timeout(CONNECT_TIMEOUT, handshake)
		.await
		.map_err(|_| TransportError::connection(url, "connection timed out"))??;
	Ok(event_loop)
}

async fn run_publisher(mut event_loop: EventLoop) {
	loop {
		match event_loop.poll().await {
			| Ok(Event::Outgoing(rumqttc::Outgoing::Disconnect)) => break,
			| Ok(Event::Incoming(Packet::Disconnect(_))) => {
				info!("MQTT publisher disconnected by broker");
				break;
			}
			| Ok(_) => {}
			| Err(err) => {
				error!(error = %err, "MQTT publisher event loop error");
				tokio::time::sleep(Duration::from_secs(1)).await;
			}
		}
	}
}

/// Whether a reconnect left the session without its subscription.
fn needs_resubscribe(ack: &ConnAck) -> bool {
	ack.code == ConnectReturnCode::Success && !ack.session_present
}

/// What the event loop of a session needs to route and restore deliveries.
struct SessionRoute {
	session: String,
	filter: String,
	kind: ExchangeKind,
}

impl SessionRoute {
	/// Filter to subscribe again after `ack`, if the broker lost it.
	fn resubscription(&self, ack: &ConnAck) -> Option<&str> {
		needs_resubscribe(ack).then_some(self.filter.as_str())
	}
}

async fn run_session(
	mut event_loop: EventLoop,
	client: AsyncClient,
	listener: Arc<dyn MessageListener<MqttInboundMessage>>,
	route: SessionRoute,
) {
	let session = route.session.clone();
	loop {
		match event_loop.poll().await {
			| Ok(Event::Incoming(Packet::ConnAck(ack))) => {
				if ack.code != ConnectReturnCode::Success {
					warn!(session = %session, code = ?ack.code, "MQTT reconnect rejected by broker");
				} else if let Some(filter) = route.resubscription(&ack) {
					info!(
						session = %session,
						filter = %filter,
						"MQTT session reconnected without broker session, resubscribing"
					);
					let _ = client
						.try_subscribe(filter, QoS::AtLeastOnce)
						.inspect_err(|err| {
							error!(session = %session, error = ?err, "Failed to resubscribe MQTT session");
						});
				} else {
					info!(session = %session, "MQTT session reconnected with broker session preserved");
				}
			}
			| Ok(Event::Incoming(Packet::Publish(publish))) => {
				let message = MqttInboundMessage::from_publish(&publish, route.kind);
				let listener = Arc::clone(&listener);
				let client = client.clone();
				let session = session.clone();
				tokio::spawn(async move {
					listener.on_message(message).await;
					if let Err(err) = client.ack(&publish).await {
						error!(session = %session, error = %err, "Failed to acknowledge MQTT message");
					}
				});
			}
			| Ok(Event::Outgoing(rumqttc::Outgoing::Disconnect)) => {
				debug!(session = %session, "MQTT session disconnected");
				break;
			}
			| Ok(Event::Incoming(Packet::Disconnect(_))) => {
				warn!(session = %session, "MQTT session disconnected by broker");
				break;
			}
			| Ok(_) => {}
			| Err(err) => {
				error!(session = %session, error = %err, "MQTT session event loop error");
				tokio::time::sleep(Duration::from_secs(1)).await;
			}
		}
	}
}

fn transport_error(err: impl std::fmt::Display) -> TransportError {
	TransportError::Other(err.to_string().into())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::client::config::BrokerConfig;
	use crate::client::subscriber::{PayloadType, SubscriberDescriptor, SubscriberId};

	#[test]
	fn parses_broker_urls() {
		assert_eq!(
			parse_broker_url("mqtt://broker:1884").unwrap(),
			("broker".to_string(), 1884)
		);
		assert_eq!(
			parse_broker_url("tcp://localhost").unwrap(),
			("localhost".to_string(), DEFAULT_PORT)
		);
		assert!(parse_broker_url("http://broker").is_err());
		assert!(parse_broker_url("mqtt://:1883").is_err());
		assert!(parse_broker_url("mqtt://broker:port").is_err());
	}

	#[test]
	fn shared_and_queue_sessions_use_shared_filters() {
		let mut descriptor = SubscriberDescriptor {
			id: SubscriberId(0),
			topic: "sensors/temp".into(),
			payload_type: PayloadType::of::<String>(),
			exchange_kind: ExchangeKind::Topic,
			durable: false,
			shared: false,
			sub_queue: None,
			client_id: None,
			connection: None,
		};
		let config = BrokerConfig::new("mqtt://localhost");
		let plain = SessionConfig::for_subscriber(&descriptor, &config);
		assert_eq!(subscription_filter(&plain), "sensors/temp");

		descriptor.shared = true;
		descriptor.sub_queue = Some("workers".into());
		let shared = SessionConfig::for_subscriber(&descriptor, &config);
		assert_eq!(subscription_filter(&shared), "$share/workers/sensors/temp");

		descriptor.exchange_kind = ExchangeKind::Queue;
		let queue = SessionConfig::for_subscriber(&descriptor, &config);
		assert_eq!(subscription_filter(&queue), "$share/sensors_temp/sensors/temp");
	}

	fn descriptor(durable: bool) -> SubscriberDescriptor {
		SubscriberDescriptor {
			id: SubscriberId(3),
			topic: "invoices".into(),
			payload_type: PayloadType::of::<String>(),
			exchange_kind: ExchangeKind::Topic,
			durable,
			shared: false,
			sub_queue: Some("archive".into()),
			client_id: None,
			connection: None,
		}
	}

	fn session_expiry(options: &MqttOptions) -> Option<u32> {
		options
			.connect_properties()
			.and_then(|properties| properties.session_expiry_interval)
	}

	#[test]
	fn durable_sessions_outlive_disconnects() {
		let config = BrokerConfig::new("mqtt://localhost");

		let durable = SessionConfig::for_subscriber(&descriptor(true), &config);
		let options = session_options(&durable.connection, &durable).unwrap();
		assert!(!options.clean_start());
		assert!(options.manual_acks());
		assert_eq!(session_expiry(&options), Some(DURABLE_SESSION_EXPIRY));
		assert_eq!(options.client_id(), "archive");

		let transient = SessionConfig::for_subscriber(&descriptor(false), &config);
		let options = session_options(&transient.connection, &transient).unwrap();
		assert!(options.clean_start());
		assert_eq!(session_expiry(&options), None);
	}

	#[test]
	fn reconnect_without_session_resubscribes() {
		let ack = |session_present, code| ConnAck {
			session_present,
			code,
			properties: None,
		};
		assert!(needs_resubscribe(&ack(false, ConnectReturnCode::Success)));
		assert!(!needs_resubscribe(&ack(true, ConnectReturnCode::Success)));
		assert!(!needs_resubscribe(&ack(false, ConnectReturnCode::NotAuthorized)));
	}

	#[test]
	fn session_route_resubscribes_its_filter() {
		let route = SessionRoute {
			session: "listener_invoices_3".into(),
			filter: "$share/archive/invoices".into(),
			kind: ExchangeKind::Topic,
		};
		let lost = ConnAck {
			session_present: false,
			code: ConnectReturnCode::Success,
			properties: None,
		};
		assert_eq!(route.resubscription(&lost), Some("$share/archive/invoices"));

		let kept = ConnAck {
			session_present: true,
			..lost
		};
		assert_eq!(route.resubscription(&kept), None);
	}

	#[test]
	fn user_properties_become_text_headers() {
		let message = MqttInboundMessage {
			destination: Destination::topic("orders"),
			payload: Bytes::from_static(b"{}"),
			properties: vec![("trace-id".into(), "abc".into())],
		};
		assert_eq!(message.kind(), MessageKind::Text);
		assert_eq!(message.property("trace-id").unwrap(), HeaderValue::from("abc"));
		assert!(message.property("missing").is_err());

		let binary = MqttInboundMessage {
			payload: Bytes::from_static(&[0xff, 0xfe]),
			..message
		};
		assert_eq!(binary.kind(), MessageKind::Bytes);
		assert!(binary.text().is_err());
	}
}
