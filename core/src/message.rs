//! Message model shared by the publisher, the extractor and the dispatcher.

use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use arcstr::ArcStr;
use serde::{Deserialize, Serialize};

/// Header (message property) map carried by every message.
pub type Headers = HashMap<String, HeaderValue>;

/// Value of a single message property.
///
/// Mirrors the primitive property types a broker message can carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
	/// Boolean property
	Bool(bool),
	/// Integral property (byte, short, int and long all widen to this)
	Int(i64),
	/// Floating point property
	Double(f64),
	/// String property
	Text(String),
}

impl HeaderValue {
	/// Returns the string content if this is a text property.
	pub fn as_str(&self) -> Option<&str> {
		match self {
			| HeaderValue::Text(value) => Some(value),
			| _ => None,
		}
	}

	/// Returns the integer content if this is an integral property.
	pub fn as_i64(&self) -> Option<i64> {
		match self {
			| HeaderValue::Int(value) => Some(*value),
			| _ => None,
		}
	}

	/// Returns the boolean content if this is a boolean property.
	pub fn as_bool(&self) -> Option<bool> {
		match self {
			| HeaderValue::Bool(value) => Some(*value),
			| _ => None,
		}
	}
}

impl fmt::Display for HeaderValue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			| HeaderValue::Bool(value) => write!(f, "{value}"),
			| HeaderValue::Int(value) => write!(f, "{value}"),
			| HeaderValue::Double(value) => write!(f, "{value}"),
			| HeaderValue::Text(value) => f.write_str(value),
		}
	}
}

impl From<&str> for HeaderValue {
	fn from(value: &str) -> Self {
		HeaderValue::Text(value.to_string())
	}
}

impl From<String> for HeaderValue {
	fn from(value: String) -> Self {
		HeaderValue::Text(value)
	}
}

impl From<bool> for HeaderValue {
	fn from(value: bool) -> Self {
		HeaderValue::Bool(value)
	}
}

impl From<i32> for HeaderValue {
	fn from(value: i32) -> Self {
		HeaderValue::Int(i64::from(value))
	}
}

impl From<i64> for HeaderValue {
	fn from(value: i64) -> Self {
		HeaderValue::Int(value)
	}
}

impl From<f64> for HeaderValue {
	fn from(value: f64) -> Self {
		HeaderValue::Double(value)
	}
}

/// Kind of destination a message travels through.
#[derive(
	Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExchangeKind {
	/// Point-to-point: each message is consumed by one listener.
	Queue,
	/// Broadcast: every subscription receives each message.
	#[default]
	Topic,
}

impl ExchangeKind {
	/// Durable and shared subscriptions only exist for broadcast destinations.
	pub fn supports_subscriptions(self) -> bool {
		matches!(self, ExchangeKind::Topic)
	}
}

impl fmt::Display for ExchangeKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			| ExchangeKind::Queue => f.write_str("QUEUE"),
			| ExchangeKind::Topic => f.write_str("TOPIC"),
		}
	}
}

impl std::str::FromStr for ExchangeKind {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_uppercase().as_str() {
			| "QUEUE" => Ok(ExchangeKind::Queue),
			| "TOPIC" => Ok(ExchangeKind::Topic),
			| other => Err(format!("unknown exchange kind '{other}'")),
		}
	}
}

/// A named destination together with its kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
	/// Destination name (topic or queue name)
	pub name: ArcStr,
	/// Whether the destination is a queue or a topic
	pub kind: ExchangeKind,
}

impl Destination {
	/// Creates a destination.
	pub fn new(name: impl Into<ArcStr>, kind: ExchangeKind) -> Self {
		Self {
			name: name.into(),
			kind,
		}
	}

	/// Topic-kind destination.
	pub fn topic(name: impl Into<ArcStr>) -> Self {
		Self::new(name, ExchangeKind::Topic)
	}

	/// Queue-kind destination.
	pub fn queue(name: impl Into<ArcStr>) -> Self {
		Self::new(name, ExchangeKind::Queue)
	}
}

impl fmt::Display for Destination {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}://{}", self.kind, self.name)
	}
}

/// Kind of payload an inbound broker message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
	/// Text payload
	Text,
	/// Opaque byte payload
	Bytes,
	/// Key-value payload
	Map,
	/// Serialized object payload
	Object,
	/// Stream of primitive values
	Stream,
}

impl fmt::Display for MessageKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			| MessageKind::Text => "TextMessage",
			| MessageKind::Bytes => "BytesMessage",
			| MessageKind::Map => "MapMessage",
			| MessageKind::Object => "ObjectMessage",
			| MessageKind::Stream => "StreamMessage",
		};
		f.write_str(name)
	}
}

/// Extracted view of one inbound delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEnvelope {
	/// Topic the message was delivered on
	pub topic: ArcStr,
	/// Undecoded text body
	pub raw_body: String,
	/// All message properties
	pub headers: Headers,
}

/// Outbound publish request.
#[derive(Debug, Clone)]
pub struct PublishRequest<T> {
	/// Target topic
	pub topic: ArcStr,
	/// Payload to encode
	pub payload: T,
	/// Headers to apply onto the outgoing message
	pub headers: Headers,
}

impl<T> PublishRequest<T> {
	/// Request without headers.
	pub fn new(topic: impl Into<ArcStr>, payload: T) -> Self {
		Self {
			topic: topic.into(),
			payload,
			headers: Headers::new(),
		}
	}

	/// Adds a header to the request.
	pub fn with_header(
		mut self,
		name: impl Into<String>,
		value: impl Into<HeaderValue>,
	) -> Self {
		self.headers.insert(name.into(), value.into());
		self
	}
}

/// Typed message handed to a subscriber.
///
/// The decoded model is shared between every handler bound to the topic,
/// so both parts are reference counted.
#[derive(Debug)]
pub struct Message<T> {
	/// Decoded payload
	pub model: Arc<T>,
	/// Message properties
	pub headers: Arc<Headers>,
}

impl<T> Message<T> {
	/// Creates a message from its parts.
	pub fn new(model: Arc<T>, headers: Arc<Headers>) -> Self {
		Self { model, headers }
	}

	/// Looks up a header by name.
	pub fn header(&self, name: &str) -> Option<&HeaderValue> {
		self.headers.get(name)
	}
}

impl<T> Clone for Message<T> {
	fn clone(&self) -> Self {
		Self {
			model: Arc::clone(&self.model),
			headers: Arc::clone(&self.headers),
		}
	}
}

impl<T> Deref for Message<T> {
	type Target = T;

	fn deref(&self) -> &T {
		&self.model
	}
}
