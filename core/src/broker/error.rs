//! Transport error types.

use thiserror::Error;

use crate::message::{ExchangeKind, MessageKind};

/// Boxed error raised by transports and handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors reported by a [`BrokerClient`](super::BrokerClient) implementation.
#[derive(Debug, Error)]
pub enum TransportError {
	/// Connection could not be established or was lost
	#[error("Connection to '{url}' failed: {reason}")]
	Connection {
		/// Broker URL that was used
		url: String,
		/// Broker-specific reason
		reason: String,
	},

	/// Broker rejected the credentials
	#[error("Authentication failed for user '{user}'")]
	Authentication {
		/// User name that was rejected
		user: String,
	},

	/// Destination cannot be used with the requested kind
	#[error("Destination '{name}' is a {actual} but a {expected} was expected")]
	DestinationKind {
		/// Destination name
		name: String,
		/// Kind the caller asked for
		expected: ExchangeKind,
		/// Kind the broker reported
		actual: ExchangeKind,
	},

	/// Operation is not valid for this message body kind
	#[error("Operation not supported for {0}")]
	UnsupportedMessageKind(MessageKind),

	/// Property name is not accepted by the broker
	#[error("Invalid property name '{0}'")]
	InvalidPropertyName(String),

	/// Property could not be read or written
	#[error("Property '{name}' is not accessible: {reason}")]
	Property {
		/// Property name
		name: String,
		/// Broker-specific reason
		reason: String,
	},

	/// Session or connection has already been closed
	#[error("Session '{0}' is closed")]
	Closed(String),

	/// Any other transport failure
	#[error("Transport error: {0}")]
	Other(#[source] BoxError),
}

impl TransportError {
	/// Shorthand for [`TransportError::Connection`].
	pub fn connection(url: impl Into<String>, reason: impl Into<String>) -> Self {
		TransportError::Connection {
			url: url.into(),
			reason: reason.into(),
		}
	}

	/// Shorthand for [`TransportError::Property`].
	pub fn property(name: impl Into<String>, reason: impl Into<String>) -> Self {
		TransportError::Property {
			name: name.into(),
			reason: reason.into(),
		}
	}
}
