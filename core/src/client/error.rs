//! Client error types.

use thiserror::Error;

use crate::broker::{BoxError, TransportError};
use crate::routing::error::{DispatchError, ShutdownError, SubscriptionError};

/// Invalid or missing configuration values
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Required key is absent
	#[error("Missing configuration value '{0}'")]
	Missing(&'static str),

	/// Required value is empty or whitespace
	#[error("Configuration value '{0}' must not be blank")]
	Blank(&'static str),

	/// Value present but unusable
	#[error("Invalid configuration value '{key}': {reason}")]
	InvalidValue {
		/// Configuration key
		key: &'static str,
		/// Why the value was rejected
		reason: String,
	},
}

/// Errors returned by a publish call
#[derive(Debug, Error)]
pub enum PublishError {
	/// Topic is empty or whitespace
	#[error("Topic must not be blank")]
	InvalidTopic,

	/// Payload could not be encoded
	#[error("Serialization error for '{payload_type}': {source}")]
	Serialization {
		/// Type name of the payload
		payload_type: &'static str,
		/// Codec error
		#[source]
		source: BoxError,
	},

	/// A header could not be applied; nothing was sent
	#[error("Failed to apply header '{name}': {source}")]
	HeaderApplication {
		/// Header name
		name: String,
		/// Transport error raised while setting the property
		#[source]
		source: TransportError,
	},

	/// Broker client refused the send
	#[error("Send failed: {0}")]
	Transport(#[from] TransportError),
}

/// Errors that can occur in broker client operations
#[derive(Debug, Error)]
pub enum BrokerClientError {
	/// Configuration errors
	#[error("Configuration error: {0}")]
	Config(#[from] ConfigError),

	/// Subscription startup errors
	#[error("Subscription error: {0}")]
	Subscription(#[from] SubscriptionError),

	/// Publish errors
	#[error("Publish error: {0}")]
	Publish(#[from] PublishError),

	/// Inbound dispatch errors
	#[error("Dispatch error: {0}")]
	Dispatch(#[from] DispatchError),

	/// Transport errors
	#[error("Transport error: {0}")]
	Transport(#[from] TransportError),

	/// Sessions that failed to stop during shutdown
	#[error("Shutdown error: {0}")]
	Shutdown(#[from] ShutdownError),
}
