//! Routing and subscription error types.

use std::fmt;

use arcstr::ArcStr;
use thiserror::Error;

use crate::broker::{BoxError, TransportError};
use crate::message::MessageKind;

/// Errors while turning a raw message into an envelope
#[derive(Debug, Error)]
pub enum ExtractionError {
	/// Message body is not text
	#[error("Message must be of type '{expected}' but was '{actual}'")]
	MessageTypeMismatch {
		/// Kind the extractor requires
		expected: MessageKind,
		/// Kind the message carries
		actual: MessageKind,
	},

	/// Text body could not be read
	#[error("Failed to read message body: {0}")]
	Body(#[source] TransportError),

	/// Destination could not be read or has the wrong kind
	#[error("Failed to resolve topic name: {0}")]
	TopicResolution(#[source] TransportError),

	/// Property names could not be enumerated
	#[error("Failed to list message properties: {0}")]
	HeaderNames(#[source] TransportError),

	/// A property could not be read
	#[error("Failed to extract header '{name}': {source}")]
	HeaderExtraction {
		/// Property name
		name: String,
		/// Transport error
		#[source]
		source: TransportError,
	},
}

/// Errors terminating the processing of one inbound message
#[derive(Debug, Error)]
pub enum DispatchError {
	/// Envelope extraction failed
	#[error(transparent)]
	Extraction(#[from] ExtractionError),

	/// Body could not be decoded into the resolved payload type
	#[error("Failed to deserialize message on '{topic}' as '{payload_type}': {source}")]
	MessageDeserialization {
		/// Topic of the message
		topic: ArcStr,
		/// Payload type used for decoding
		payload_type: &'static str,
		/// Codec error
		#[source]
		source: BoxError,
	},

	/// Decode worker could not run
	#[error("Decode worker failed: {0}")]
	Worker(String),
}

/// Failure of a single handler invocation; never affects other handlers
#[derive(Debug, Error)]
pub enum HandlerInvocationError {
	/// Decoded value is not the handler's payload type
	#[error("Handler expects '{expected}' but message was decoded as '{actual}'")]
	PayloadTypeMismatch {
		/// Declared payload type of the handler
		expected: &'static str,
		/// Type the message was decoded into
		actual: &'static str,
	},

	/// Handler returned an error
	#[error("Handler failed: {0}")]
	Failed(#[source] BoxError),

	/// Handler panicked
	#[error("Handler panicked: {0}")]
	Panicked(String),
}

/// Errors during subscription startup
#[derive(Debug, Error)]
pub enum SubscriptionError {
	/// Nothing to subscribe
	#[error("No subscribers registered")]
	SubscriberNotFound,

	/// Subscriber declared an empty topic
	#[error("Subscriber '{subscriber}' declares a blank topic")]
	InvalidTopic {
		/// Type name of the subscriber
		subscriber: &'static str,
	},

	/// Session could not connect or start listening
	#[error("Failed to start session '{session}': {source}")]
	StartFailed {
		/// Session name
		session: String,
		/// Transport error
		#[source]
		source: TransportError,
	},
}

/// Sessions that failed to stop; every session was still attempted
#[derive(Debug, Error)]
pub struct ShutdownError {
	/// Session name and the error it returned
	pub failures: Vec<(String, TransportError)>,
}

impl fmt::Display for ShutdownError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} session(s) failed to stop", self.failures.len())?;
		for (session, error) in &self.failures {
			write!(f, "; {session}: {error}")?;
		}
		Ok(())
	}
}
