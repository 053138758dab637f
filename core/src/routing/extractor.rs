//! Raw inbound message to [`MessageEnvelope`].

use arcstr::ArcStr;

use super::error::ExtractionError;
use crate::broker::{InboundMessage, TransportError};
use crate::message::{ExchangeKind, Headers, MessageEnvelope, MessageKind};

/// Reads topic, body and headers out of a delivered message.
#[derive(Debug, Clone, Copy)]
pub struct EnvelopeExtractor {
	exchange_kind: ExchangeKind,
}

impl EnvelopeExtractor {
	/// Extractor accepting destinations of `exchange_kind`.
	pub fn new(exchange_kind: ExchangeKind) -> Self {
		Self { exchange_kind }
	}

	/// Destination kind messages must arrive on.
	pub fn exchange_kind(&self) -> ExchangeKind {
		self.exchange_kind
	}

	/// Extracts the envelope.
	///
	/// The three parts are read independently; when several fail, the
	/// topic error wins over the body error, which wins over the header
	/// error. Header extraction is all-or-nothing.
	pub fn extract<M>(&self, message: &M) -> Result<MessageEnvelope, ExtractionError>
	where M: InboundMessage {
		let topic = self.topic(message);
		let body = body(message);
		let headers = headers(message);
		Ok(MessageEnvelope {
			topic: topic?,
			raw_body: body?,
			headers: headers?,
		})
	}

	fn topic<M>(&self, message: &M) -> Result<ArcStr, ExtractionError>
	where M: InboundMessage {
		let destination = message
			.destination()
			.map_err(ExtractionError::TopicResolution)?;
		if destination.kind != self.exchange_kind {
			return Err(ExtractionError::TopicResolution(
				TransportError::DestinationKind {
					name: destination.name.to_string(),
					expected: self.exchange_kind,
					actual: destination.kind,
				},
			));
		}
		Ok(destination.name)
	}
}

fn body<M>(message: &M) -> Result<String, ExtractionError>
where M: InboundMessage {
	match message.kind() {
		| MessageKind::Text => message.text().map_err(ExtractionError::Body),
		| actual => Err(ExtractionError::MessageTypeMismatch {
			expected: MessageKind::Text,
			actual,
		}),
	}
}

fn headers<M>(message: &M) -> Result<Headers, ExtractionError>
where M: InboundMessage {
	let names = message
		.property_names()
		.map_err(ExtractionError::HeaderNames)?;
	names
		.into_iter()
		.map(|name| match message.property(&name) {
			| Ok(value) => Ok((name, value)),
			| Err(source) => Err(ExtractionError::HeaderExtraction { name, source }),
		})
		.collect()
}
