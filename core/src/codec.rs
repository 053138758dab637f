//! Payload codecs.
//!
//! Broker messages carry their payload as text, so codecs encode to and
//! decode from `String`/`&str`.

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Trait for encoding and decoding message payloads.
///
/// Implement this trait to plug in a custom wire format.
pub trait MessageCodec<T>: Default + Clone + Send + Sync + 'static {
	/// Error type for encoding failures
	type EncodeError: std::error::Error + Send + Sync + 'static;
	/// Error type for decoding failures
	type DecodeError: std::error::Error + Send + Sync + 'static;

	/// Convert a payload into its text representation
	fn encode(&self, data: &T) -> Result<String, Self::EncodeError>;
	/// Convert a text body into a typed payload
	fn decode(&self, body: &str) -> Result<T, Self::DecodeError>;
}

/// Default codec using JSON.
///
/// Date/time types round-trip through their serde representation
/// (RFC 3339 strings for `chrono`), never as numeric timestamps.
#[derive(Clone, Default, Debug)]
pub struct JsonCodec {
	pretty: bool,
}

impl JsonCodec {
	/// Creates a compact JSON codec.
	pub fn new() -> Self {
		Self::default()
	}

	/// Creates a codec emitting indented JSON.
	pub fn pretty() -> Self {
		Self { pretty: true }
	}
}

impl<T> MessageCodec<T> for JsonCodec
where T: Serialize + DeserializeOwned + 'static
{
	type DecodeError = serde_json::Error;
	type EncodeError = serde_json::Error;

	fn encode(&self, data: &T) -> Result<String, Self::EncodeError> {
		if self.pretty {
			serde_json::to_string_pretty(data)
		} else {
			serde_json::to_string(data)
		}
	}

	fn decode(&self, body: &str) -> Result<T, Self::DecodeError> {
		serde_json::from_str(body)
	}
}

/// Codec using RON (Rusty Object Notation).
#[cfg(feature = "ron")]
#[derive(Clone, Default, Debug)]
pub struct RonCodec;

#[cfg(feature = "ron")]
impl<T> MessageCodec<T> for RonCodec
where T: Serialize + DeserializeOwned + 'static
{
	type DecodeError = ron::error::SpannedError;
	type EncodeError = ron::Error;

	fn encode(&self, data: &T) -> Result<String, Self::EncodeError> {
		ron::to_string(data)
	}

	fn decode(&self, body: &str) -> Result<T, Self::DecodeError> {
		ron::from_str(body)
	}
}

#[cfg(test)]
mod tests {
	use std::collections::BTreeMap;

	use chrono::{DateTime, NaiveDate, Utc};
	use serde::Deserialize;

	use super::*;

	#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
	struct Address {
		city: String,
		zip: Option<String>,
	}

	#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
	struct Customer {
		id: u64,
		name: String,
		tags: Vec<String>,
		address: Address,
		attributes: BTreeMap<String, i32>,
		registered_at: DateTime<Utc>,
		birthday: NaiveDate,
	}

	fn round_trip<T, C>(codec: &C, value: &T) -> T
	where C: MessageCodec<T> {
		let text = codec.encode(value).unwrap();
		codec.decode(&text).unwrap()
	}

	#[test]
	fn json_round_trips_primitives() {
		let codec = JsonCodec::new();
		assert_eq!(round_trip(&codec, &42_i64), 42);
		assert!(round_trip(&codec, &true));
		assert_eq!(round_trip(&codec, &"text".to_string()), "text");
		assert_eq!(round_trip(&codec, &1.25_f64), 1.25);
	}

	#[test]
	fn json_round_trips_nested_objects_with_dates() {
		let customer = Customer {
			id: 7,
			name: "Ada".into(),
			tags: vec!["vip".into()],
			address: Address {
				city: "Tashkent".into(),
				zip: None,
			},
			attributes: BTreeMap::from([("score".to_string(), 10)]),
			registered_at: "2024-03-01T10:15:30Z".parse().unwrap(),
			birthday: NaiveDate::from_ymd_opt(1990, 5, 17).unwrap(),
		};
		let codec = JsonCodec::pretty();
		assert_eq!(round_trip(&codec, &customer), customer);
	}

	#[test]
	fn json_writes_dates_as_text() {
		let date: DateTime<Utc> = "2024-03-01T10:15:30Z".parse().unwrap();
		let text = JsonCodec::new().encode(&date).unwrap();
		assert_eq!(text, "\"2024-03-01T10:15:30Z\"");
	}

	#[test]
	fn json_decode_reports_malformed_body() {
		let result: Result<Address, _> = JsonCodec::new().decode("{\"city\":");
		assert!(result.is_err());
	}

	#[cfg(feature = "ron")]
	#[test]
	fn ron_round_trips_nested_objects() {
		let address = Address {
			city: "Samarkand".into(),
			zip: Some("140100".into()),
		};
		assert_eq!(round_trip(&RonCodec, &address), address);
	}
}
