//! Configuration for broker client initialization

use serde::{Deserialize, Serialize};

use super::error::ConfigError;
use crate::message::ExchangeKind;

/// Environment variable holding the broker URL
pub const ENV_URL: &str = "BROKER_URL";
/// Environment variable holding the broker user
pub const ENV_USER: &str = "BROKER_USER";
/// Environment variable holding the broker password
pub const ENV_PASSWORD: &str = "BROKER_PASSWORD";
/// Environment variable holding the exchange kind (`TOPIC` or `QUEUE`)
pub const ENV_EXCHANGE_KIND: &str = "BROKER_EXCHANGE_KIND";
/// Environment variable holding the process instance id
pub const ENV_INSTANCE_ID: &str = "BROKER_INSTANCE_ID";
/// Environment variable overriding the URL used by subscriptions
pub const ENV_SUBSCRIBER_URL: &str = "BROKER_SUBSCRIBER_URL";
/// Environment variable overriding the user used by subscriptions
pub const ENV_SUBSCRIBER_USER: &str = "BROKER_SUBSCRIBER_USER";
/// Environment variable overriding the password used by subscriptions
pub const ENV_SUBSCRIBER_PASSWORD: &str = "BROKER_SUBSCRIBER_PASSWORD";

const DEFAULT_INSTANCE_ID: &str = "application";

/// Resolved settings used to open one connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSettings {
	/// Broker URL (e.g. `tcp://localhost:61616`)
	pub url: String,
	/// User name, if the broker requires authentication
	pub user: Option<String>,
	/// Password of `user`
	pub password: Option<String>,
}

impl ConnectionSettings {
	/// Anonymous settings for `url`.
	pub fn new(url: impl Into<String>) -> Self {
		Self {
			url: url.into(),
			user: None,
			password: None,
		}
	}

	/// Adds credentials.
	pub fn with_credentials(
		mut self,
		user: impl Into<String>,
		password: impl Into<String>,
	) -> Self {
		self.user = Some(user.into());
		self.password = Some(password.into());
		self
	}
}

/// Partial connection settings layered over the broker defaults.
///
/// Blank fields are ignored so an override only replaces what it sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionOverride {
	/// Replacement URL
	pub url: Option<String>,
	/// Replacement user
	pub user: Option<String>,
	/// Replacement password
	pub password: Option<String>,
}

impl ConnectionOverride {
	/// Override of the URL only.
	pub fn url(url: impl Into<String>) -> Self {
		Self {
			url: Some(url.into()),
			..Self::default()
		}
	}

	/// Override of the credentials only.
	pub fn credentials(
		user: impl Into<String>,
		password: impl Into<String>,
	) -> Self {
		Self {
			user: Some(user.into()),
			password: Some(password.into()),
			..Self::default()
		}
	}

	/// `true` when no field would replace anything.
	pub fn is_empty(&self) -> bool {
		non_blank(&self.url).is_none()
			&& non_blank(&self.user).is_none()
			&& non_blank(&self.password).is_none()
	}

	/// Applies the non-blank fields onto `base`.
	pub fn apply(&self, mut base: ConnectionSettings) -> ConnectionSettings {
		if let Some(url) = non_blank(&self.url) {
			base.url = url.to_string();
		}
		if let Some(user) = non_blank(&self.user) {
			base.user = Some(user.to_string());
		}
		if let Some(password) = non_blank(&self.password) {
			base.password = Some(password.to_string());
		}
		base
	}
}

/// What the dispatcher does with messages on topics nobody subscribed to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchedTopicPolicy {
	/// Drop silently (debug-level trace only)
	#[default]
	Ignore,
	/// Drop and log a warning
	Warn,
}

/// Dispatcher performance and behavior settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
	/// Maximum number of payload decodes running at once (must be > 0)
	pub decode_concurrency: usize,
	/// Handling of messages on unsubscribed topics
	pub unmatched_topic_policy: UnmatchedTopicPolicy,
}

impl Default for DispatchSettings {
	fn default() -> Self {
		Self {
			decode_concurrency: 16,
			unmatched_topic_policy: UnmatchedTopicPolicy::Ignore,
		}
	}
}

/// Configuration for broker client creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConfig {
	/// Broker URL
	pub url: String,
	/// Broker user
	#[serde(default)]
	pub user: Option<String>,
	/// Broker password
	#[serde(default)]
	pub password: Option<String>,
	/// Kind of destination used for publishing and for envelope extraction
	#[serde(default)]
	pub exchange_kind: ExchangeKind,
	/// Identifier of this process, prefix of generated client ids
	#[serde(default = "default_instance_id")]
	pub instance_id: String,
	/// Connection values applied to every subscription session
	#[serde(default)]
	pub subscriber: ConnectionOverride,
	/// Dispatcher settings
	#[serde(default)]
	pub settings: DispatchSettings,
}

fn default_instance_id() -> String {
	DEFAULT_INSTANCE_ID.to_string()
}

impl BrokerConfig {
	/// Config with default settings for `url`.
	pub fn new(url: impl Into<String>) -> Self {
		Self {
			url: url.into(),
			user: None,
			password: None,
			exchange_kind: ExchangeKind::default(),
			instance_id: default_instance_id(),
			subscriber: ConnectionOverride::default(),
			settings: DispatchSettings::default(),
		}
	}

	/// Config for a broker on `localhost:61616`.
	pub fn localhost() -> Self {
		Self::new("tcp://localhost:61616")
	}

	/// Sets broker credentials.
	pub fn with_credentials(
		mut self,
		user: impl Into<String>,
		password: impl Into<String>,
	) -> Self {
		self.user = Some(user.into());
		self.password = Some(password.into());
		self
	}

	/// Sets the exchange kind.
	pub fn with_exchange_kind(mut self, kind: ExchangeKind) -> Self {
		self.exchange_kind = kind;
		self
	}

	/// Sets the process instance id.
	pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
		self.instance_id = instance_id.into();
		self
	}

	/// Sets connection values for every subscription session.
	pub fn with_subscriber_override(mut self, subscriber: ConnectionOverride) -> Self {
		self.subscriber = subscriber;
		self
	}

	/// Sets dispatcher settings.
	pub fn with_settings(mut self, settings: DispatchSettings) -> Self {
		self.settings = settings;
		self
	}

	/// Reads the configuration from process environment variables.
	///
	/// `BROKER_URL` is required; see the `ENV_*` constants for the rest.
	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_lookup(|key| std::env::var(key).ok())
	}

	/// Reads the configuration through an arbitrary key lookup.
	pub fn from_lookup<L>(lookup: L) -> Result<Self, ConfigError>
	where L: Fn(&str) -> Option<String> {
		let url = lookup(ENV_URL).ok_or(ConfigError::Missing(ENV_URL))?;
		let mut config = Self::new(url);
		config.user = lookup(ENV_USER);
		config.password = lookup(ENV_PASSWORD);
		if let Some(kind) = lookup(ENV_EXCHANGE_KIND) {
			config.exchange_kind =
				kind.parse().map_err(|reason| ConfigError::InvalidValue {
					key: ENV_EXCHANGE_KIND,
					reason,
				})?;
		}
		if let Some(instance_id) = lookup(ENV_INSTANCE_ID) {
			config.instance_id = instance_id;
		}
		config.subscriber = ConnectionOverride {
			url: lookup(ENV_SUBSCRIBER_URL),
			user: lookup(ENV_SUBSCRIBER_USER),
			password: lookup(ENV_SUBSCRIBER_PASSWORD),
		};
		config.validate()?;
		Ok(config)
	}

	/// Checks the values required to connect.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.url.trim().is_empty() {
			return Err(ConfigError::Blank("url"));
		}
		if self.instance_id.trim().is_empty() {
			return Err(ConfigError::Blank("instance_id"));
		}
		if self.settings.decode_concurrency == 0 {
			return Err(ConfigError::InvalidValue {
				key: "decode_concurrency",
				reason: "must be greater than 0".to_string(),
			});
		}
		Ok(())
	}

	/// Settings of the publishing connection.
	pub fn connection_settings(&self) -> ConnectionSettings {
		ConnectionSettings {
			url: self.url.clone(),
			user: self.user.clone(),
			password: self.password.clone(),
		}
	}

	/// Settings of a subscription session.
	///
	/// Values are taken from `per_subscriber`, then from the `subscriber`
	/// section, then from the broker defaults.
	pub fn subscriber_settings(
		&self,
		per_subscriber: Option<&ConnectionOverride>,
	) -> ConnectionSettings {
		let settings = self.subscriber.apply(self.connection_settings());
		match per_subscriber {
			| Some(per_subscriber) => per_subscriber.apply(settings),
			| None => settings,
		}
	}
}

fn non_blank(value: &Option<String>) -> Option<&str> {
	value.as_deref().filter(|value| !value.trim().is_empty())
}
