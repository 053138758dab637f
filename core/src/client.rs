//! Client facade
//!
//! Configuration, the [`Subscriber`] contract, publishing and the
//! [`TypedClient`] tying them to a broker.

pub mod async_client;
pub mod config;
pub mod error;
pub mod publisher;
pub mod subscriber;

pub use async_client::TypedClient;
pub use config::{
	BrokerConfig, ConnectionOverride, ConnectionSettings, DispatchSettings,
	UnmatchedTopicPolicy,
};
pub use error::{BrokerClientError, ConfigError, PublishError};
pub use publisher::{Publisher, TopicPublisher};
pub use subscriber::{
	PayloadType, Subscriber, SubscriberDescriptor, SubscriberId,
};
