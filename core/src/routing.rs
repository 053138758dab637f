//! Inbound message routing and subscription lifecycle
//!
//! Every registered subscriber gets its own listening session. All sessions
//! feed one shared [`Dispatcher`], which extracts the envelope, decodes the
//! body with the type of the topic's last-registered subscriber and hands
//! the value to the subscriber owning the session.

pub mod dispatcher;
pub mod error;
pub mod extractor;
pub mod registry;
pub mod session;
pub mod subscription_manager;

pub use dispatcher::{DispatchOutcome, Dispatcher, SessionListener};
pub use error::{
	DispatchError, ExtractionError, HandlerInvocationError, ShutdownError,
	SubscriptionError,
};
pub use extractor::EnvelopeExtractor;
pub use registry::{
	DecodedPayload, ErasedHandler, RegistryBuilder, SubscriberRegistry,
};
pub use session::{AcknowledgeMode, Session, SessionConfig};
pub use subscription_manager::{StartReport, SubscriptionManager};
