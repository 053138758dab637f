//! Listening side of a [`TypedClient`](crate::TypedClient).
//!
//! Owns every subscription session. Kept separate from the client so the
//! publishing handle can be cloned freely while shutdown happens once.

use tracing::{error, info, warn};

use crate::broker::{BrokerClient, TransportError};
use crate::client::error::BrokerClientError;
use crate::routing::{StartReport, SubscriptionManager};

/// Handle owning the subscription sessions.
///
/// Keep it alive while messages should be received and call
/// [`ListenerConnection::shutdown`] when done.
pub struct ListenerConnection<B>
where B: BrokerClient
{
	manager: Option<SubscriptionManager<B>>,
	start_report: StartReport,
}

impl<B> ListenerConnection<B>
where B: BrokerClient
{
	pub(crate) fn new(
		manager: SubscriptionManager<B>,
		start_report: StartReport,
	) -> Self {
		Self {
			manager: Some(manager),
			start_report,
		}
	}

	/// Outcome of the initial session startup.
	pub fn start_report(&self) -> &StartReport {
		&self.start_report
	}

	/// Names of the running sessions.
	pub fn active_sessions(&self) -> Vec<String> {
		self.manager
			.as_ref()
			.map(SubscriptionManager::active_sessions)
			.unwrap_or_default()
	}

	/// Starts sessions for registered subscribers that are not running,
	/// e.g. after a failed startup.
	pub async fn restart_missing(&mut self) -> Result<StartReport, BrokerClientError> {
		let manager = self.manager.as_mut().ok_or_else(|| {
			TransportError::Closed("listener connection".to_string())
		})?;
		Ok(manager.start_registered().await?)
	}

	/// Stops a single session. Returns `false` if it was not running.
	pub async fn stop_session(&mut self, name: &str) -> Result<bool, TransportError> {
		match self.manager.as_mut() {
			| Some(manager) => manager.stop(name).await,
			| None => Ok(false),
		}
	}

	/// Stops every session and closes their connections.
	///
	/// All sessions are attempted; failures are reported together.
	pub async fn shutdown(mut self) -> Result<(), BrokerClientError> {
		let Some(mut manager) = self.manager.take() else {
			warn!("Listener connection already shut down");
			return Ok(());
		};
		manager.stop_all().await?;
		info!("Listener connection shut down");
		Ok(())
	}
}

impl<B> Drop for ListenerConnection<B>
where B: BrokerClient
{
	fn drop(&mut self) {
		if self.manager.is_some() {
			error!(
				"ListenerConnection dropped without calling shutdown(). \
				 Please call shutdown() and await its completion before \
				 dropping."
			);
		}
	}
}
