use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Installs a compact `fmt` subscriber.
///
/// Priority (first match wins):
/// 1. `RUST_LOG_DISABLE` set: no tracing at all
/// 2. `force_level`, if provided
/// 3. `RUST_LOG` set: environment filter
/// 4. otherwise silent
///
/// ```bash
/// RUST_LOG=typed_broker_client_core=debug cargo run --example 000_hello_world
/// RUST_LOG_DISABLE=1 cargo run --example 000_hello_world
/// ```
pub fn setup(force_level: Option<&str>) {
	super::config::load_env_files();

	if std::env::var("RUST_LOG_DISABLE").is_ok() {
		return;
	}

	let filter = match force_level {
		| Some(level) => tracing_subscriber::EnvFilter::new(level),
		| None if std::env::var("RUST_LOG").is_ok() => {
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| "info".into())
		}
		| None => return,
	};

	tracing_subscriber::registry()
		.with(filter)
		.with(
			tracing_subscriber::fmt::layer()
				.with_target(true)
				.with_file(false)
				.with_line_number(false)
				.compact(),
		)
		.init();
}
