use std::env;

use typed_broker_client::BrokerConfig;
use typed_broker_client::client::config::ENV_URL;

/// Loads `.env` files in this order, later files overriding earlier ones:
/// 1. demos/.env (committed defaults)
/// 2. demos/.env.local (if exists, ignored by git)
pub fn load_env_files() {
	dotenv::from_filename("demos/.env").ok();
	if std::path::Path::new("demos/.env.local").exists() {
		dotenv::from_filename("demos/.env.local").ok();
	}
}

/// Broker configuration from the environment.
///
/// Falls back to the in-process broker URL when `BROKER_URL` is unset, so
/// every demo runs without external infrastructure.
pub fn broker_config(instance_id: &str) -> BrokerConfig {
	load_env_files();
	if env::var(ENV_URL).is_err() {
		return BrokerConfig::new("vm://demo").with_instance_id(instance_id);
	}
	match BrokerConfig::from_env() {
		| Ok(config) => config,
		| Err(err) => {
			eprintln!("Invalid broker configuration ({err}), using vm://demo");
			BrokerConfig::new("vm://demo").with_instance_id(instance_id)
		}
	}
}
