//! Configuration Module
//!
//! Configuration loading for the exchange and the broker relay.

mod settings;

pub use settings::{
    ConfigError, ExchangeConfig, FeedSettings, ReconnectSettings, RelayConfig, ServerSettings,
};

/// Load a `.env` file from the current directory or the nearest ancestor
/// that has one. A missing file is not an error.
pub fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let Ok(cwd) = std::env::current_dir() else {
        return;
    };
    for dir in cwd.ancestors().skip(1) {
        let env_path = dir.join(".env");
        if env_path.exists() {
            let _ = dotenvy::from_path(&env_path);
            return;
        }
    }
}
