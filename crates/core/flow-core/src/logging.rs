//! Logging bootstrap

use once_cell::sync::OnceCell;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: OnceCell<()> = OnceCell::new();

/// Initialize the global tracing subscriber.
///
/// Level comes from `RUST_LOG` when set, otherwise `FLOW_LOG_LEVEL`
/// (default `info`). Safe to call more than once.
pub fn init_logging() {
    INIT.get_or_init(|| {
        let level = std::env::var("FLOW_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init();
        tracing::debug!("logging initialized");
    });
}
