//! Tracing setup shared by the ScriptVM binaries.

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::SubscriberBuilder;

static INIT: OnceCell<()> = OnceCell::new();

/// Installs the global subscriber once. `RUST_LOG` wins over `default_level`.
pub fn init(default_level: &str) {
    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(default_level))
            .unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = SubscriberBuilder::default()
            .with_env_filter(filter)
            .with_target(true)
            .compact()
            .try_init();
    });
    tracing::debug!(level = default_level, "tracing initialised");
}
