/// Tracing setup for whatever shell hosts the chat core
use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber. `RUST_LOG` overrides `default_filter`, which the
/// host shell passes as `Config::log_filter`.
/// Returns the filter actually applied; a second call is a no-op.
pub fn init(default_filter: &str) -> String {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.to_string());
    let env_filter = EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new("info"));

    if tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .is_err()
    {
        tracing::debug!("tracing subscriber already installed");
    }

    filter
}
