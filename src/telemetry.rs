use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install JSON structured logging on stderr, filtered by `RUST_LOG`
/// (default `info`).
///
/// Returns false if a global subscriber was already installed.
pub fn init_telemetry() -> bool {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // stdout carries command output
    let formatting_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .json();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(formatting_layer)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_initialization_is_refused() {
        init_telemetry();
        assert!(!init_telemetry());
    }
}
