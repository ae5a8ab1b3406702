/// Initialize logging for a test or demo.
///
/// Safe to call more than once, only the first call installs a subscriber.
pub fn init_logging(filter: &str) {
    use tracing_subscriber::prelude::*;

    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(filter))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_level(true)
                .with_test_writer()
                .compact(),
        )
        .try_init();
}
