//! Logging setup shared by the binaries.

/// Install and configure the tracing/logging system.
///
/// Logs go to stderr, filtered by `RUST_LOG` when set and by
/// `default_level` otherwise. Output of the commands we run goes to stdout.
pub fn install_tracing(default_level: tracing::Level) {
    use tracing_error::ErrorLayer;
    use tracing_subscriber::filter::LevelFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let fmt_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let filter_layer = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(default_level).into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .with(ErrorLayer::default())
        .init();
}
