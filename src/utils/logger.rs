use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Installs a global tracing subscriber at `INFO` level.
///
/// Intended for binaries and examples; libraries embedding this crate
/// should configure their own subscriber instead.
pub fn setup_logger() {
    setup_logger_with_level(Level::INFO);
}

/// Installs a global tracing subscriber with the given maximum level.
///
/// Calling this more than once is harmless; later calls are ignored.
pub fn setup_logger_with_level(level: Level) {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
