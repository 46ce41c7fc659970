use log::{debug, info, log_enabled, warn, Level};

/// Initializes the logger with the `env_logger` crate.
///
/// Frame hex dumps are logged at debug level, field operations at info.
/// `RUST_LOG=heatmiser_rs=debug` shows everything on the wire.
pub fn init_logger() {
    env_logger::init();
}

/// Logs a warning message.
pub fn log_warn(message: &str) {
    if log_enabled!(Level::Warn) {
        warn!("{message}");
    }
}

/// Logs an informational message.
pub fn log_info(message: &str) {
    if log_enabled!(Level::Info) {
        info!("{message}");
    }
}

/// Logs a debug message.
pub fn log_debug(message: &str) {
    if log_enabled!(Level::Debug) {
        debug!("{message}");
    }
}
