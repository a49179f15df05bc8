//! Logging macros that set target to "tapproxy" for all log calls.
//!
//! Without an explicit target, tracing uses the full module path
//! (e.g., "tapproxy::session::table"), which makes filter directives and
//! embedder logger names needlessly verbose. These macros ensure all logs
//! from this crate use a single "tapproxy" target.

macro_rules! trace {
    ($($arg:tt)*) => { ::tracing::trace!(target: "tapproxy", $($arg)*) };
}

macro_rules! debug {
    ($($arg:tt)*) => { ::tracing::debug!(target: "tapproxy", $($arg)*) };
}

macro_rules! info {
    ($($arg:tt)*) => { ::tracing::info!(target: "tapproxy", $($arg)*) };
}

macro_rules! warn {
    ($($arg:tt)*) => { ::tracing::warn!(target: "tapproxy", $($arg)*) };
}

macro_rules! error {
    ($($arg:tt)*) => { ::tracing::error!(target: "tapproxy", $($arg)*) };
}
