//! # Configuration
//!
//! Controller configuration loaded from environment variables.
//!
//! ## Module Structure
//!
//! - `controller.rs` - reconciliation, token and CSR settings
//! - `logging.rs` - tracing subscriber settings, read first
//! - `server.rs` - HTTP server settings

mod controller;
mod logging;
mod server;

pub use controller::ControllerConfig;
pub use logging::LoggingConfig;
pub use server::ServerConfig;

use std::sync::Arc;

/// Configuration shared between the watch loop, the CSR approver and the server
pub type SharedControllerConfig = Arc<ControllerConfig>;

/// Read environment variable or return default value
///
/// Unparseable values fall back to the default and are reported.
pub(crate) fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T
where
    <T as std::str::FromStr>::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(env = key, value = raw.as_str(), error = %e, "invalid value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

/// Read environment variable as boolean or return default
pub(crate) fn env_var_or_default_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| {
            let v_lower = v.to_lowercase();
            v_lower == "true" || v_lower == "1" || v_lower == "yes" || v_lower == "on"
        })
        .unwrap_or(default)
}

/// Read environment variable as string or return default
pub(crate) fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read an optional, non-empty environment variable
pub(crate) fn env_var_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_invalid_number_falls_back_and_is_logged() {
        let key = "NODE_MANAGER_CONFIG_TEST_INVALID_PORT";
        std::env::set_var(key, "not-a-port");

        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let value = tracing::subscriber::with_default(subscriber, || env_var_or_default(key, 4219u16));

        assert_eq!(value, 4219);
        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("invalid value, using default"), "{output}");
        assert!(output.contains(key), "{output}");
        std::env::remove_var(key);
    }
}
