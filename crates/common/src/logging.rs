//! Logging utilities for freeplan-keeper components.

use crate::error::{Error, Result};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize tracing from configured settings.
///
/// RUST_LOG still wins over `level` when set. Fails if a global subscriber
/// is already installed.
pub fn init_with(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let result = if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .try_init()
    };

    result.map_err(Error::logging)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_rejected() {
        let _ = init_with("info", false);
        assert!(matches!(init_with("debug", true), Err(Error::Logging(_))));
    }
}
