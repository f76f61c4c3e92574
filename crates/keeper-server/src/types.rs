//! Runtime types for the keeper server.

use keeper::BackendDescriptor;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// How the process drives its keepers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// One check pass, then shut down
    #[default]
    Once,
    /// Check on a fixed interval until a shutdown signal
    Continuous,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Once => write!(f, "once"),
            RunMode::Continuous => write!(f, "continuous"),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Execution mode
    pub mode: RunMode,

    /// Interval between checks in continuous mode
    pub interval: Duration,

    /// Every configured backend in registration order, disabled ones included
    pub backends: Vec<BackendDescriptor>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::Once,
            interval: Duration::from_secs(6 * 60 * 60),
            backends: Vec::new(),
        }
    }
}
