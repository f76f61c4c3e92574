//! Freeplan keeper server
//!
//! Loads the YAML configuration, builds one keeper per enabled backend and
//! drives them either once or on a fixed interval until a shutdown signal.
//!
//! # Components
//!
//! - **Config**: YAML loading, defaults and validation
//! - **Server**: keeper construction, run mode dispatch, ordered shutdown

pub mod config;
pub mod server;
pub mod types;

pub use config::{Config, ConfigError};
pub use server::{KeeperServer, build_manager, shutdown_signal};
pub use types::{RunMode, ServerConfig};
