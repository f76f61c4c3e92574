//! Common utilities and types shared across freeplan-keeper components.

pub mod error;
pub mod logging;

pub use error::{Error, Result};
