//! devloop core library — fixed configuration, output formatting, errors.
//!
//! Public API surface:
//! - [`config`] — [`DevConfig`] and [`BuildCommand`]
//! - [`format`] — [`indent`] for console presentation of build output
//! - [`error`] — [`ConfigError`]

pub mod config;
pub mod error;
pub mod format;

pub use config::{BuildCommand, DevConfig, DEFAULT_PORT};
pub use error::ConfigError;
pub use format::indent;
