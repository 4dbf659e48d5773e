//! Error types for devloop-core.

use thiserror::Error;

/// Errors raised while assembling a [`crate::DevConfig`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The build command string contained no program name.
    #[error("build command is empty; expected `<program> [args...]`")]
    EmptyBuildCommand,

    /// Port 0 would bind an ephemeral port nobody can find.
    #[error("invalid port {0}; expected 1-65535")]
    InvalidPort(u16),
}
