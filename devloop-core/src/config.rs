//! Fixed configuration for the dev loop.
//!
//! Every value has a constant default; [`DevConfig::default`] is the whole
//! contract when no overrides are given. All path fields use `PathBuf` and
//! are relative to the process working directory.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// TCP port the build output is served on.
pub const DEFAULT_PORT: u16 = 2583;

pub const DEFAULT_SRC_DIR: &str = "src";
pub const DEFAULT_STATIC_DIR: &str = "static";
pub const DEFAULT_DIST_DIR: &str = "dist";

/// The project's build tool invocation.
pub const DEFAULT_BUILD_PROGRAM: &str = "gleam";
pub const DEFAULT_BUILD_ARGS: &[&str] = &["run"];

// ---------------------------------------------------------------------------
// BuildCommand
// ---------------------------------------------------------------------------

/// An external command run on every qualifying change.
///
/// Executed directly, without a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl BuildCommand {
    pub fn new(
        program: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse `"<program> [args...]"`, splitting on whitespace.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let mut parts = s.split_whitespace();
        let program = parts.next().ok_or(ConfigError::EmptyBuildCommand)?;
        Ok(Self::new(program, parts))
    }
}

impl Default for BuildCommand {
    fn default() -> Self {
        Self::new(DEFAULT_BUILD_PROGRAM, DEFAULT_BUILD_ARGS.iter().copied())
    }
}

impl FromStr for BuildCommand {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for BuildCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// DevConfig
// ---------------------------------------------------------------------------

/// Everything the watcher and the server need, constructed once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevConfig {
    /// Source tree, watched recursively.
    pub src_dir: PathBuf,
    /// Static assets tree, watched recursively.
    pub static_dir: PathBuf,
    /// Build output served over HTTP.
    pub dist_dir: PathBuf,
    pub port: u16,
    pub build: BuildCommand,
}

impl Default for DevConfig {
    fn default() -> Self {
        Self {
            src_dir: PathBuf::from(DEFAULT_SRC_DIR),
            static_dir: PathBuf::from(DEFAULT_STATIC_DIR),
            dist_dir: PathBuf::from(DEFAULT_DIST_DIR),
            port: DEFAULT_PORT,
            build: BuildCommand::default(),
        }
    }
}

impl DevConfig {
    /// The two watch roots, in the order they are registered.
    pub fn watch_roots(&self) -> [&PathBuf; 2] {
        [&self.src_dir, &self.static_dir]
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }
        if self.build.program.trim().is_empty() {
            return Err(ConfigError::EmptyBuildCommand);
        }
        Ok(())
    }

    /// URL printed at startup.
    pub fn serve_url(&self) -> String {
        format!("http://localhost:{}/", self.port)
    }
}
