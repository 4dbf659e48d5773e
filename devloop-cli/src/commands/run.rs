//! `devloop` — watch `src/` and `static/`, rebuild on change, serve `dist/`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use devloop_core::config::{DEFAULT_DIST_DIR, DEFAULT_SRC_DIR, DEFAULT_STATIC_DIR};
use devloop_core::{BuildCommand, DevConfig, DEFAULT_PORT};

/// Overrides for the fixed dev loop settings. Every flag is optional.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Port the build output is served on (all interfaces).
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Source directory, watched recursively.
    #[arg(long, default_value = DEFAULT_SRC_DIR)]
    pub src: PathBuf,

    /// Static assets directory, watched recursively.
    #[arg(long = "static-dir", default_value = DEFAULT_STATIC_DIR)]
    pub static_dir: PathBuf,

    /// Build output directory to serve.
    #[arg(long, default_value = DEFAULT_DIST_DIR)]
    pub dist: PathBuf,

    /// Command run on every modification [default: gleam run].
    #[arg(long = "build-command", value_name = "COMMAND")]
    pub build_command: Option<BuildCommand>,
}

impl RunArgs {
    pub fn into_config(self) -> DevConfig {
        DevConfig {
            src_dir: self.src,
            static_dir: self.static_dir,
            dist_dir: self.dist,
            port: self.port,
            build: self.build_command.unwrap_or_default(),
        }
    }

    pub fn run(self) -> Result<()> {
        devloop_daemon::init_tracing();
        let config = self.into_config();
        devloop_daemon::start_blocking(config).context("dev loop exited with error")
    }
}
