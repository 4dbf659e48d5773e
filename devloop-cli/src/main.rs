//! devloop — rebuild on change and serve the build output.
//!
//! # Usage
//!
//! ```text
//! devloop [--port <PORT>] [--src <DIR>] [--static-dir <DIR>] [--dist <DIR>]
//!         [--build-command "<program> [args...]"]
//! ```
//!
//! With no flags: watches `src/` and `static/`, runs `gleam run` whenever a
//! file is modified, and serves `dist/` on port 2583.

mod commands;

use anyhow::Result;
use clap::Parser;

use commands::run::RunArgs;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "devloop",
    version,
    about = "Watch src/ and static/, rebuild on change, and serve dist/",
    long_about = None,
)]
struct Cli {
    #[command(flatten)]
    run: RunArgs,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.run.run()
}
