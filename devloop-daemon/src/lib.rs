//! devloop daemon: change watcher, build runner and static file server.
//!
//! The watcher and the server are independent tasks sharing only a shutdown
//! channel; see [`DevServer`].

pub mod build;
mod error;
pub mod runtime;
pub mod server;
pub mod watcher;

pub use build::{run_build, BuildOutput, BuildRunner, Rebuild};
pub use error::DaemonError;
pub use runtime::{init_tracing, start_blocking, DevServer, ShutdownHandle};
pub use server::{is_hidden_path, router};
pub use watcher::{change_notice, handle_event, ChangeHandler, ChangeKind};
