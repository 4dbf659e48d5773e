use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::broadcast;

use devloop_core::DevConfig;

use crate::build::{BuildRunner, Rebuild};
use crate::error::{io_err, DaemonError};
use crate::server::{self, server_task};
use crate::watcher::watcher_task;

/// Process-wide context: owns the configuration and the shutdown channel
/// shared by the watcher and the server.
pub struct DevServer {
    config: DevConfig,
    cwd: PathBuf,
    shutdown_tx: broadcast::Sender<()>,
    /// Subscribed at construction so a shutdown requested before `run` is kept.
    shutdown_rx: broadcast::Receiver<()>,
}

/// Cloneable trigger that tears down a running [`DevServer`].
#[derive(Debug, Clone)]
pub struct ShutdownHandle(broadcast::Sender<()>);

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.0.send(());
    }
}

impl DevServer {
    /// Validate `config` and resolve paths against the current directory.
    pub fn new(config: DevConfig) -> Result<Self, DaemonError> {
        let cwd = std::env::current_dir().map_err(|e| io_err(".", e))?;
        Self::with_cwd(config, cwd)
    }

    pub fn with_cwd(config: DevConfig, cwd: impl AsRef<Path>) -> Result<Self, DaemonError> {
        config.validate()?;
        let cwd = cwd.as_ref();
        // Canonical so backend paths (e.g. /private/var on macOS) strip cleanly.
        let cwd = fs::canonicalize(cwd).map_err(|e| io_err(cwd, e))?;
        let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(16);
        Ok(Self {
            config,
            cwd,
            shutdown_tx,
            shutdown_rx,
        })
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(self.shutdown_tx.clone())
    }

    /// Bind the configured port and run until Ctrl-C.
    pub async fn run(self) -> Result<(), DaemonError> {
        let listener = server::bind(self.config.port).await?;
        self.run_with_listener(listener).await
    }

    /// Run on an already bound listener until Ctrl-C or a shutdown request.
    pub async fn run_with_listener(self, listener: TcpListener) -> Result<(), DaemonError> {
        let roots: Vec<PathBuf> = self
            .config
            .watch_roots()
            .iter()
            .map(|root| self.cwd.join(root))
            .collect();
        let dist = self.cwd.join(&self.config.dist_dir);
        let rebuild: Arc<dyn Rebuild> =
            Arc::new(BuildRunner::new(self.config.build.clone(), self.cwd.clone()));

        println!(
            "- Watching for changes in {}/ and {}/\n",
            self.config.src_dir.display(),
            self.config.static_dir.display()
        );
        println!("- Serving the build in {}\n", self.config.serve_url());
        tracing::info!(
            port = self.config.port,
            dist = %dist.display(),
            build = %self.config.build,
            "dev loop started",
        );

        let cwd = self.cwd;
        run_tasks(
            listener,
            dist,
            self.shutdown_tx,
            self.shutdown_rx,
            move |shutdown_rx| watcher_task(roots, cwd, rebuild, shutdown_rx),
        )
        .await
    }
}

/// Spawn the watcher, server and signal tasks and join them. The server
/// ending or Ctrl-C broadcasts shutdown; the watcher ending does not.
async fn run_tasks<W, F>(
    listener: TcpListener,
    dist: PathBuf,
    shutdown_tx: broadcast::Sender<()>,
    mut requested_rx: broadcast::Receiver<()>,
    watcher: W,
) -> Result<(), DaemonError>
where
    W: FnOnce(broadcast::Receiver<()>) -> F,
    F: Future<Output = Result<(), DaemonError>> + Send + 'static,
{
    let watcher_handle = tokio::spawn(supervise_watcher(watcher(shutdown_tx.subscribe())));

    let server_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result = server_task(listener, dist, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = requested_rx.recv() => {
                    // Relay to tasks that subscribed after the request.
                    let _ = shutdown.send(());
                    Ok(())
                }
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Runtime(format!(
                            "ctrl-c handler failed: {err}"
                        ))),
                    }
                }
            }
        })
    };

    let (watcher_result, server_result, signal_result) =
        tokio::join!(watcher_handle, server_handle, signal_handle);

    handle_join("watcher", watcher_result)?;
    handle_join("server", server_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

/// A failed watcher is logged; the server keeps serving the last build.
async fn supervise_watcher(
    watcher: impl Future<Output = Result<(), DaemonError>>,
) -> Result<(), DaemonError> {
    if let Err(err) = watcher.await {
        tracing::error!(error = %err, "watcher failed; changes will not trigger builds");
    }
    Ok(())
}

/// Start the dev loop and block the current thread until it exits.
pub fn start_blocking(config: DevConfig) -> Result<(), DaemonError> {
    let dev = DevServer::new(config)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(dev.run())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Runtime(format!("{task} task join failure: {err}"))),
    }
}

/// Install the `fmt` subscriber, filtered by `RUST_LOG` (default `info`).
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn rejects_invalid_config() {
        let dir = TempDir::new().expect("tempdir");
        let config = DevConfig {
            port: 0,
            ..DevConfig::default()
        };
        let err = DevServer::with_cwd(config, dir.path()).err().expect("error");
        assert!(matches!(err, DaemonError::Config(_)), "got: {err}");
    }

    #[test]
    fn missing_working_directory_is_an_io_error() {
        let dir = TempDir::new().expect("tempdir");
        let err = DevServer::with_cwd(DevConfig::default(), dir.path().join("gone"))
            .err()
            .expect("error");
        assert!(matches!(err, DaemonError::Io { .. }), "got: {err}");
    }

    #[tokio::test]
    async fn shutdown_handle_stops_all_tasks() {
        let dir = TempDir::new().expect("tempdir");
        let dev = DevServer::with_cwd(DevConfig::default(), dir.path()).expect("dev server");
        let handle = dev.shutdown_handle();
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");

        let running = tokio::spawn(dev.run_with_listener(listener));
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        handle.shutdown();

        let result = tokio::time::timeout(std::time::Duration::from_secs(5), running)
            .await
            .expect("stops in time")
            .expect("join");
        assert!(result.is_ok(), "got: {result:?}");
    }

    #[tokio::test]
    async fn shutdown_requested_before_run_is_kept() {
        let dir = TempDir::new().expect("tempdir");
        let dev = DevServer::with_cwd(DevConfig::default(), dir.path()).expect("dev server");
        dev.shutdown_handle().shutdown();
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            dev.run_with_listener(listener),
        )
        .await
        .expect("stops in time");
        assert!(result.is_ok(), "got: {result:?}");
    }

    #[tokio::test]
    async fn watcher_failure_keeps_the_server_running() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let dir = TempDir::new().expect("tempdir");
        fs::create_dir(dir.path().join("dist")).expect("dist");
        fs::write(dir.path().join("dist").join("index.html"), "<h1>up</h1>").expect("index");
        let (shutdown_tx, requested_rx) = broadcast::channel::<()>(16);
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");

        let running = tokio::spawn(run_tasks(
            listener,
            dir.path().join("dist"),
            shutdown_tx.clone(),
            requested_rx,
            |_shutdown_rx| async {
                Err::<(), _>(DaemonError::Runtime("inotify watch limit reached".into()))
            },
        ));
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        let mut stream = tokio::net::TcpStream::connect(addr).await.expect("connect");
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .expect("write");
        let mut response = String::new();
        stream.read_to_string(&mut response).await.expect("read");
        assert!(response.starts_with("HTTP/1.1 200"), "got: {response}");
        assert!(!running.is_finished(), "a watcher failure must not stop the server");

        shutdown_tx.send(()).expect("tasks listening");
        let result = tokio::time::timeout(std::time::Duration::from_secs(5), running)
            .await
            .expect("stops in time")
            .expect("join");
        assert!(result.is_ok(), "got: {result:?}");
    }

    #[test]
    fn join_failure_names_the_task() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("runtime");
        let join_error = rt.block_on(async {
            tokio::spawn(async { panic!("boom") }).await.unwrap_err()
        });
        let err = handle_join("watcher", Err(join_error)).unwrap_err();
        assert!(err.to_string().contains("watcher task join failure"));
    }
}
