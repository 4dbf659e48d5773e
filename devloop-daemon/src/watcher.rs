//! Change watcher: classifies filesystem events and triggers rebuilds.
//!
//! Only modifications of existing files trigger a build. File and directory
//! additions are ignored, so a freshly created file is not built until it is
//! modified again. Replacing an existing file (an editor's atomic save, by
//! renaming a temp file over it or by moving it away and writing it anew)
//! counts as a modification of that file.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::event::{AccessKind, AccessMode, CreateKind, ModifyKind, RenameMode};
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc};

use crate::build::Rebuild;
use crate::error::DaemonError;

/// Backends that report the writer closing a file. Only there can the data
/// events belonging to a file's creation be told apart from later edits.
const REPORTS_CLOSE_WRITE: bool = cfg!(any(target_os = "linux", target_os = "android"));

/// A file created at a path that vanished at most this long ago replaces it.
const REPLACE_WINDOW: Duration = Duration::from_millis(100);

/// What a single filesystem event means to the dev loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    FileAdded,
    DirAdded,
    Modified,
    Removed,
    Renamed,
    Other,
}

impl ChangeKind {
    pub fn classify(kind: &EventKind) -> Self {
        match kind {
            EventKind::Create(CreateKind::Folder) => Self::DirAdded,
            EventKind::Create(_) => Self::FileAdded,
            EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any | ModifyKind::Other) => {
                Self::Modified
            }
            EventKind::Modify(ModifyKind::Name(_)) => Self::Renamed,
            EventKind::Remove(_) => Self::Removed,
            // Metadata-only changes, access events and unknown kinds.
            _ => Self::Other,
        }
    }

    /// True for in-place modifications. Renames and additions only build
    /// when [`ChangeHandler`] sees them replace a file it knows.
    pub fn triggers_build(self) -> bool {
        matches!(self, Self::Modified)
    }
}

/// Consumes events one at a time and fires a rebuild per modified file.
pub struct ChangeHandler {
    cwd: PathBuf,
    rebuild: Arc<dyn Rebuild>,
    track_creations: bool,
    /// Files created but not yet closed by their creator.
    being_created: HashSet<PathBuf>,
    /// Files being written in place of one that just vanished.
    replacing: HashSet<PathBuf>,
    /// Files known to exist under the watch roots.
    known: HashSet<PathBuf>,
    /// Paths removed or renamed away, and when.
    vanished: HashMap<PathBuf, Instant>,
    /// Tracker of the last rename destination handled; its paired
    /// `Name(Both)` event carries the same one.
    last_rename: Option<usize>,
}

impl ChangeHandler {
    pub fn new(cwd: impl Into<PathBuf>, rebuild: Arc<dyn Rebuild>) -> Self {
        Self {
            cwd: cwd.into(),
            rebuild,
            track_creations: REPORTS_CLOSE_WRITE,
            being_created: HashSet::new(),
            replacing: HashSet::new(),
            known: HashSet::new(),
            vanished: HashMap::new(),
            last_rename: None,
        }
    }

    /// Seed the files that already exist, so renaming over one is a change.
    pub fn with_known_files(mut self, files: impl IntoIterator<Item = PathBuf>) -> Self {
        self.known.extend(files);
        self
    }

    /// Handle one event. Returns the number of builds triggered.
    pub fn handle(&mut self, event: &Event) -> usize {
        let changed = self.changed_paths(event, Instant::now());
        if changed.is_empty() {
            let kind = ChangeKind::classify(&event.kind);
            tracing::trace!(?kind, paths = ?event.paths, "ignoring change event");
        }
        for path in &changed {
            println!("{}\n", change_notice(path, &self.cwd));
            self.rebuild.rebuild();
        }
        changed.len()
    }

    fn changed_paths(&mut self, event: &Event, now: Instant) -> Vec<PathBuf> {
        self.vanished
            .retain(|_, vanished_at| now.duration_since(*vanished_at) <= REPLACE_WINDOW);

        let paths = &event.paths;
        match &event.kind {
            EventKind::Create(CreateKind::Folder) => Vec::new(),
            EventKind::Create(_) => {
                for path in paths {
                    self.created(path);
                }
                Vec::new()
            }
            EventKind::Modify(ModifyKind::Name(mode)) => {
                self.renamed(mode, paths, event.tracker(), now)
            }
            kind if ChangeKind::classify(kind).triggers_build() => paths
                .iter()
                .filter(|path| !path.is_dir() && !self.being_created.contains(*path))
                .cloned()
                .collect(),
            EventKind::Remove(_) => {
                for path in paths {
                    self.vanish(path, now);
                }
                Vec::new()
            }
            EventKind::Access(AccessKind::Close(AccessMode::Write)) => paths
                .iter()
                .filter(|path| {
                    self.being_created.remove(*path);
                    self.replacing.remove(*path)
                })
                .cloned()
                .collect(),
            _ => Vec::new(),
        }
    }

    fn created(&mut self, path: &Path) {
        let replaced = self.vanished.remove(path).is_some();
        self.known.insert(path.to_path_buf());
        if self.track_creations {
            self.being_created.insert(path.to_path_buf());
            if replaced {
                self.replacing.insert(path.to_path_buf());
            }
        }
    }

    fn renamed(
        &mut self,
        mode: &RenameMode,
        paths: &[PathBuf],
        tracker: Option<usize>,
        now: Instant,
    ) -> Vec<PathBuf> {
        match mode {
            RenameMode::From => {
                for path in paths {
                    self.vanish(path, now);
                }
                Vec::new()
            }
            RenameMode::To => {
                if tracker.is_some() {
                    self.last_rename = tracker;
                }
                paths.iter().filter(|path| self.moved_in(path)).cloned().collect()
            }
            RenameMode::Both => {
                if tracker.is_some() && self.last_rename == tracker {
                    self.last_rename = None;
                    return Vec::new();
                }
                match paths {
                    [from, to] => {
                        self.vanish(from, now);
                        self.moved_in(to).then(|| to.clone()).into_iter().collect()
                    }
                    _ => Vec::new(),
                }
            }
            // Backends that cannot tell the ends apart report each path once.
            RenameMode::Any | RenameMode::Other => paths
                .iter()
                .filter(|path| {
                    if path.exists() {
                        self.moved_in(path)
                    } else {
                        self.vanish(path, now);
                        false
                    }
                })
                .cloned()
                .collect(),
        }
    }

    /// A file was renamed onto `path`. True when it replaced an existing file.
    fn moved_in(&mut self, path: &Path) -> bool {
        self.being_created.remove(path);
        self.replacing.remove(path);
        let replaced = self.known.contains(path) || self.vanished.remove(path).is_some();
        if path.is_dir() {
            return false;
        }
        self.known.insert(path.to_path_buf());
        replaced
    }

    fn vanish(&mut self, path: &Path, now: Instant) {
        self.known.remove(path);
        self.being_created.remove(path);
        self.replacing.remove(path);
        self.vanished.insert(path.to_path_buf(), now);
    }
}

/// Handle a single event with a one-off handler.
///
/// Creation tracking needs state across events, so the long-running watch
/// loop holds a [`ChangeHandler`] instead.
pub fn handle_event(event: &Event, cwd: &Path, rebuild: Arc<dyn Rebuild>) -> usize {
    ChangeHandler::new(cwd, rebuild).handle(event)
}

/// `File <path> changed`, with `path` shown relative to `cwd` when under it.
pub fn change_notice(path: &Path, cwd: &Path) -> String {
    let shown = path.strip_prefix(cwd).unwrap_or(path);
    format!("File {} changed", shown.display())
}

/// Watch `roots` recursively and rebuild on every qualifying change until
/// `shutdown_rx` fires.
pub async fn watcher_task(
    roots: Vec<PathBuf>,
    cwd: PathBuf,
    rebuild: Arc<dyn Rebuild>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher: RecommendedWatcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;

    if watch_roots(&mut watcher, &roots) == 0 {
        tracing::warn!("no watch roots available; changes will not trigger builds");
    }

    let mut handler = ChangeHandler::new(cwd, rebuild).with_known_files(known_files(&roots));

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                match event {
                    Ok(event) => {
                        handler.handle(&event);
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "watcher event error");
                    }
                }
            }
        }
    }

    drop(watcher);
    tracing::debug!("watcher stopped");
    Ok(())
}

/// Register each root, skipping the ones that cannot be watched.
fn watch_roots(watcher: &mut impl Watcher, roots: &[PathBuf]) -> usize {
    roots
        .iter()
        .filter(|root| match watcher.watch(root, RecursiveMode::Recursive) {
            Ok(()) => {
                tracing::debug!(path = %root.display(), "watching directory");
                true
            }
            Err(err) => {
                tracing::warn!(
                    path = %root.display(),
                    error = %err,
                    "cannot watch directory; skipping"
                );
                false
            }
        })
        .count()
}

/// Every file currently under `roots`; unreadable directories are skipped.
fn known_files(roots: &[PathBuf]) -> Vec<PathBuf> {
    let mut dirs = roots.to_vec();
    let mut files = Vec::new();
    while let Some(dir) = dirs.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) => {
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::debug!(path = %dir.display(), error = %err, "cannot list directory");
                }
                continue;
            }
        };
        for entry in entries.flatten() {
            match entry.file_type() {
                Ok(ty) if ty.is_dir() => dirs.push(entry.path()),
                Ok(_) => files.push(entry.path()),
                Err(_) => {}
            }
        }
    }
    files
}
