//! Filesystem watcher bridging debounced change events into the dispatcher.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::dispatcher::NotificationDispatcher;
use crate::error::NotifyResult;

/// Bytes of file content included in a change notification preview.
const PREVIEW_BYTES: usize = 2000;

/// Watches filesystem paths and sends debounced change notifications.
///
/// Events for the same path within the debounce window collapse into one
/// notification: each new event cancels the pending dispatch and
/// reschedules it.
pub struct FileMonitor {
    dispatcher: Arc<NotificationDispatcher>,
    debounce: Duration,
    analyze: bool,
    watcher: StdMutex<Option<RecommendedWatcher>>,
    watched: StdMutex<HashSet<PathBuf>>,
    pending: Arc<Mutex<HashMap<PathBuf, JoinHandle<()>>>>,
    pump: StdMutex<Option<JoinHandle<()>>>,
}

impl FileMonitor {
    /// Create a monitor publishing through `dispatcher`.
    #[must_use]
    pub fn new(dispatcher: Arc<NotificationDispatcher>, debounce_seconds: f64, analyze: bool) -> Self {
        Self {
            dispatcher,
            debounce: Duration::from_secs_f64(debounce_seconds.max(0.0)),
            analyze,
            watcher: StdMutex::new(None),
            watched: StdMutex::new(HashSet::new()),
            pending: Arc::new(Mutex::new(HashMap::new())),
            pump: StdMutex::new(None),
        }
    }

    /// Paths currently being watched, sorted.
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self
            .watched
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect();
        paths.sort();
        paths
    }

    /// Start the watcher. Idempotent. Must be called from within a tokio
    /// runtime (the event pump is spawned on it).
    ///
    /// # Errors
    ///
    /// Returns an error if the native watcher cannot be created.
    pub fn start(self: &Arc<Self>) -> NotifyResult<()> {
        let mut watcher_slot = self.watcher.lock().unwrap_or_else(|e| e.into_inner());
        if watcher_slot.is_some() {
            return Ok(());
        }

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Event>();
        let watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    let _ = tx.send(event);
                },
                Err(e) => warn!(error = %e, "watch event error"),
            }
        })?;
        *watcher_slot = Some(watcher);

        let monitor = Arc::clone(self);
        let pump = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                monitor.handle_event(&event).await;
            }
        });
        *self.pump.lock().unwrap_or_else(|e| e.into_inner()) = Some(pump);

        info!("file monitor started");
        Ok(())
    }

    /// Stop the watcher and cancel pending notifications.
    pub async fn stop(&self) {
        *self.watcher.lock().unwrap_or_else(|e| e.into_inner()) = None;
        if let Some(pump) = self
            .pump
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            pump.abort();
        }
        for (_, handle) in self.pending.lock().await.drain() {
            handle.abort();
        }
        self.watched
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        info!("file monitor stopped");
    }

    /// Watch a path recursively. Returns `false` when already watched or
    /// the watch could not be established.
    pub fn add_path(self: &Arc<Self>, path: &str) -> bool {
        let path_buf = PathBuf::from(path);
        {
            let watched = self.watched.lock().unwrap_or_else(|e| e.into_inner());
            if watched.contains(&path_buf) {
                return false;
            }
        }

        if self.watcher.lock().unwrap_or_else(|e| e.into_inner()).is_none() {
            if let Err(e) = self.start() {
                warn!(error = %e, "could not start file monitor");
                return false;
            }
        }

        let mut watcher_slot = self.watcher.lock().unwrap_or_else(|e| e.into_inner());
        let Some(watcher) = watcher_slot.as_mut() else {
            return false;
        };
        match watcher.watch(Path::new(path), RecursiveMode::Recursive) {
            Ok(()) => {
                self.watched
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(path_buf);
                info!(path, "watching path");
                true
            },
            Err(e) => {
                warn!(path, error = %e, "failed to watch path");
                false
            },
        }
    }

    /// Stop watching a path. Returns `false` when it was not watched.
    pub fn remove_path(&self, path: &str) -> bool {
        let path_buf = PathBuf::from(path);
        let removed = self
            .watched
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&path_buf);
        if !removed {
            return false;
        }

        let mut watcher_slot = self.watcher.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(watcher) = watcher_slot.as_mut() {
            if let Err(e) = watcher.unwatch(Path::new(path)) {
                warn!(path, error = %e, "failed to unwatch path");
            }
        }
        info!(path, "stopped watching path");
        true
    }

    async fn handle_event(self: &Arc<Self>, event: &Event) {
        let event_type = match event.kind {
            EventKind::Create(_) => "created",
            EventKind::Modify(_) => "modified",
            EventKind::Remove(_) => "deleted",
            EventKind::Access(_) => return,
            _ => "changed",
        };

        for path in &event.paths {
            if path.is_dir() {
                continue;
            }
            self.schedule(path.clone(), event_type).await;
        }
    }

    /// (Re)schedule the debounced notification for one path. A newer event
    /// cancels the pending dispatch and restarts the window.
    async fn schedule(self: &Arc<Self>, path: PathBuf, event_type: &'static str) {
        let mut pending = self.pending.lock().await;
        if let Some(previous) = pending.remove(&path) {
            previous.abort();
        }

        let monitor = Arc::clone(self);
        let key = path.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(monitor.debounce).await;
            monitor.pending.lock().await.remove(&key);
            monitor.dispatch(&key, event_type).await;
        });
        pending.insert(path, handle);
    }

    async fn dispatch(&self, path: &Path, event_type: &str) {
        let mut message = format!("File {event_type}: {}", path.display());

        if self.analyze {
            if let Some(preview) = read_preview(path) {
                message.push_str(&format!("\n\nContent preview:\n```\n{preview}\n```"));
            }
        }

        self.dispatcher.send(&message, false).await;
    }
}

impl std::fmt::Debug for FileMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileMonitor")
            .field("debounce", &self.debounce)
            .field("analyze", &self.analyze)
            .finish_non_exhaustive()
    }
}

/// First ~2000 bytes of a file, if readable as UTF-8.
fn read_preview(path: &Path) -> Option<String> {
    let content = std::fs::read(path).ok()?;
    let slice = &content[..content.len().min(PREVIEW_BYTES)];
    Some(String::from_utf8_lossy(slice).into_owned())
}
