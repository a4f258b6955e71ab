//! Configuration file watcher for hot reload.
//!
//! Watches the configuration file for changes (and listens for SIGHUP) and
//! hands every successfully loaded configuration to a callback. A file that
//! fails to load or validate is logged and otherwise ignored.

use crate::config::{Config, load_config};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Callback type for config reload.
pub type ReloadCallback = Box<dyn Fn(Config) + Send + Sync>;

/// How often pending file events are drained.
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration file watcher.
pub struct ConfigWatcher {
    /// Path to the config file.
    config_path: PathBuf,
    /// Callback to invoke when config is reloaded.
    reload_callback: ReloadCallback,
}

impl ConfigWatcher {
    /// Create a new config watcher.
    pub fn new(config_path: PathBuf, reload_callback: ReloadCallback) -> Self {
        Self {
            config_path,
            reload_callback,
        }
    }

    /// Get the path being watched.
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Run the config watcher until shutdown.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(path = %self.config_path.display(), "config watcher starting");

        let (tx, rx) = mpsc::channel();

        let watcher_result: Result<RecommendedWatcher, _> = Watcher::new(
            move |res: Result<Event, notify::Error>| {
                if let Ok(event) = res {
                    let _ = tx.send(event);
                }
            },
            notify::Config::default().with_poll_interval(Duration::from_secs(2)),
        );

        let mut watcher = match watcher_result {
            Ok(w) => w,
            Err(e) => {
                error!(error = %e, "failed to create file watcher");
                let _ = shutdown.recv().await;
                return;
            }
        };

        // Editors often replace the file instead of writing it in place, so
        // the directory is watched rather than the file itself.
        if let Err(e) = watcher.watch(self.watch_dir(), RecursiveMode::NonRecursive) {
            error!(error = %e, "failed to watch config directory");
            let _ = shutdown.recv().await;
            return;
        }

        #[cfg(unix)]
        let mut sighup = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
            Ok(s) => Some(s),
            Err(e) => {
                warn!(error = %e, "failed to setup SIGHUP handler");
                None
            }
        };

        info!("config watcher ready, watching for changes");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(EVENT_POLL_INTERVAL) => {
                    // One reload per batch of events
                    let mut changed = false;
                    while let Ok(event) = rx.try_recv() {
                        changed |= self.should_reload(&event);
                    }
                    if changed {
                        self.reload();
                    }
                }

                _ = async {
                    #[cfg(unix)]
                    {
                        match sighup.as_mut() {
                            Some(sig) => sig.recv().await,
                            None => std::future::pending::<Option<()>>().await,
                        }
                    }
                    #[cfg(not(unix))]
                    {
                        std::future::pending::<Option<()>>().await
                    }
                } => {
                    info!("received SIGHUP, reloading configuration");
                    self.reload();
                }

                _ = shutdown.recv() => {
                    info!("config watcher shutting down");
                    break;
                }
            }
        }
    }

    fn watch_dir(&self) -> &Path {
        match self.config_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    /// Check if this event should trigger a reload.
    fn should_reload(&self, event: &Event) -> bool {
        let is_our_file = event
            .paths
            .iter()
            .any(|p| p.file_name() == self.config_path.file_name());

        let is_modify_or_create = matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_));

        is_our_file && is_modify_or_create
    }

    /// Load the file and pass it to the callback.
    ///
    /// Returns `true` if the callback was invoked.
    pub fn reload(&self) -> bool {
        debug!(path = %self.config_path.display(), "attempting config reload");

        let new_config = match load_config(&self.config_path) {
            Ok(config) => config,
            Err(e) => {
                error!(error = %e, "failed to load new config, keeping current");
                return false;
            }
        };

        info!(
            algorithm = ?new_config.algorithm,
            backends = new_config.backends.len(),
            "configuration reloaded successfully"
        );
        (self.reload_callback)(new_config);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::io::Write;
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    fn noop_watcher(path: &str) -> ConfigWatcher {
        ConfigWatcher::new(PathBuf::from(path), Box::new(|_| {}))
    }

    #[test]
    fn test_should_reload_modify() {
        let watcher = noop_watcher("/test/config.yaml");

        let event = Event {
            kind: EventKind::Modify(notify::event::ModifyKind::Data(
                notify::event::DataChange::Content,
            )),
            paths: vec![PathBuf::from("/test/config.yaml")],
            attrs: Default::default(),
        };

        assert!(watcher.should_reload(&event));
    }

    #[test]
    fn test_should_reload_create() {
        let watcher = noop_watcher("/test/config.yaml");

        let event = Event {
            kind: EventKind::Create(notify::event::CreateKind::File),
            paths: vec![PathBuf::from("/test/config.yaml")],
            attrs: Default::default(),
        };

        assert!(watcher.should_reload(&event));
    }

    #[test]
    fn test_should_reload_wrong_file() {
        let watcher = noop_watcher("/test/config.yaml");

        let event = Event {
            kind: EventKind::Modify(notify::event::ModifyKind::Data(
                notify::event::DataChange::Content,
            )),
            paths: vec![PathBuf::from("/test/other.yaml")],
            attrs: Default::default(),
        };

        assert!(!watcher.should_reload(&event));
    }

    #[test]
    fn test_should_reload_delete_ignored() {
        let watcher = noop_watcher("/test/config.yaml");

        let event = Event {
            kind: EventKind::Remove(notify::event::RemoveKind::File),
            paths: vec![PathBuf::from("/test/config.yaml")],
            attrs: Default::default(),
        };

        assert!(!watcher.should_reload(&event));
    }

    #[test]
    fn test_watch_dir_for_bare_file_name() {
        assert_eq!(noop_watcher("config.yaml").watch_dir(), Path::new("."));
        assert_eq!(
            noop_watcher("/etc/dispatchlb/config.yaml").watch_dir(),
            Path::new("/etc/dispatchlb")
        );
    }

    #[test]
    fn test_reload_invokes_callback() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"backends:\n  - address: \"127.0.0.1:9000\"\n")
            .unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let watcher = ConfigWatcher::new(
            file.path().to_path_buf(),
            Box::new(move |config| sink.lock().push(config.backends.len())),
        );

        assert!(watcher.reload());
        assert_eq!(*seen.lock(), vec![1]);
    }

    #[test]
    fn test_reload_keeps_current_on_invalid_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"backends: []\n").unwrap();

        let calls = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&calls);
        let watcher = ConfigWatcher::new(
            file.path().to_path_buf(),
            Box::new(move |_| *sink.lock() += 1),
        );

        assert!(!watcher.reload());
        assert_eq!(*calls.lock(), 0);
    }
}
