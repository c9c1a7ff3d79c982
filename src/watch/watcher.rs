// src/watch/watcher.rs

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::EngineError;
use crate::watch::reload::{ConfigReloader, ReloadOutcome};

/// Handle for the config file watcher.
///
/// Keeps the underlying `RecommendedWatcher` alive. Dropping it stops
/// watching; the forwarding task then ends on its own.
pub struct WatcherHandle {
    _inner: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl std::fmt::Debug for WatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherHandle").finish_non_exhaustive()
    }
}

impl WatcherHandle {
    pub fn abort(self) {
        self.task.abort();
    }
}

/// Watch the reloader's config file and reload on every content change.
///
/// The parent directory is watched non-recursively, since editors often
/// replace a file by renaming over it; events for other files are ignored.
pub fn spawn_config_watcher(mut reloader: ConfigReloader) -> Result<WatcherHandle> {
    let path = reloader.path().to_path_buf();
    let target = path.canonicalize().unwrap_or_else(|_| path.clone());
    let dir = watch_dir(&target);

    if let Err(err) = reloader.prime() {
        warn!(error = %err, "could not hash initial config; first change will reload");
    }

    // Channel from the blocking notify callback into the async world.
    let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel::<Event>();

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if let Err(err) = event_tx.send(event) {
                    eprintln!("pipesim: failed to forward notify event: {err}");
                }
            }
            Err(err) => {
                eprintln!("pipesim: config watch error: {err}");
            }
        },
        Config::default(),
    )
    .context("creating config file watcher")?;

    watcher
        .watch(&dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("watching {dir:?}"))?;
    info!(path = ?target, "config watcher started");

    let task = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if !is_relevant(&event, &target) {
                continue;
            }
            debug!(?event, "config file event");

            match reloader.reload().await {
                Ok(ReloadOutcome::Applied(report)) => {
                    debug!(?report, "reload applied");
                }
                Ok(ReloadOutcome::Rejected(_)) | Ok(ReloadOutcome::Unchanged) => {}
                Err(err) => {
                    warn!(error = %err, "config reload failed");
                    let closed = err
                        .chain()
                        .any(|e| matches!(e.downcast_ref::<EngineError>(), Some(EngineError::EngineClosed)));
                    if closed {
                        break;
                    }
                }
            }
        }
        debug!("config watcher loop finished");
    });

    Ok(WatcherHandle {
        _inner: watcher,
        task,
    })
}

fn watch_dir(target: &Path) -> PathBuf {
    match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Content-changing events that touch the watched file. Only its directory
/// is watched, so the file name identifies it.
fn is_relevant(event: &Event, target: &Path) -> bool {
    let kind_matches = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Any
    );
    kind_matches && event.paths.iter().any(|p| p.file_name() == target.file_name())
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind};

    #[test]
    fn only_content_events_for_the_target_count() {
        let target = PathBuf::from("/tmp/project/Pipesim.toml");
        let modify = Event::new(EventKind::Modify(ModifyKind::Any)).add_path(target.clone());
        let other = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/tmp/project/README.md"));
        let remove = Event::new(EventKind::Remove(notify::event::RemoveKind::File))
            .add_path(target.clone());

        assert!(is_relevant(&modify, &target));
        assert!(!is_relevant(&other, &target));
        assert!(!is_relevant(&remove, &target));
    }

    #[test]
    fn bare_file_name_watches_current_dir() {
        assert_eq!(watch_dir(Path::new("Pipesim.toml")), PathBuf::from("."));
        assert_eq!(
            watch_dir(Path::new("/etc/pipesim/Pipesim.toml")),
            PathBuf::from("/etc/pipesim")
        );
    }
}
