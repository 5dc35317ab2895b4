//! Hot reload of the watched environment file.
//!
//! notify delivers raw filesystem events on its own thread; they are
//! bridged into a tokio channel, debounced, and collapsed into a single
//! re-parse per burst. The watcher handle must be kept alive for the
//! lifetime of the server.

use crate::error::Result;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use serve::dotenv;
use serve::state::EnvState;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Editors and orchestrators write in bursts; events inside this window
/// collapse into one reload.
const DEBOUNCE: Duration = Duration::from_millis(40);

pub struct DotenvWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl DotenvWatcher {
    /// Merge the file once, then keep merging on every change to it. The
    /// file may not exist yet; creation counts as a change.
    pub fn spawn(path: PathBuf, env: EnvState) -> Result<Self> {
        env.merge(dotenv::parse_file(&path));

        let file_name: Option<OsString> = path.file_name().map(OsString::from);
        let dir = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();

        let (tx, mut rx) = mpsc::channel::<()>(16);
        let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
            match event {
                Ok(event) => {
                    let matches = event
                        .paths
                        .iter()
                        .any(|changed| changed.file_name() == file_name.as_deref());
                    if matches {
                        let _ = tx.blocking_send(());
                    }
                }
                Err(error) => warn!(%error, "environment file watcher error"),
            }
        })?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        let task = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                tokio::time::sleep(DEBOUNCE).await;
                while rx.try_recv().is_ok() {}
                debug!(path = %path.display(), "reloading environment file");
                env.merge(dotenv::parse_file(&path));
            }
        });

        Ok(Self {
            _watcher: watcher,
            task,
        })
    }
}

impl Drop for DotenvWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}
