//! Wicket Server
//!
//! Process-level orchestration around [`wicket_core::Store`]: a periodic
//! snapshot task, the thumbnail worker pool, and the moderation-command
//! dispatcher that lets `!!op=value` lines embedded in a post act on the
//! running forum.
//!
//! # Components
//!
//! - [`Server`]: owns the store and thumbnail queue, spawns the snapshot task
//! - [`mod_command`]: parses and applies embedded moderation commands
//!
//! HTTP routing, request parsing, and the CAPTCHA verifier callout are
//! deployment-specific and are left to the embedding application; this crate
//! provides the pieces a binary wires together (see `main.rs` for the CLI
//! entry point this workspace ships).

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod mod_command;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use wicket_core::Store;
use wicket_imaging::ThumbnailQueue;

/// Failure from a CLI or server-startup operation.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// A store operation failed (log corruption, permission, etc.).
    #[error(transparent)]
    Store(#[from] wicket_core::StoreError),

    /// A filesystem operation outside the store (cookie emission, `-csrf`
    /// exit path) failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias for [`ServerError`]-returning operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// How often the background task snapshots the log.
#[derive(Debug, Clone, Copy)]
pub enum SnapshotInterval {
    /// Production cadence: once every 6 hours.
    Production,
    /// Development cadence: once a minute, for fast iteration.
    Development,
    /// An explicit interval, mostly for tests.
    Custom(Duration),
}

impl SnapshotInterval {
    /// The wall-clock [`Duration`] this variant represents.
    #[must_use]
    pub fn duration(self) -> Duration {
        match self {
            Self::Production => Duration::from_secs(6 * 60 * 60),
            Self::Development => Duration::from_secs(60),
            Self::Custom(d) => d,
        }
    }
}

/// Runtime configuration for [`Server::start`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Path to the main log file.
    pub log_path: PathBuf,
    /// Thumbnail downscale target box size, in pixels.
    pub thumbnail_box_size: u32,
    /// How often to run the background snapshot.
    pub snapshot_interval: SnapshotInterval,
}

/// The running forum process: a loaded store, its thumbnail worker pool,
/// and a background snapshot task.
pub struct Server {
    store: Arc<Store>,
    imaging: Arc<ThumbnailQueue>,
}

impl Server {
    /// Opens the store at `config.log_path`, starts the thumbnail worker
    /// pool, and spawns the periodic snapshot task on the current Tokio
    /// runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the log file cannot be opened or fails replay.
    pub fn start(config: ServerConfig) -> wicket_core::Result<Self> {
        let store = Arc::new(Store::open(&config.log_path)?);
        let imaging = Arc::new(ThumbnailQueue::start(config.thumbnail_box_size));

        spawn_snapshot_task(Arc::clone(&store), config.snapshot_interval.duration());

        Ok(Self { store, imaging })
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// The thumbnail worker pool.
    #[must_use]
    pub fn imaging(&self) -> &Arc<ThumbnailQueue> {
        &self.imaging
    }
}

/// Spawns a task that snapshots `store` to `{log_path}.snapshot` every
/// `interval`, forever. A failed snapshot is logged and does not stop the
/// loop; the next log write still has the original log as its safety net.
fn spawn_snapshot_task(store: Arc<Store>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; skip it so startup doesn't race
        // replay with an instant snapshot.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let dest = snapshot_path(store.path());
            let store = Arc::clone(&store);
            let result = tokio::task::spawn_blocking(move || store.snapshot_to(&dest)).await;
            match result {
                Ok(Ok(())) => tracing::info!("snapshot written"),
                Ok(Err(err)) => tracing::warn!(%err, "periodic snapshot failed"),
                Err(err) => tracing::warn!(%err, "snapshot task panicked"),
            }
        }
    });
}

fn snapshot_path(log_path: &std::path::Path) -> PathBuf {
    let mut s = log_path.as_os_str().to_os_string();
    s.push(".snapshot");
    PathBuf::from(s)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_path_appends_suffix() {
        assert_eq!(snapshot_path(std::path::Path::new("data/main.txt")), PathBuf::from("data/main.txt.snapshot"));
    }

    #[tokio::test]
    async fn server_starts_and_opens_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.txt");
        wicket_core::log::LogFile::create(&path).unwrap();

        let server = Server::start(ServerConfig {
            log_path: path,
            thumbnail_box_size: 256,
            snapshot_interval: SnapshotInterval::Custom(Duration::from_secs(3600)),
        })
        .unwrap();

        assert_eq!(server.store().topics_count(), 0);
    }
}
