//! Bounded worker pool that drains pushed image paths and downscales each
//! to a thumbnail.

use std::path::PathBuf;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::downscale::downscale;

/// Channel capacity: a push beyond this is dropped rather than blocking the
/// caller (a later read of the missing thumbnail re-pushes it).
const QUEUE_CAPACITY: usize = 256;

/// Pause between jobs within a single worker, smoothing CPU use under
/// burst load.
const WORKER_PAUSE: Duration = Duration::from_millis(500);

/// A fixed pool of threads downscaling queued image paths to thumbnails.
///
/// Dropping the queue closes the channel; workers finish their current job
/// and exit once it drains.
pub struct ThumbnailQueue {
    tx: Sender<PathBuf>,
    workers: Vec<JoinHandle<()>>,
    box_size: u32,
}

impl ThumbnailQueue {
    /// Spawns a worker pool sized to the available CPU count (falling back
    /// to 1), each downscaling to fit within `box_size` pixels.
    #[must_use]
    pub fn start(box_size: u32) -> Self {
        let (tx, rx) = bounded(QUEUE_CAPACITY);
        let worker_count = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);

        let workers = (0..worker_count)
            .map(|_| {
                let rx: Receiver<PathBuf> = rx.clone();
                std::thread::spawn(move || {
                    for path in &rx {
                        if let Err(err) = downscale(&path, box_size) {
                            tracing::warn!(?path, %err, "thumbnail downscale failed");
                        }
                        std::thread::sleep(WORKER_PAUSE);
                    }
                })
            })
            .collect();

        Self { tx, workers, box_size }
    }

    /// Pushes `path` onto the queue. Silently drops the job if the queue is
    /// full, per the lossy-queue contract: a later read of the missing
    /// thumbnail re-pushes it.
    pub fn push(&self, path: PathBuf) {
        match self.tx.try_send(path) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(path)) => {
                tracing::debug!(?path, "thumbnail queue full, dropping job");
            }
        }
    }

    /// The downscale target box size this queue's workers use.
    #[must_use]
    pub fn box_size(&self) -> u32 {
        self.box_size
    }

    /// Closes the send side and blocks until every worker has drained its
    /// remaining jobs and exited. Intended for orderly shutdown in tests
    /// and short-lived processes; a long-running server simply drops the
    /// queue at process exit.
    pub fn join(self) {
        drop(self.tx);
        for worker in self.workers {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::{Rgba, RgbaImage};
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn pushed_image_gets_a_thumbnail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("big.png");
        RgbaImage::from_pixel(200, 100, Rgba([10, 20, 30, 255])).save(&path).unwrap();

        let queue = ThumbnailQueue::start(64);
        queue.push(path.clone());
        queue.join();

        let mut thumb = path.into_os_string();
        thumb.push(".thumb.jpg");
        assert!(std::path::Path::new(&thumb).exists());
    }
}
