//! Database file watcher.
//!
//! Polls the file behind an embedded pool and reports when it has been
//! replaced (a new file under the same path). Reports travel over an mpsc
//! channel to a task that bumps the pool serial, so connections borrowed
//! before the replacement are closed on release instead of being reused.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Identity of a file on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileIdentity {
    #[cfg(unix)]
    dev: u64,
    #[cfg(unix)]
    ino: u64,
    #[cfg(not(unix))]
    created: Option<SystemTime>,
}

fn identity(path: &Path) -> Option<FileIdentity> {
    let meta = std::fs::metadata(path).ok()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        Some(FileIdentity {
            dev: meta.dev(),
            ino: meta.ino(),
        })
    }
    #[cfg(not(unix))]
    {
        Some(FileIdentity {
            created: meta.created().ok(),
        })
    }
}

#[derive(Debug)]
pub enum FileEvent {
    Replaced { path: PathBuf, at: SystemTime },
}

/// Background tasks of one watched file; stopped on drop.
#[derive(Debug)]
pub struct FileWatcher {
    poller: JoinHandle<()>,
    bumper: JoinHandle<()>,
}

impl FileWatcher {
    /// Start watching `path` every `interval`, bumping `serial` on replacement.
    pub fn start(
        pool: impl Into<String>,
        path: impl Into<PathBuf>,
        interval: Duration,
        serial: Arc<AtomicU64>,
    ) -> Self {
        let pool = pool.into();
        let path = path.into();
        let (tx, mut rx) = mpsc::channel::<FileEvent>(8);

        let poller = tokio::spawn(async move {
            let mut last = identity(&path);
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let current = identity(&path);
                // A missing file is not a replacement until a new one shows up
                if current.is_some() && current != last {
                    if last.is_some() {
                        let event = FileEvent::Replaced {
                            path: path.clone(),
                            at: SystemTime::now(),
                        };
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    last = current;
                }
            }
        });

        let bumper = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let FileEvent::Replaced { path, at } = event;
                let serial = serial.fetch_add(1, Ordering::AcqRel) + 1;
                info!(
                    pool = %pool,
                    path = %path.display(),
                    serial,
                    "Database file replaced, retiring open connections"
                );
                debug!(pool = %pool, at = ?at, "File event handled");
            }
        });

        Self { poller, bumper }
    }

    pub fn stop(&self) {
        self.poller.abort();
        self.bumper.abort();
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn wait_for(serial: &AtomicU64, expected: u64) -> bool {
        for _ in 0..100 {
            if serial.load(Ordering::Acquire) >= expected {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_replaced_file_bumps_serial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.db");
        std::fs::write(&path, b"one").unwrap();

        let serial = Arc::new(AtomicU64::new(0));
        let _watcher = FileWatcher::start("w", &path, Duration::from_millis(10), serial.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(serial.load(Ordering::Acquire), 0);

        let staged = dir.path().join("data.db.new");
        std::fs::write(&staged, b"two").unwrap();
        std::fs::rename(&staged, &path).unwrap();
        assert!(wait_for(&serial, 1).await);
    }

    #[tokio::test]
    async fn test_writes_in_place_do_not_bump() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.db");
        std::fs::write(&path, b"one").unwrap();

        let serial = Arc::new(AtomicU64::new(0));
        let watcher = FileWatcher::start("w", &path, Duration::from_millis(10), serial.clone());
        std::fs::write(&path, b"two").unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        watcher.stop();
        #[cfg(unix)]
        assert_eq!(serial.load(Ordering::Acquire), 0);
    }
}
