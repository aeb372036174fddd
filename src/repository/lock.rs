use super::RepositoryError;
use fd_lock::RwLock;
use std::fs::OpenOptions;
use std::path::PathBuf;
use tokio::sync::{oneshot, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// Exclusive ownership of the working copy.
///
/// Only [`RepositoryCoordinator::acquire_lock`](super::RepositoryCoordinator::acquire_lock)
/// creates one. Dropping it releases the OS file lock and then the in-process
/// mutex, on every exit path.
#[must_use = "the repository is unlocked as soon as the lock is dropped"]
pub struct RepositoryLock {
    coordinator: Uuid,
    sequence: u64,
    _file: FileLockHandle,
    _guard: OwnedMutexGuard<()>,
}

impl RepositoryLock {
    pub(super) fn new(
        coordinator: Uuid,
        sequence: u64,
        file: FileLockHandle,
        guard: OwnedMutexGuard<()>,
    ) -> Self {
        Self {
            coordinator,
            sequence,
            _file: file,
            _guard: guard,
        }
    }

    pub(super) fn coordinator(&self) -> Uuid {
        self.coordinator
    }

    /// Monotonic acquisition number, for logs
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl std::fmt::Debug for RepositoryLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryLock")
            .field("coordinator", &self.coordinator)
            .field("sequence", &self.sequence)
            .finish()
    }
}

impl Drop for RepositoryLock {
    fn drop(&mut self) {
        debug!(sequence = self.sequence, "Repository lock released");
    }
}

/// Held OS file lock. The lock lives on a dedicated thread because the
/// fd-lock guard borrows its file; dropping the handle lets the thread unlock.
pub(super) struct FileLockHandle {
    _release: oneshot::Sender<()>,
}

/// Wait for the OS-level lock on `path`, honoring cancellation.
///
/// If the wait is cancelled the holder thread still finishes acquiring, finds
/// nobody waiting, and unlocks immediately.
pub(super) async fn acquire_file_lock(
    path: PathBuf,
    cancel: &CancellationToken,
) -> Result<FileLockHandle, RepositoryError> {
    let (acquired_tx, acquired_rx) = oneshot::channel::<std::io::Result<()>>();
    let (release_tx, release_rx) = oneshot::channel::<()>();

    std::thread::Builder::new()
        .name("merge-gate-lock".to_string())
        .spawn(move || {
            let file = match OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&path)
            {
                Ok(file) => file,
                Err(e) => {
                    let _ = acquired_tx.send(Err(e));
                    return;
                }
            };

            let mut lock = RwLock::new(file);
            let guard = match lock.write() {
                Ok(guard) => guard,
                Err(e) => {
                    let _ = acquired_tx.send(Err(e));
                    return;
                }
            };

            if acquired_tx.send(Ok(())).is_err() {
                return;
            }
            // Sender dropped or signalled, either way release
            let _ = release_rx.blocking_recv();
            drop(guard);
        })?;

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RepositoryError::Cancelled),
        acquired = acquired_rx => match acquired {
            Ok(Ok(())) => Ok(FileLockHandle { _release: release_tx }),
            Ok(Err(e)) => Err(RepositoryError::Io(e)),
            Err(_) => Err(RepositoryError::operation("lock", "lock holder thread exited")),
        },
    }
}
