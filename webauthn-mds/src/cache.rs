//! A load-once cell shared by the metadata sources that fetch their content lazily.
//!
//! The first caller performs the load while concurrent callers block on a condition
//! variable, so a source is never fetched twice in parallel. A successful load is kept
//! forever. A failed load is recorded, handed to the callers that were waiting on it, and
//! retried by the next caller to arrive.

use crate::error::{MdsError, MdsResult};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

/// The observable state of a [LoadOnce] cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheStatus {
    /// Nothing has been loaded yet.
    Uninitialized,
    /// A load is in progress.
    Loading,
    /// The content is loaded and complete.
    Ready,
    /// The content is loaded, but some entries were malformed and left out. This is
    /// served like [CacheStatus::Ready] and never reloaded.
    Poisoned {
        /// Number of entries left out.
        skipped: usize,
    },
    /// The last load failed. The next access will retry.
    Failed {
        /// Why the load failed.
        reason: String,
    },
}

/// The result of a successful load.
#[derive(Debug)]
pub struct Loaded<T> {
    /// The loaded content.
    pub value: T,
    /// Number of entries of the source that were left out as malformed.
    pub skipped: usize,
}

impl<T> Loaded<T> {
    /// A load where nothing was skipped.
    pub fn complete(value: T) -> Self {
        Loaded { value, skipped: 0 }
    }
}

enum CacheState<T> {
    Uninitialized,
    Loading,
    Ready(Arc<T>),
    Poisoned(Arc<T>, usize),
    Failed(String),
}

/// A value that is loaded on first access.
pub struct LoadOnce<T> {
    state: Mutex<CacheState<T>>,
    loaded: Condvar,
}

impl<T> std::fmt::Debug for LoadOnce<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadOnce")
            .field("status", &self.status())
            .finish()
    }
}

impl<T> Default for LoadOnce<T> {
    fn default() -> Self {
        LoadOnce {
            state: Mutex::new(CacheState::Uninitialized),
            loaded: Condvar::new(),
        }
    }
}

// Resets a load that never completed, e.g. because the loader panicked, so that waiters
// are released instead of blocking forever.
struct LoadingGuard<'a, T> {
    cell: &'a LoadOnce<T>,
    armed: bool,
}

impl<'a, T> Drop for LoadingGuard<'a, T> {
    fn drop(&mut self) {
        if self.armed {
            *self.cell.lock() = CacheState::Failed("the load was abandoned".to_string());
            self.cell.loaded.notify_all();
        }
    }
}

impl<T> LoadOnce<T> {
    /// Create an empty cell.
    pub fn new() -> Self {
        Self::default()
    }

    // The state is only ever replaced whole, so it stays consistent even if a holder of
    // the lock panicked.
    fn lock(&self) -> MutexGuard<'_, CacheState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The current state of the cell.
    pub fn status(&self) -> CacheStatus {
        match &*self.lock() {
            CacheState::Uninitialized => CacheStatus::Uninitialized,
            CacheState::Loading => CacheStatus::Loading,
            CacheState::Ready(_) => CacheStatus::Ready,
            CacheState::Poisoned(_, skipped) => CacheStatus::Poisoned { skipped: *skipped },
            CacheState::Failed(reason) => CacheStatus::Failed {
                reason: reason.clone(),
            },
        }
    }

    /// Return the loaded value, running `load` if no value is present yet.
    pub fn get_or_load<F>(&self, load: F) -> MdsResult<Arc<T>>
    where
        F: FnOnce() -> MdsResult<Loaded<T>>,
    {
        let mut guard = self.lock();
        let mut waited = false;
        loop {
            match &*guard {
                CacheState::Ready(value) | CacheState::Poisoned(value, _) => {
                    return Ok(value.clone())
                }
                CacheState::Loading => {
                    waited = true;
                    guard = self
                        .loaded
                        .wait(guard)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                CacheState::Failed(reason) if waited => {
                    return Err(MdsError::PreviousLoadFailed(reason.clone()));
                }
                CacheState::Uninitialized | CacheState::Failed(_) => {
                    *guard = CacheState::Loading;
                    break;
                }
            }
        }
        drop(guard);

        let mut loading = LoadingGuard {
            cell: self,
            armed: true,
        };
        let result = load();

        let mut guard = self.lock();
        loading.armed = false;
        let outcome = match result {
            Ok(Loaded { value, skipped }) => {
                let value = Arc::new(value);
                *guard = if skipped > 0 {
                    warn!(?skipped, "metadata loaded with skipped entries");
                    CacheState::Poisoned(value.clone(), skipped)
                } else {
                    CacheState::Ready(value.clone())
                };
                Ok(value)
            }
            Err(e) => {
                *guard = CacheState::Failed(e.to_string());
                Err(e)
            }
        };
        drop(guard);
        self.loaded.notify_all();
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn loads_once() {
        let cell: LoadOnce<u32> = LoadOnce::new();
        assert_eq!(cell.status(), CacheStatus::Uninitialized);
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let v = cell
                .get_or_load(|| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Loaded::complete(7))
                })
                .expect("load");
            assert_eq!(*v, 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cell.status(), CacheStatus::Ready);
    }

    #[test]
    fn failure_is_retried() {
        let cell: LoadOnce<u32> = LoadOnce::new();
        let err = cell
            .get_or_load(|| Err(MdsError::Transport("down".to_string())))
            .expect_err("fail");
        assert!(matches!(err, MdsError::Transport(_)));
        assert!(matches!(cell.status(), CacheStatus::Failed { .. }));

        let v = cell.get_or_load(|| Ok(Loaded::complete(1))).expect("retry");
        assert_eq!(*v, 1);
        assert_eq!(cell.status(), CacheStatus::Ready);
    }

    #[test]
    fn poisoned_is_served_and_stable() {
        let cell: LoadOnce<u32> = LoadOnce::new();
        let v = cell
            .get_or_load(|| Ok(Loaded { value: 3, skipped: 2 }))
            .expect("load");
        assert_eq!(*v, 3);
        assert_eq!(cell.status(), CacheStatus::Poisoned { skipped: 2 });

        let v = cell
            .get_or_load(|| Ok(Loaded::complete(99)))
            .expect("cached");
        assert_eq!(*v, 3);
        assert_eq!(cell.status(), CacheStatus::Poisoned { skipped: 2 });
    }

    #[test]
    fn concurrent_callers_block_on_one_load() {
        let cell: Arc<LoadOnce<u32>> = Arc::new(LoadOnce::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cell = cell.clone();
                let calls = calls.clone();
                thread::spawn(move || {
                    cell.get_or_load(|| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(50));
                        Ok(Loaded::complete(5))
                    })
                    .map(|v| *v)
                })
            })
            .collect();

        for h in handles {
            assert_eq!(h.join().expect("join").expect("load"), 5);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_loader_releases_waiters() {
        let cell: Arc<LoadOnce<u32>> = Arc::new(LoadOnce::new());
        let c = cell.clone();
        let res = thread::spawn(move || {
            let _ = c.get_or_load(|| -> MdsResult<Loaded<u32>> {
                std::panic::resume_unwind(Box::new("loader failed"))
            });
        })
        .join();
        assert!(res.is_err());
        assert!(matches!(cell.status(), CacheStatus::Failed { .. }));
        assert_eq!(*cell.get_or_load(|| Ok(Loaded::complete(2))).expect("retry"), 2);
    }
}
