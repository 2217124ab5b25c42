//! Supervision of long-running background processes.
//!
//! A [`ProcessSupervisor`] owns every action started through it. All actions
//! share one cancellation token: the first action to fail with a real error
//! cancels the others. [`ProcessSupervisor::wait`] joins every action and
//! reports that first error.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Error;

/// Registry of background actions with a single join point.
#[derive(Clone)]
pub struct ProcessSupervisor {
    inner: Arc<Inner>,
}

struct Inner {
    token: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
    first_error: Mutex<Option<Error>>,
}

impl ProcessSupervisor {
    /// Create a supervisor whose token is a child of `parent`.
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            inner: Arc::new(Inner {
                token: parent.child_token(),
                handles: Mutex::new(Vec::new()),
                first_error: Mutex::new(None),
            }),
        }
    }

    /// The token shared by all supervised actions.
    pub fn token(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    /// Cancel every supervised action.
    pub fn cancel(&self) {
        self.inner.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Start `action` in the background with the shared token.
    pub fn start<F, Fut>(&self, action: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let work = action(self.token());
        let handle = tokio::spawn(async move {
            match work.await {
                Ok(()) => {}
                Err(err) if err.is_cancelled() => debug!("supervised action cancelled"),
                Err(err) => inner.record(err),
            }
        });
        lock(&self.inner.handles).push(handle);
    }

    /// Wait for every action, including ones started while waiting.
    ///
    /// Returns the first non-cancellation error, if any.
    pub async fn wait(&self) -> Result<(), Error> {
        loop {
            let batch = std::mem::take(&mut *lock(&self.inner.handles));
            if batch.is_empty() {
                break;
            }
            for handle in batch {
                if let Err(join_err) = handle.await {
                    if join_err.is_panic() {
                        self.inner.record(Error::Panicked(join_err.to_string()));
                    }
                }
            }
        }

        match lock(&self.inner.first_error).take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Inner {
    fn record(&self, err: Error) {
        let mut first = lock(&self.first_error);
        if first.is_none() {
            warn!(error = %err, "supervised action failed, stopping the rest");
            *first = Some(err);
            self.token.cancel();
        } else {
            debug!(error = %err, "supervised action failed after shutdown began");
        }
    }
}

impl std::fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
