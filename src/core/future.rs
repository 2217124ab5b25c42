//! Single-assignment asynchronous results.
//!
//! A [`Promise`] runs its worker on its own tokio task as soon as it is
//! created. Any number of holders may await [`Promise::get`]; the worker runs
//! once and every caller observes the same cached value.

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::future::Future;

/// A cloneable handle to a value that is produced at most once.
pub struct Promise<T: Clone> {
    inner: Shared<BoxFuture<'static, T>>,
}

impl<T> Promise<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Start `worker` immediately and return a handle to its result.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<F>(worker: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        let handle = tokio::spawn(worker);
        let inner = async move {
            match handle.await {
                Ok(value) => value,
                Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
                Err(err) => panic!("promise worker was aborted: {err}"),
            }
        }
        .boxed()
        .shared();

        Self { inner }
    }

    /// Wrap an already-known value.
    pub fn of(value: T) -> Self {
        Self {
            inner: futures::future::ready(value).boxed().shared(),
        }
    }

    /// Wait for the value. Repeated calls return the cached result.
    pub async fn get(&self) -> T {
        self.inner.clone().await
    }

    /// The value, if it has already been produced and observed.
    pub fn peek(&self) -> Option<T> {
        self.inner.peek().cloned()
    }

    /// Combine promises into one that resolves to every result, in order.
    ///
    /// Failures carried in `T` do not short-circuit: all promises are awaited.
    pub fn all_of(promises: Vec<Promise<T>>) -> Promise<Vec<T>> {
        Promise::spawn(async move {
            let mut values = Vec::with_capacity(promises.len());
            for promise in &promises {
                values.push(promise.get().await);
            }
            values
        })
    }
}

impl<T: Clone> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone> std::fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise").finish_non_exhaustive()
    }
}
