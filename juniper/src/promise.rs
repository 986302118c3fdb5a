//! A handle to a value computed on its own task.
//!
//! ```ignore
//! let posts = Promise::new(async move { Ok(store.list().await?) });
//! let posts = posts.resolve().await?;
//! ```

use std::future::Future;

use futures_util::future::join_all;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::warn;

#[derive(Debug, Error)]
pub enum PromiseError {
    #[error("promise rejected: {0:#}")]
    Rejected(anyhow::Error),
    #[error("promise task panicked")]
    Panicked,
    #[error("promise task was cancelled")]
    Cancelled,
}

impl PromiseError {
    /// The rejection reason, or this error itself when the task never finished.
    pub fn into_anyhow(self) -> anyhow::Error {
        match self {
            PromiseError::Rejected(err) => err,
            other => anyhow::Error::new(other),
        }
    }
}

pub struct Promise<T> {
    handle: JoinHandle<anyhow::Result<T>>,
}

impl<T: Send + 'static> Promise<T> {
    /// Starts `future` on a new task right away.
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self {
            handle: tokio::spawn(future),
        }
    }

    pub fn resolved(value: T) -> Self {
        Self::new(async move { Ok(value) })
    }

    pub fn rejected(err: anyhow::Error) -> Self {
        Self::new(async move { Err(err) })
    }

    /// Waits for the task and returns its value.
    pub async fn resolve(self) -> Result<T, PromiseError> {
        match self.handle.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(PromiseError::Rejected(err)),
            Err(join_err) if join_err.is_panic() => {
                warn!(error = %join_err, "promise task panicked");
                Err(PromiseError::Panicked)
            }
            Err(_) => Err(PromiseError::Cancelled),
        }
    }

    /// Runs `on_ok` or `on_err` once settled. The returned promise settles
    /// after the callback has run.
    pub fn then<OnOk, OnErr>(self, on_ok: OnOk, on_err: OnErr) -> Promise<()>
    where
        OnOk: FnOnce(T) + Send + 'static,
        OnErr: FnOnce(PromiseError) + Send + 'static,
    {
        Promise::new(async move {
            match self.resolve().await {
                Ok(value) => on_ok(value),
                Err(err) => on_err(err),
            }
            Ok(())
        })
    }

    /// Observes a rejection without handling it; the outcome passes through.
    pub fn catch<OnErr>(self, on_err: OnErr) -> Promise<T>
    where
        OnErr: FnOnce(&PromiseError) + Send + 'static,
    {
        Promise::new(async move {
            self.resolve().await.map_err(|err| {
                on_err(&err);
                err.into_anyhow()
            })
        })
    }

    /// Runs `on_done` after the promise settles either way.
    pub fn finally<OnDone>(self, on_done: OnDone) -> Promise<T>
    where
        OnDone: FnOnce() + Send + 'static,
    {
        Promise::new(async move {
            let outcome = self.resolve().await;
            on_done();
            outcome.map_err(PromiseError::into_anyhow)
        })
    }

    /// Resolves to every value in input order, or to the first rejection in
    /// input order.
    pub fn all(promises: Vec<Promise<T>>) -> Promise<Vec<T>> {
        Promise::new(async move {
            let outcomes = join_all(promises.into_iter().map(Promise::resolve)).await;
            outcomes
                .into_iter()
                .map(|outcome| outcome.map_err(PromiseError::into_anyhow))
                .collect()
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::anyhow;

    use super::{Promise, PromiseError};

    #[tokio::test]
    async fn resolve_returns_value_or_rejection() {
        assert_eq!(Promise::resolved(5).resolve().await.unwrap(), 5);

        let err = Promise::<i32>::rejected(anyhow!("boom"))
            .resolve()
            .await
            .unwrap_err();
        assert!(matches!(err, PromiseError::Rejected(_)));
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn panics_are_reported() {
        let fail = true;
        let promise: Promise<i32> = Promise::new(async move {
            if fail {
                panic!("task blew up");
            }
            Ok(1)
        });
        assert!(matches!(
            promise.resolve().await,
            Err(PromiseError::Panicked)
        ));
    }

    #[tokio::test]
    async fn all_keeps_input_order() {
        let slow = Promise::new(async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok(1)
        });
        let fast = Promise::resolved(2);

        let values = Promise::all(vec![slow, fast]).resolve().await.unwrap();
        assert_eq!(values, vec![1, 2]);
    }

    #[tokio::test]
    async fn all_reports_first_rejection_in_order() {
        let first = Promise::new(async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Err::<i32, _>(anyhow!("first"))
        });
        let second = Promise::<i32>::rejected(anyhow!("second"));

        let err = Promise::all(vec![first, Promise::resolved(3), second])
            .resolve()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("first"));
    }

    #[tokio::test]
    async fn then_runs_matching_callback() {
        let hits = Arc::new(AtomicUsize::new(0));

        let ok_hits = Arc::clone(&hits);
        Promise::resolved(10)
            .then(
                move |value| {
                    ok_hits.fetch_add(value, Ordering::SeqCst);
                },
                |_| panic!("unexpected rejection"),
            )
            .resolve()
            .await
            .unwrap();

        let err_hits = Arc::clone(&hits);
        Promise::<usize>::rejected(anyhow!("no"))
            .then(
                |_| panic!("unexpected value"),
                move |_| {
                    err_hits.fetch_add(1, Ordering::SeqCst);
                },
            )
            .resolve()
            .await
            .unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 11);
    }

    #[tokio::test]
    async fn catch_and_finally_pass_outcome_through() {
        let caught = Arc::new(AtomicBool::new(false));
        let done = Arc::new(AtomicBool::new(false));

        let caught_flag = Arc::clone(&caught);
        let done_flag = Arc::clone(&done);
        let err = Promise::<i32>::rejected(anyhow!("bad"))
            .catch(move |_| caught_flag.store(true, Ordering::SeqCst))
            .finally(move || done_flag.store(true, Ordering::SeqCst))
            .resolve()
            .await
            .unwrap_err();

        assert!(caught.load(Ordering::SeqCst));
        assert!(done.load(Ordering::SeqCst));
        assert!(err.to_string().contains("bad"));

        let value = Promise::resolved(4).finally(|| {}).resolve().await.unwrap();
        assert_eq!(value, 4);
    }
}
