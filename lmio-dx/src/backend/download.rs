//! Abortable downloads

use futures::future::{abortable, AbortHandle, BoxFuture, FutureExt};
use lmio_common::{Error, Result};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Handle that cancels a [`Download`]
///
/// Aborting is idempotent and harmless once the download has finished.
#[derive(Debug, Clone)]
pub struct DownloadHandle(AbortHandle);

impl DownloadHandle {
    pub fn abort(&self) {
        self.0.abort();
    }

    pub fn is_aborted(&self) -> bool {
        self.0.is_aborted()
    }
}

/// A fetch that resolves to `Result<T>` and can be cancelled through its handle
pub struct Download<T> {
    inner: BoxFuture<'static, Result<T>>,
    handle: DownloadHandle,
}

impl<T: Send + 'static> Download<T> {
    pub fn new<F>(what: impl Into<String>, fut: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let what = what.into();
        let (fut, handle) = abortable(fut);
        let inner = fut
            .map(move |outcome| outcome.unwrap_or_else(|_| Err(Error::Aborted(what))))
            .boxed();

        Self {
            inner,
            handle: DownloadHandle(handle),
        }
    }

    /// A download that fails immediately (validation errors found before any request)
    pub fn failed(err: Error) -> Self {
        Self::new("failed", async move { Err(err) })
    }

    pub fn handle(&self) -> DownloadHandle {
        self.handle.clone()
    }

    pub fn abort(&self) {
        self.handle.abort();
    }
}

impl<T> Future for Download<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut().inner.poll_unpin(cx)
    }
}
