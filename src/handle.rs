use crate::error::OnceError;
use futures::future::BoxFuture;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Options for [`Emitter::once`](crate::Emitter::once).
#[derive(Debug, Clone, Default)]
pub struct OnceOptions {
    pub(crate) timeout: Option<Duration>,
    pub(crate) signal: Option<CancellationToken>,
}

impl OnceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail with [`OnceError::Timeout`] if nothing arrives within `timeout`.
    /// A zero duration means no timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout).filter(|timeout| !timeout.is_zero());
        self
    }

    /// Fail with [`OnceError::Aborted`] once `signal` is cancelled.
    pub fn signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }
}

/// Pending result of a one-shot subscription.
///
/// The listener is registered as soon as the handle is created, so events
/// emitted before the first poll are not missed. Dropping the handle
/// removes the listener.
#[must_use = "dropping the handle unsubscribes the one-shot listener"]
pub struct OnceHandle<P> {
    inner: BoxFuture<'static, Result<P, OnceError>>,
}

impl<P> OnceHandle<P> {
    pub(crate) fn new(inner: BoxFuture<'static, Result<P, OnceError>>) -> Self {
        Self { inner }
    }
}

impl<P> Future for OnceHandle<P> {
    /// The received payload, or why none will arrive.
    type Output = Result<P, OnceError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut().inner.as_mut().poll(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_timeout_means_none() {
        assert_eq!(OnceOptions::new().timeout(Duration::ZERO).timeout, None);
        assert_eq!(
            OnceOptions::new().timeout(Duration::from_millis(3)).timeout,
            Some(Duration::from_millis(3))
        );
    }

    #[tokio::test]
    async fn handle_forwards_inner_future() {
        use futures::FutureExt;

        let handle: OnceHandle<u8> = OnceHandle::new(async { Ok(9) }.boxed());
        assert_eq!(handle.await, Ok(9));
    }
}
