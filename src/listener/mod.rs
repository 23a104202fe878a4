mod registry;
mod with_times;

use crate::error::BoxError;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::{CancellationToken, DropGuard};

pub(crate) use registry::Registry;
pub(crate) use with_times::WithTimes;

/// Identity of a registered listener. Allocated from a per-emitter counter
/// and never reused within that emitter's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    #[inline]
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Return values a listener callback may produce.
///
/// `()` always succeeds; `Result<(), E>` reports its error to the
/// diagnostic channel without disturbing other listeners.
pub trait Outcome {
    fn into_result(self) -> Result<(), BoxError>;
}

impl Outcome for () {
    #[inline]
    fn into_result(self) -> Result<(), BoxError> {
        Ok(())
    }
}

impl<E: Into<BoxError>> Outcome for Result<(), E> {
    #[inline]
    fn into_result(self) -> Result<(), BoxError> {
        self.map_err(Into::into)
    }
}

type HandlerFn<A> = dyn Fn(&A) -> Result<(), BoxError> + Send + Sync;

/// Shared listener callback with reference identity.
///
/// Clones point at the same callback, so a clone passed to
/// [`Emitter::unsubscribe_handler`](crate::Emitter::unsubscribe_handler)
/// removes the listener registered with the original.
pub struct Handler<A>(Arc<HandlerFn<A>>);

impl<A> Handler<A> {
    pub fn new<F, R>(f: F) -> Self
    where
        F: Fn(&A) -> R + Send + Sync + 'static,
        R: Outcome,
    {
        Self(erase(move |arg: &A| f(arg).into_result()))
    }

    #[inline]
    pub(crate) fn call(&self, arg: &A) -> Result<(), BoxError> {
        (self.0)(arg)
    }

    /// Whether both handles refer to the same callback.
    #[inline]
    pub fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

fn erase<A, F>(f: F) -> Arc<HandlerFn<A>>
where
    F: Fn(&A) -> Result<(), BoxError> + Send + Sync + 'static,
{
    Arc::new(f)
}

impl<A> Clone for Handler<A> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<A> fmt::Debug for Handler<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handler")
            .field(&Arc::as_ptr(&self.0).cast::<()>())
            .finish()
    }
}

pub(crate) struct Listener<A> {
    pub(crate) id: ListenerId,
    pub(crate) handler: Handler<A>,
    cancel: Option<CancellationToken>,
    retired: Option<Arc<DropGuard>>,
}

impl<A> Listener<A> {
    pub(crate) fn new(id: ListenerId, handler: Handler<A>, cancel: Option<CancellationToken>) -> Self {
        Self {
            id,
            handler,
            cancel,
            retired: None,
        }
    }

    #[inline]
    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    /// Token cancelled once the last copy of this listener is dropped.
    pub(crate) fn retirement(&mut self) -> CancellationToken {
        let token = CancellationToken::new();
        self.retired = Some(Arc::new(token.clone().drop_guard()));
        token
    }
}

impl<A> Clone for Listener<A> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            handler: self.handler.clone(),
            cancel: self.cancel.clone(),
            retired: self.retired.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listener_id_display() {
        assert_eq!(ListenerId::new(7).to_string(), "listener-7");
    }

    #[test]
    fn handler_clones_share_identity() {
        let a = Handler::new(|_: &u8| ());
        let b = a.clone();
        let c = Handler::new(|_: &u8| ());

        assert!(a.same(&b));
        assert!(!a.same(&c));
    }

    #[test]
    fn fallible_handler_surfaces_error() {
        let handler = Handler::new(|value: &i32| {
            if *value < 0 {
                Err(format!("negative: {value}"))
            } else {
                Ok(())
            }
        });

        assert!(handler.call(&1).is_ok());
        let err = handler.call(&-1).unwrap_err();
        assert_eq!(err.to_string(), "negative: -1");
    }

    #[test]
    fn listener_tracks_cancellation() {
        let token = CancellationToken::new();
        let listener = Listener::new(
            ListenerId::new(1),
            Handler::new(|_: &()| ()),
            Some(token.clone()),
        );
        assert!(!listener.is_cancelled());
        token.cancel();
        assert!(listener.is_cancelled());

        let plain = Listener::new(ListenerId::new(2), Handler::new(|_: &()| ()), None);
        assert!(!plain.is_cancelled());
    }

    #[test]
    fn retirement_fires_after_last_copy_drops() {
        let mut listener = Listener::new(ListenerId::new(1), Handler::new(|_: &()| ()), None);
        let retired = listener.retirement();
        let copy = listener.clone();

        drop(listener);
        assert!(!retired.is_cancelled());
        drop(copy);
        assert!(retired.is_cancelled());
    }
}
