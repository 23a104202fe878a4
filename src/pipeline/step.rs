use crate::error::BoxError;
use std::fmt;
use std::sync::Arc;

type TransformFn<P> = dyn Fn(P) -> Result<P, BoxError> + Send + Sync;
type PredicateFn<P> = dyn Fn(&P) -> Result<bool, BoxError> + Send + Sync;
type TapFn<P> = dyn Fn(&P) -> Result<(), BoxError> + Send + Sync;

/// One stage of an [`OperationChain`](super::OperationChain).
pub enum Step<P> {
    /// Replaces the running value. An error suppresses the payload.
    Transform(Arc<TransformFn<P>>),
    /// Stops the chain when it returns `false`. An error counts as `true`.
    Filter(Arc<PredicateFn<P>>),
    /// Observes the running value. Errors are reported and ignored.
    Tap(Arc<TapFn<P>>),
}

impl<P: 'static> Step<P> {
    pub fn transform<F>(f: F) -> Self
    where
        F: Fn(P) -> P + Send + Sync + 'static,
    {
        Self::Transform(transform_fn(move |payload| Ok(f(payload))))
    }

    pub fn try_transform<F, E>(f: F) -> Self
    where
        F: Fn(P) -> Result<P, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        Self::Transform(transform_fn(move |payload| f(payload).map_err(Into::into)))
    }

    pub fn filter<F>(f: F) -> Self
    where
        F: Fn(&P) -> bool + Send + Sync + 'static,
    {
        Self::Filter(predicate_fn(move |payload| Ok(f(payload))))
    }

    pub fn try_filter<F, E>(f: F) -> Self
    where
        F: Fn(&P) -> Result<bool, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        Self::Filter(predicate_fn(move |payload| f(payload).map_err(Into::into)))
    }

    pub fn tap<F>(f: F) -> Self
    where
        F: Fn(&P) + Send + Sync + 'static,
    {
        Self::Tap(tap_fn(move |payload| {
            f(payload);
            Ok(())
        }))
    }

    pub fn try_tap<F, E>(f: F) -> Self
    where
        F: Fn(&P) -> Result<(), E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        Self::Tap(tap_fn(move |payload| f(payload).map_err(Into::into)))
    }
}

impl<P> Step<P> {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transform(_) => "transform",
            Self::Filter(_) => "filter",
            Self::Tap(_) => "tap",
        }
    }
}

fn transform_fn<P, F>(f: F) -> Arc<TransformFn<P>>
where
    F: Fn(P) -> Result<P, BoxError> + Send + Sync + 'static,
{
    Arc::new(f)
}

fn predicate_fn<P, F>(f: F) -> Arc<PredicateFn<P>>
where
    F: Fn(&P) -> Result<bool, BoxError> + Send + Sync + 'static,
{
    Arc::new(f)
}

fn tap_fn<P, F>(f: F) -> Arc<TapFn<P>>
where
    F: Fn(&P) -> Result<(), BoxError> + Send + Sync + 'static,
{
    Arc::new(f)
}

impl<P> Clone for Step<P> {
    fn clone(&self) -> Self {
        match self {
            Self::Transform(f) => Self::Transform(Arc::clone(f)),
            Self::Filter(f) => Self::Filter(Arc::clone(f)),
            Self::Tap(f) => Self::Tap(Arc::clone(f)),
        }
    }
}

impl<P> fmt::Debug for Step<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}
