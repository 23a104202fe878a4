mod builder;
mod step;

use crate::error::{Error, Result};
use crate::event::{EventName, Payload};
use std::fmt;
use std::sync::Arc;
use tracing::{error, trace, warn};

pub use builder::*;
pub use step::*;

/// Immutable, ordered list of steps bound to one event name.
///
/// Appending returns a new chain and leaves `self` untouched, so a chain
/// captured for an in-flight emission is never affected by later builder
/// calls.
pub struct OperationChain<N, P> {
    event: N,
    steps: Arc<[Step<P>]>,
}

impl<N: EventName, P: Payload> OperationChain<N, P> {
    pub fn new(event: N) -> Self {
        Self {
            event,
            steps: Arc::from(Vec::new()),
        }
    }

    pub fn event(&self) -> &N {
        &self.event
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[Step<P>] {
        &self.steps
    }

    #[must_use]
    pub fn then(&self, step: Step<P>) -> Self {
        let mut steps = self.steps.to_vec();
        steps.push(step);
        Self {
            event: self.event.clone(),
            steps: steps.into(),
        }
    }

    #[must_use]
    pub fn transform<F>(&self, f: F) -> Self
    where
        F: Fn(P) -> P + Send + Sync + 'static,
    {
        self.then(Step::transform(f))
    }

    #[must_use]
    pub fn filter<F>(&self, f: F) -> Self
    where
        F: Fn(&P) -> bool + Send + Sync + 'static,
    {
        self.then(Step::filter(f))
    }

    #[must_use]
    pub fn tap<F>(&self, f: F) -> Self
    where
        F: Fn(&P) + Send + Sync + 'static,
    {
        self.then(Step::tap(f))
    }

    /// Appends `other`'s steps after this chain's.
    ///
    /// # Errors
    ///
    /// [`Error::ChainMismatch`] if the chains belong to different events.
    pub fn compose(&self, other: &Self) -> Result<Self> {
        if self.event != other.event {
            return Err(Error::ChainMismatch {
                expected: format!("{:?}", self.event),
                found: format!("{:?}", other.event),
            });
        }
        let steps: Vec<_> = self.steps.iter().chain(other.steps.iter()).cloned().collect();
        Ok(Self {
            event: self.event.clone(),
            steps: steps.into(),
        })
    }

    /// Runs `payload` through every step. `None` means the payload was
    /// suppressed, by a filter or by a failed transform.
    pub fn execute(&self, payload: P) -> Option<P> {
        let mut value = payload;
        for (index, step) in self.steps.iter().enumerate() {
            match step {
                Step::Transform(f) => match f(value) {
                    Ok(next) => value = next,
                    Err(err) => {
                        error!(
                            target: "evpipe::chain",
                            event = ?self.event,
                            step = index,
                            error = %err,
                            "transform failed, payload suppressed"
                        );
                        return None;
                    }
                },
                Step::Filter(f) => match f(&value) {
                    Ok(true) => {}
                    Ok(false) => {
                        trace!(target: "evpipe::chain", event = ?self.event, step = index, "filtered out");
                        return None;
                    }
                    Err(err) => {
                        warn!(
                            target: "evpipe::chain",
                            event = ?self.event,
                            step = index,
                            error = %err,
                            "filter failed, keeping payload"
                        );
                    }
                },
                Step::Tap(f) => {
                    if let Err(err) = f(&value) {
                        warn!(
                            target: "evpipe::chain",
                            event = ?self.event,
                            step = index,
                            error = %err,
                            "tap failed"
                        );
                    }
                }
            }
        }
        Some(value)
    }
}

impl<N: Clone, P> Clone for OperationChain<N, P> {
    fn clone(&self) -> Self {
        Self {
            event: self.event.clone(),
            steps: Arc::clone(&self.steps),
        }
    }
}

impl<N: fmt::Debug, P> fmt::Debug for OperationChain<N, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationChain")
            .field("event", &self.event)
            .field("steps", &self.steps)
            .finish()
    }
}
