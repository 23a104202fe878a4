use crate::Emitter;
use crate::error::BoxError;
use crate::event::{EventName, Payload};
use crate::pipeline::{OperationChain, Step};
use std::fmt::Debug;
use std::time::Duration;
use tracing::info;

/// Fluent handle for attaching steps and timing gates to one event.
///
/// Every step call extends whatever chain the emitter currently has bound
/// for the event, so builders obtained at different times never overwrite
/// each other's steps. The returned builder only needs to be kept to
/// chain further calls.
pub struct OperationBuilder<N: EventName, P: Payload> {
    emitter: Emitter<N, P>,
    chain: OperationChain<N, P>,
}

impl<N: EventName, P: Payload> OperationBuilder<N, P> {
    pub(crate) fn new(emitter: Emitter<N, P>, chain: OperationChain<N, P>) -> Self {
        Self { emitter, chain }
    }

    pub fn event(&self) -> &N {
        self.chain.event()
    }

    /// The chain as of this builder's last step.
    pub fn chain(&self) -> &OperationChain<N, P> {
        &self.chain
    }

    pub fn step(self, step: Step<P>) -> Self {
        let chain = self.emitter.append_step(&self.chain, step);
        Self {
            emitter: self.emitter,
            chain,
        }
    }

    pub fn transform<F>(self, f: F) -> Self
    where
        F: Fn(P) -> P + Send + Sync + 'static,
    {
        self.step(Step::transform(f))
    }

    pub fn try_transform<F, E>(self, f: F) -> Self
    where
        F: Fn(P) -> Result<P, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        self.step(Step::try_transform(f))
    }

    pub fn filter<F>(self, f: F) -> Self
    where
        F: Fn(&P) -> bool + Send + Sync + 'static,
    {
        self.step(Step::filter(f))
    }

    pub fn try_filter<F, E>(self, f: F) -> Self
    where
        F: Fn(&P) -> Result<bool, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        self.step(Step::try_filter(f))
    }

    pub fn tap<F>(self, f: F) -> Self
    where
        F: Fn(&P) + Send + Sync + 'static,
    {
        self.step(Step::tap(f))
    }

    pub fn try_tap<F, E>(self, f: F) -> Self
    where
        F: Fn(&P) -> Result<(), E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        self.step(Step::try_tap(f))
    }

    /// Logs each payload passing this point at `INFO`.
    pub fn log(self) -> Self
    where
        P: Debug,
    {
        let event = self.event().clone();
        self.tap(move |payload| info!(target: "evpipe::log", event = ?event, payload = ?payload))
    }

    pub fn log_labeled(self, label: impl Into<String>) -> Self
    where
        P: Debug,
    {
        let event = self.event().clone();
        let label = label.into();
        self.tap(move |payload| {
            info!(target: "evpipe::log", event = ?event, payload = ?payload, "{label}");
        })
    }

    /// Coalesces bursts of emissions into one delivery of the latest payload,
    /// `delay` after the last emission. Does not touch the chain.
    ///
    /// The delay timer runs on the ambient tokio runtime. An emission made
    /// outside a runtime cannot be held back and is delivered immediately,
    /// with a warning.
    pub fn debounce(self, delay: Duration) -> Self {
        self.emitter.set_debounce(self.event().clone(), delay);
        self
    }

    /// Drops emissions arriving less than `delay` after the last accepted one.
    pub fn throttle(self, delay: Duration) -> Self {
        self.emitter.set_throttle(self.event().clone(), delay);
        self
    }
}

impl<N: EventName, P: Payload> Clone for OperationBuilder<N, P> {
    fn clone(&self) -> Self {
        Self {
            emitter: self.emitter.clone(),
            chain: self.chain.clone(),
        }
    }
}
