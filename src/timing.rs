//! Debounce and throttle gates applied to raw emissions before they reach
//! the operation chain.

use crate::event::EventName;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub(crate) enum Gate<P> {
    /// Deliver now.
    Proceed(P),
    /// Held back by debounce; the caller must arm a timer for it.
    Deferred(Deferred<P>),
    /// Rejected by throttle.
    Dropped,
}

pub(crate) struct Deferred<P> {
    pub(crate) deadline: Instant,
    pub(crate) generation: u64,
    pub(crate) cancel: CancellationToken,
    pub(crate) payload: P,
}

/// Record of the single debounced emission waiting for its timer.
struct Pending {
    generation: u64,
    cancel: CancellationToken,
}

pub(crate) struct Timing<N> {
    debounce: HashMap<N, Duration>,
    throttle: HashMap<N, Duration>,
    pending: HashMap<N, Pending>,
    last_fire: HashMap<N, Instant>,
    generation: u64,
}

impl<N: EventName> Timing<N> {
    pub(crate) fn new() -> Self {
        Self {
            debounce: HashMap::new(),
            throttle: HashMap::new(),
            pending: HashMap::new(),
            last_fire: HashMap::new(),
            generation: 0,
        }
    }

    /// Reconfiguring supersedes any emission already waiting on the old delay.
    pub(crate) fn set_debounce(&mut self, name: N, delay: Duration) {
        self.cancel_pending(&name);
        self.debounce.insert(name, delay);
    }

    pub(crate) fn set_throttle(&mut self, name: N, delay: Duration) {
        self.throttle.insert(name, delay);
    }

    #[cfg(test)]
    pub(crate) fn debounce_delay(&self, name: &N) -> Option<Duration> {
        self.debounce.get(name).copied()
    }

    #[cfg(test)]
    pub(crate) fn throttle_delay(&self, name: &N) -> Option<Duration> {
        self.throttle.get(name).copied()
    }

    pub(crate) fn gate<P>(&mut self, name: &N, payload: P, now: Instant) -> Gate<P> {
        if let Some(&delay) = self.throttle.get(name) {
            if let Some(&last) = self.last_fire.get(name) {
                if now.saturating_duration_since(last) < delay {
                    return Gate::Dropped;
                }
            }
            self.last_fire.insert(name.clone(), now);
        }

        let Some(&delay) = self.debounce.get(name) else {
            return Gate::Proceed(payload);
        };

        self.cancel_pending(name);
        self.generation = self.generation.wrapping_add(1);
        let cancel = CancellationToken::new();
        self.pending.insert(
            name.clone(),
            Pending {
                generation: self.generation,
                cancel: cancel.clone(),
            },
        );

        Gate::Deferred(Deferred {
            deadline: now + delay,
            generation: self.generation,
            cancel,
            payload,
        })
    }

    /// Called when a debounce timer fires. Returns whether `generation` is
    /// still the pending emission for `name`, clearing the record if so.
    pub(crate) fn settle(&mut self, name: &N, generation: u64) -> bool {
        match self.pending.get(name) {
            Some(pending) if pending.generation == generation => {
                self.pending.remove(name);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn cancel_pending(&mut self, name: &N) {
        if let Some(pending) = self.pending.remove(name) {
            pending.cancel.cancel();
        }
    }

    /// Drops runtime state for `name` but keeps its configuration.
    pub(crate) fn forget(&mut self, name: &N) {
        self.cancel_pending(name);
        self.last_fire.remove(name);
    }

    pub(crate) fn forget_all(&mut self) {
        for (_, pending) in self.pending.drain() {
            pending.cancel.cancel();
        }
        self.last_fire.clear();
    }

    pub(crate) fn clear_debounce(&mut self, name: &N) {
        self.debounce.remove(name);
        self.cancel_pending(name);
    }

    pub(crate) fn clear_throttle(&mut self, name: &N) {
        self.throttle.remove(name);
        self.last_fire.remove(name);
    }

    pub(crate) fn clear_all(&mut self) {
        self.forget_all();
        self.debounce.clear();
        self.throttle.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn unconfigured_names_proceed() {
        let mut timing = Timing::new();
        assert!(matches!(
            timing.gate(&"a", 1, Instant::now()),
            Gate::Proceed(1)
        ));
    }

    #[test]
    fn throttle_drops_inside_window() {
        let mut timing = Timing::new();
        timing.set_throttle("a", ms(10));
        let start = Instant::now();

        assert!(matches!(timing.gate(&"a", 0, start), Gate::Proceed(0)));
        assert!(matches!(timing.gate(&"a", 5, start + ms(5)), Gate::Dropped));
        assert!(matches!(
            timing.gate(&"a", 15, start + ms(15)),
            Gate::Proceed(15)
        ));
        // the dropped emission at t=5 did not move the window
        assert!(matches!(timing.gate(&"a", 20, start + ms(20)), Gate::Dropped));
    }

    #[test]
    fn debounce_supersedes_pending_emission() {
        let mut timing = Timing::new();
        timing.set_debounce("a", ms(10));
        let start = Instant::now();

        let Gate::Deferred(first) = timing.gate(&"a", 1, start) else {
            panic!("expected deferral");
        };
        let Gate::Deferred(second) = timing.gate(&"a", 2, start + ms(5)) else {
            panic!("expected deferral");
        };

        assert!(first.cancel.is_cancelled());
        assert!(!second.cancel.is_cancelled());
        assert_eq!(second.deadline, start + ms(15));
        assert_eq!(second.payload, 2);

        assert!(!timing.settle(&"a", first.generation));
        assert!(timing.settle(&"a", second.generation));
        assert!(!timing.settle(&"a", second.generation));
    }

    #[test]
    fn throttle_rejection_skips_debounce() {
        let mut timing = Timing::new();
        timing.set_throttle("a", ms(10));
        timing.set_debounce("a", ms(10));
        let start = Instant::now();

        let Gate::Deferred(first) = timing.gate(&"a", 1, start) else {
            panic!("expected deferral");
        };
        assert!(matches!(timing.gate(&"a", 2, start + ms(1)), Gate::Dropped));
        assert!(!first.cancel.is_cancelled());
    }

    #[test]
    fn forget_keeps_configuration() {
        let mut timing = Timing::new();
        timing.set_debounce("a", ms(10));
        timing.set_throttle("a", ms(10));
        let start = Instant::now();
        let Gate::Deferred(pending) = timing.gate(&"a", 1, start) else {
            panic!("expected deferral");
        };

        timing.forget(&"a");

        assert!(pending.cancel.is_cancelled());
        assert_eq!(timing.debounce_delay(&"a"), Some(ms(10)));
        assert_eq!(timing.throttle_delay(&"a"), Some(ms(10)));
        // last-fire record is gone, so the next emission is not throttled
        assert!(matches!(
            timing.gate(&"a", 2, start + ms(1)),
            Gate::Deferred(_)
        ));
    }

    #[test]
    fn clearing_configuration() {
        let mut timing = Timing::new();
        timing.set_debounce("a", ms(10));
        timing.set_throttle("b", ms(10));
        let Gate::Deferred(pending) = timing.gate(&"a", 1, Instant::now()) else {
            panic!("expected deferral");
        };

        timing.clear_debounce(&"a");
        assert!(pending.cancel.is_cancelled());
        assert_eq!(timing.debounce_delay(&"a"), None);
        assert!(matches!(timing.gate(&"a", 2, Instant::now()), Gate::Proceed(2)));

        timing.clear_all();
        assert_eq!(timing.throttle_delay(&"b"), None);
    }

    #[test]
    fn reconfiguring_debounce_cancels_pending() {
        let mut timing = Timing::new();
        timing.set_debounce("a", ms(10));
        let Gate::Deferred(pending) = timing.gate(&"a", 1, Instant::now()) else {
            panic!("expected deferral");
        };
        timing.set_debounce("a", ms(20));
        assert!(pending.cancel.is_cancelled());
        assert!(!timing.settle(&"a", pending.generation));
    }
}
