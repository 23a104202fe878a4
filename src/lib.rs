//! Typed in-process event emitter with per-event operation pipelines.
//!
//! Listeners subscribe to an event name (or to every event through the
//! wildcard [`Topic::Any`]). Each emission passes through optional
//! debounce/throttle gates and the event's [`OperationChain`] of
//! transform/filter/tap steps before being fanned out. Listener and step
//! failures are isolated and reported through `tracing`.
//!
//! ```no_run
//! use evpipe::{Emitter, OnceOptions};
//! use std::time::Duration;
//!
//! # async fn demo() {
//! let emitter: Emitter<&str, i32> = Emitter::new();
//! emitter.subscribe("n", |x: &i32| println!("got {x}"));
//! emitter.operations("n").transform(|x| x + 1).filter(|x| *x < 5);
//!
//! assert!(emitter.emit("n", 3));
//! assert!(!emitter.emit("n", 5));
//!
//! let next = emitter.once("n", OnceOptions::new().timeout(Duration::from_secs(1)));
//! emitter.emit("n", 1);
//! assert_eq!(next.await, Ok(2));
//! # }
//! ```

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

mod config;
mod emitter;
mod error;
mod event;
mod handle;
mod listener;
mod pipeline;
mod timing;

pub use tokio_util::sync::CancellationToken;
pub use {config::*, emitter::Emitter, error::*, event::*, handle::*, pipeline::*};
pub use listener::{Handler, ListenerId, Outcome};

#[cfg(test)]
pub(crate) mod test_support {
    use tracing_subscriber::EnvFilter;

    /// Routes `tracing` output to the test harness. Safe to call repeatedly.
    pub(crate) fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
}
