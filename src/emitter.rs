use crate::config::{DEFAULT_MAX_LISTENERS, EmitterConfig, validate_max_listeners};
use crate::error::{OnceError, Result};
use crate::event::{Envelope, EventName, Payload, Topic};
use crate::handle::{OnceHandle, OnceOptions};
use crate::listener::{Handler, Listener, ListenerId, Outcome, Registry, WithTimes};
use crate::pipeline::{OperationBuilder, OperationChain, Step};
use crate::timing::{Deferred, Gate, Timing};
use crossbeam_utils::CachePadded;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, trace, warn};

struct State<N, P> {
    registry: Registry<N, P>,
    chains: HashMap<N, OperationChain<N, P>>,
    timing: Timing<N>,
    max_listeners: usize,
}

struct Inner<N, P> {
    state: Mutex<State<N, P>>,
    next_id: CachePadded<AtomicU64>,
}

/// In-process typed event emitter.
///
/// `Emitter` is a cheap handle: clones share the same listeners, chains and
/// timing state. All state sits behind one lock which is never held while a
/// listener or step runs, so callbacks may freely call back into the
/// emitter.
pub struct Emitter<N, P> {
    inner: Arc<Inner<N, P>>,
}

impl<N: EventName, P: Payload> Emitter<N, P> {
    pub fn new() -> Self {
        Self::with_max_listeners(DEFAULT_MAX_LISTENERS)
    }

    /// # Errors
    ///
    /// [`Error::InvalidMaxListeners`](crate::Error::InvalidMaxListeners) if
    /// the configured cap is negative.
    pub fn with_config(config: EmitterConfig) -> Result<Self> {
        let max_listeners = config.validate()?;
        Ok(Self::with_max_listeners(max_listeners))
    }

    fn with_max_listeners(max_listeners: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    registry: Registry::new(),
                    chains: HashMap::new(),
                    timing: Timing::new(),
                    max_listeners,
                }),
                next_id: CachePadded::new(AtomicU64::new(1)),
            }),
        }
    }

    fn from_weak(inner: &Weak<Inner<N, P>>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }

    fn next_id(&self) -> ListenerId {
        ListenerId::new(self.inner.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Runs `f` under the lock. Whatever `f` returns, evicted listeners
    /// included, is dropped by the caller after the lock is released.
    fn with_state<T>(&self, f: impl FnOnce(&mut State<N, P>) -> T) -> T {
        f(&mut self.inner.state.lock())
    }

    pub fn subscribe<F, R>(&self, name: N, f: F) -> ListenerId
    where
        F: Fn(&P) -> R + Send + Sync + 'static,
        R: Outcome,
    {
        self.bind(name, Handler::new(f), None)
    }

    /// Like [`subscribe`](Self::subscribe), removing the listener as soon as
    /// `cancel` fires. An already-cancelled token yields an id that is never
    /// registered.
    pub fn subscribe_cancel<F, R>(&self, name: N, cancel: CancellationToken, f: F) -> ListenerId
    where
        F: Fn(&P) -> R + Send + Sync + 'static,
        R: Outcome,
    {
        self.bind(name, Handler::new(f), Some(cancel))
    }

    /// Subscribes to every event. Runs after the per-name listeners of each
    /// emission.
    pub fn subscribe_any<F, R>(&self, f: F) -> ListenerId
    where
        F: Fn(&Envelope<N, P>) -> R + Send + Sync + 'static,
        R: Outcome,
    {
        self.bind_any(Handler::new(f), None)
    }

    pub fn subscribe_any_cancel<F, R>(&self, cancel: CancellationToken, f: F) -> ListenerId
    where
        F: Fn(&Envelope<N, P>) -> R + Send + Sync + 'static,
        R: Outcome,
    {
        self.bind_any(Handler::new(f), Some(cancel))
    }

    /// Registers a shared [`Handler`], which can later be removed by
    /// reference with [`unsubscribe_handler`](Self::unsubscribe_handler).
    pub fn bind(
        &self,
        name: N,
        handler: Handler<P>,
        cancel: Option<CancellationToken>,
    ) -> ListenerId {
        let id = self.next_id();
        self.register(name, id, handler, cancel);
        id
    }

    pub fn bind_any(
        &self,
        handler: Handler<Envelope<N, P>>,
        cancel: Option<CancellationToken>,
    ) -> ListenerId {
        let id = self.next_id();
        if cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            debug!(listener = %id, "signal already cancelled, wildcard listener not registered");
            return id;
        }
        let mut listener = Listener::new(id, handler, cancel.clone());
        let retired = cancel.as_ref().map(|_| listener.retirement());
        let (count, max, _swept) = self.with_state(|state| {
            let (count, swept) = state.registry.insert_any(listener);
            (count, state.max_listeners, swept)
        });
        check_limit::<N>(&Topic::Any, count, max);
        if let (Some(cancel), Some(retired)) = (cancel, retired) {
            self.watch(Topic::Any, id, cancel, retired);
        }
        id
    }

    /// Returns whether the listener was registered; an already-cancelled
    /// signal skips registration.
    fn register(
        &self,
        name: N,
        id: ListenerId,
        handler: Handler<P>,
        cancel: Option<CancellationToken>,
    ) -> bool {
        if cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            debug!(event = ?name, listener = %id, "signal already cancelled, listener not registered");
            return false;
        }
        let topic = Topic::Event(name.clone());
        let mut listener = Listener::new(id, handler, cancel.clone());
        let retired = cancel.as_ref().map(|_| listener.retirement());
        let (count, max, _swept) = self.with_state(|state| {
            let (count, swept) = state.registry.insert(name, listener);
            (count, state.max_listeners, swept)
        });
        check_limit(&topic, count, max);
        if let (Some(cancel), Some(retired)) = (cancel, retired) {
            self.watch(topic, id, cancel, retired);
        }
        true
    }

    /// Unsubscribes `id` as soon as `cancel` fires. The watch ends early
    /// once the listener is gone for any other reason. Without a runtime
    /// the cancelled listener is only skipped until it is swept.
    fn watch(
        &self,
        topic: Topic<N>,
        id: ListenerId,
        cancel: CancellationToken,
        retired: CancellationToken,
    ) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            trace!(topic = ?topic, listener = %id, "no tokio runtime, cancelled listener removed lazily");
            return;
        };
        let weak = Arc::downgrade(&self.inner);
        runtime.spawn(async move {
            tokio::select! {
                () = retired.cancelled() => {}
                () = cancel.cancelled() => {
                    if let Some(emitter) = Self::from_weak(&weak) {
                        let _evicted = emitter.with_state(|state| state.registry.remove(&topic, id));
                        debug!(topic = ?topic, listener = %id, "listener removed by its signal");
                    }
                }
            }
        });
    }

    /// Subscribes a listener that removes itself after `times` invocations.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidTimes`](crate::Error::InvalidTimes) if `times` is zero.
    pub fn many<F, R>(&self, name: N, times: usize, f: F) -> Result<ListenerId>
    where
        F: Fn(&P) -> R + Send + Sync + 'static,
        R: Outcome,
    {
        let budget = WithTimes::new(times)?;
        let id = self.next_id();
        let weak = Arc::downgrade(&self.inner);
        let own = name.clone();

        let handler = Handler::new(move |payload: &P| {
            let Some(last) = budget.tick() else {
                return Ok(());
            };
            if last {
                if let Some(emitter) = Self::from_weak(&weak) {
                    emitter.unsubscribe(own.clone(), id);
                }
            }
            f(payload).into_result()
        });

        self.register(name, id, handler, None);
        Ok(id)
    }

    /// Waits for the next payload delivered to `name`.
    ///
    /// Delivery, timeout and cancellation race; the first one to happen
    /// settles the handle and the others are disarmed. The timeout is armed
    /// on the ambient tokio runtime when `once` is called, so it holds even
    /// while the handle is not being polled.
    pub fn once(&self, name: N, options: OnceOptions) -> OnceHandle<P> {
        let OnceOptions { timeout, signal } = options;
        let deadline = timeout.map(|timeout| (Instant::now() + timeout, timeout));
        let (tx, rx) = oneshot::channel();
        let slot: Arc<OnceSlot<P>> = Arc::new(Mutex::new(Some(tx)));
        let armed = Arc::downgrade(&slot);
        let id = self.next_id();
        let weak = Arc::downgrade(&self.inner);
        let own = name.clone();

        let handler = Handler::new(move |payload: &P| {
            let Some(tx) = slot.lock().take() else {
                return;
            };
            if let Some(emitter) = Self::from_weak(&weak) {
                emitter.unsubscribe(own.clone(), id);
            }
            let settled = match deadline {
                Some((deadline, timeout)) if Instant::now() >= deadline => {
                    Err(OnceError::Timeout(timeout))
                }
                _ => Ok(payload.clone()),
            };
            let _ = tx.send(settled);
        });
        let registered = self.register(name.clone(), id, handler, signal.clone());

        let disarm = CancellationToken::new();
        if let (true, Some((deadline, timeout))) = (registered, deadline) {
            self.arm_timeout(name.clone(), id, armed, deadline, timeout, disarm.clone());
        }

        let detach = Detach {
            inner: Arc::downgrade(&self.inner),
            name,
            id,
            _disarm: disarm.drop_guard(),
        };

        OnceHandle::new(
            async move {
                let _detach = detach;
                let aborted = async {
                    match &signal {
                        Some(signal) => signal.cancelled().await,
                        None => std::future::pending().await,
                    }
                };
                let expired = async move {
                    match deadline {
                        Some((deadline, timeout)) => {
                            tokio::time::sleep_until(deadline).await;
                            timeout
                        }
                        None => std::future::pending().await,
                    }
                };

                tokio::select! {
                    biased;
                    received = rx => received.unwrap_or_else(|_| {
                        if signal.as_ref().is_some_and(CancellationToken::is_cancelled) {
                            Err(OnceError::Aborted)
                        } else {
                            Err(OnceError::Detached)
                        }
                    }),
                    () = aborted => Err(OnceError::Aborted),
                    limit = expired => Err(OnceError::Timeout(limit)),
                }
            }
            .boxed(),
        )
    }

    /// Settles a pending `once` with [`OnceError::Timeout`] at `deadline`
    /// unless it was settled, removed or dropped first.
    fn arm_timeout(
        &self,
        name: N,
        id: ListenerId,
        slot: Weak<OnceSlot<P>>,
        deadline: Instant,
        timeout: Duration,
        disarm: CancellationToken,
    ) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!(event = ?name, listener = %id, "no tokio runtime for once timeout, enforced on poll and delivery");
            return;
        };
        let weak = Arc::downgrade(&self.inner);
        runtime.spawn(async move {
            tokio::select! {
                () = disarm.cancelled() => {}
                () = tokio::time::sleep_until(deadline) => {
                    let Some(tx) = take_sender(&slot) else {
                        return;
                    };
                    if let Some(emitter) = Self::from_weak(&weak) {
                        emitter.unsubscribe(name.clone(), id);
                    }
                    trace!(event = ?name, listener = %id, "once timed out");
                    let _ = tx.send(Err(OnceError::Timeout(timeout)));
                }
            }
        });
    }

    /// Removes one listener by id. `Topic::Any` addresses wildcard listeners.
    pub fn unsubscribe(&self, topic: impl Into<Topic<N>>, id: ListenerId) -> bool {
        let topic = topic.into();
        self.with_state(|state| state.registry.remove(&topic, id))
            .any_live()
    }

    /// Removes the first listener of `name` registered with `handler`.
    pub fn unsubscribe_handler(&self, name: N, handler: &Handler<P>) -> bool {
        self.with_state(|state| state.registry.remove_handler(&name, handler))
            .any_live()
    }

    pub fn unsubscribe_any_handler(&self, handler: &Handler<Envelope<N, P>>) -> bool {
        self.with_state(|state| state.registry.remove_any_handler(handler))
            .any_live()
    }

    pub fn listener_count(&self, topic: impl Into<Topic<N>>) -> usize {
        let topic = topic.into();
        self.with_state(|state| state.registry.count(&topic))
    }

    /// Registered listener ids in subscription order.
    pub fn listener_ids(&self, topic: impl Into<Topic<N>>) -> Vec<ListenerId> {
        let topic = topic.into();
        self.with_state(|state| state.registry.ids(&topic))
    }

    /// Names with at least one per-name listener. Wildcard listeners do not
    /// make a name active.
    pub fn active_event_names(&self) -> Vec<N> {
        self.with_state(|state| state.registry.active_names())
    }

    /// Builder seeded from the chain currently bound to `name`.
    pub fn operations(&self, name: N) -> OperationBuilder<N, P> {
        let chain = self
            .with_state(|state| state.chains.get(&name).cloned())
            .unwrap_or_else(|| OperationChain::new(name));
        OperationBuilder::new(self.clone(), chain)
    }

    pub fn chain(&self, name: &N) -> Option<OperationChain<N, P>> {
        self.with_state(|state| state.chains.get(name).cloned())
    }

    /// Binds `chain` to its event, replacing any chain bound before.
    pub fn bind_chain(&self, chain: OperationChain<N, P>) {
        debug!(event = ?chain.event(), steps = chain.len(), "binding operation chain");
        let _previous = self.with_state(|state| state.chains.insert(chain.event().clone(), chain));
    }

    pub(crate) fn append_step(
        &self,
        base: &OperationChain<N, P>,
        step: Step<P>,
    ) -> OperationChain<N, P> {
        let (extended, _previous) = self.with_state(|state| {
            let extended = state
                .chains
                .get(base.event())
                .unwrap_or(base)
                .then(step);
            let previous = state
                .chains
                .insert(extended.event().clone(), extended.clone());
            (extended, previous)
        });
        trace!(event = ?extended.event(), steps = extended.len(), "operation chain extended");
        extended
    }

    pub(crate) fn set_debounce(&self, name: N, delay: Duration) {
        self.with_state(|state| state.timing.set_debounce(name, delay));
    }

    pub(crate) fn set_throttle(&self, name: N, delay: Duration) {
        self.with_state(|state| state.timing.set_throttle(name, delay));
    }

    /// Emits `payload` under `name`.
    ///
    /// Returns `false` when throttled, when nobody listens, or when the
    /// chain suppressed every delivery. A debounced emission returns `true`
    /// immediately and is delivered later.
    pub fn emit(&self, name: N, payload: P) -> bool {
        let gate = self.with_state(|state| state.timing.gate(&name, payload, Instant::now()));
        match gate {
            Gate::Proceed(payload) => self.deliver(&name, payload),
            Gate::Deferred(deferred) => {
                self.defer(name, deferred);
                true
            }
            Gate::Dropped => {
                trace!(event = ?name, "emission throttled");
                false
            }
        }
    }

    fn defer(&self, name: N, deferred: Deferred<P>) {
        let Deferred {
            deadline,
            generation,
            cancel,
            payload,
        } = deferred;

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(event = ?name, "no tokio runtime for debounce timer, delivering immediately");
            if self.with_state(|state| state.timing.settle(&name, generation)) {
                self.deliver(&name, payload);
            }
            return;
        };

        trace!(event = ?name, "emission debounced");
        let weak = Arc::downgrade(&self.inner);
        runtime.spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep_until(deadline) => {
                    let Some(emitter) = Self::from_weak(&weak) else {
                        return;
                    };
                    if emitter.with_state(|state| state.timing.settle(&name, generation)) {
                        emitter.deliver(&name, payload);
                    }
                }
            }
        });
    }

    fn deliver(&self, name: &N, payload: P) -> bool {
        let (named, wildcard, chain) = self.with_state(|state| {
            let (named, wildcard) = state.registry.snapshot(name);
            (named, wildcard, state.chains.get(name).cloned())
        });

        if named.is_empty() && wildcard.is_empty() {
            trace!(event = ?name, "no listeners");
            return false;
        }

        let process = |payload: P| match &chain {
            Some(chain) => chain.execute(payload),
            None => Some(payload),
        };

        let mut delivered = false;
        if !named.is_empty() {
            if let Some(processed) = process(payload.clone()) {
                for listener in &named {
                    invoke(name, listener, &processed);
                }
                delivered = true;
            }
        }

        for listener in &wildcard {
            if let Some(data) = process(payload.clone()) {
                let envelope = Envelope {
                    name: name.clone(),
                    data,
                };
                invoke(name, listener, &envelope);
                delivered = true;
            }
        }

        delivered
    }

    /// Delivers `payload` to a single per-name listener, bypassing debounce
    /// and throttle. Returns `false` if the listener is unknown, the chain
    /// suppressed the payload, or the listener failed.
    pub fn emit_to_listener(&self, name: N, payload: P, id: ListenerId) -> bool {
        let found = self.with_state(|state| {
            let listener = state.registry.find(&name, id)?;
            Some((listener, state.chains.get(&name).cloned()))
        });
        let Some((listener, chain)) = found else {
            trace!(event = ?name, listener = %id, "targeted listener not found");
            return false;
        };

        let processed = match &chain {
            Some(chain) => chain.execute(payload),
            None => Some(payload),
        };
        match processed {
            Some(processed) => invoke(&name, &listener, &processed),
            None => false,
        }
    }

    /// Drops the listeners of `name` (or of everything, wildcard included)
    /// together with pending debounce timers and throttle history. Chains
    /// and timing configuration stay.
    pub fn remove_all_listeners(&self, name: Option<N>) {
        let evicted = self.with_state(|state| match &name {
            Some(name) => {
                state.timing.forget(name);
                state.registry.clear(Some(name))
            }
            None => {
                state.timing.forget_all();
                state.registry.clear(None)
            }
        });
        debug!(event = ?name, removed = evicted.len(), "listeners removed");
    }

    /// Drops the chain and all debounce/throttle configuration of `name`
    /// (or of every event). Listeners stay.
    pub fn remove_all_operations(&self, name: Option<N>) {
        let _chains: Vec<_> = self.with_state(|state| match &name {
            Some(name) => {
                state.timing.clear_debounce(name);
                state.timing.clear_throttle(name);
                state.chains.remove(name).into_iter().collect()
            }
            None => {
                state.timing.clear_all();
                state.chains.drain().map(|(_, chain)| chain).collect()
            }
        });
        debug!(event = ?name, "operations removed");
    }

    /// # Errors
    ///
    /// [`Error::InvalidMaxListeners`](crate::Error::InvalidMaxListeners) if
    /// `max_listeners` is negative; the previous cap is kept.
    pub fn set_max_listeners(&self, max_listeners: i64) -> Result<&Self> {
        let max_listeners = validate_max_listeners(max_listeners)?;
        self.inner.state.lock().max_listeners = max_listeners;
        Ok(self)
    }

    pub fn max_listeners(&self) -> usize {
        self.inner.state.lock().max_listeners
    }
}

fn check_limit<N: EventName>(topic: &Topic<N>, count: usize, max: usize) {
    if max > 0 && count > max {
        warn!(
            topic = ?topic,
            count,
            max,
            "listener count exceeds max listeners, possible leak"
        );
    }
}

fn invoke<N: EventName, A>(name: &N, listener: &Listener<A>, arg: &A) -> bool {
    match listener.handler.call(arg) {
        Ok(()) => true,
        Err(err) => {
            error!(
                target: "evpipe::listener",
                event = ?name,
                listener = %listener.id,
                error = %err,
                "listener failed"
            );
            false
        }
    }
}

type OnceSender<P> = oneshot::Sender<std::result::Result<P, OnceError>>;
type OnceSlot<P> = Mutex<Option<OnceSender<P>>>;

fn take_sender<P>(slot: &Weak<OnceSlot<P>>) -> Option<OnceSender<P>> {
    let slot = slot.upgrade()?;
    let tx = slot.lock().take();
    tx
}

/// Unsubscribes a `once` listener and disarms its timeout when the handle
/// settles or is dropped.
struct Detach<N: EventName, P: Payload> {
    inner: Weak<Inner<N, P>>,
    name: N,
    id: ListenerId,
    _disarm: DropGuard,
}

impl<N: EventName, P: Payload> Drop for Detach<N, P> {
    fn drop(&mut self) {
        if let Some(emitter) = Emitter::from_weak(&self.inner) {
            emitter.unsubscribe(self.name.clone(), self.id);
        }
    }
}

impl<N, P> Clone for Emitter<N, P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<N: EventName, P: Payload> Default for Emitter<N, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: EventName, P: Payload> fmt::Debug for Emitter<N, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("max_listeners", &self.max_listeners())
            .field("active_events", &self.active_event_names())
            .finish_non_exhaustive()
    }
}
