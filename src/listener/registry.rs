use super::{Handler, Listener, ListenerId};
use crate::event::{Envelope, EventName, Topic};
use indexmap::IndexMap;

type Wildcard<N, P> = Listener<Envelope<N, P>>;

/// Listeners taken out of the registry.
///
/// Returned instead of dropped in place so that callers can release the
/// emitter lock before any captured state of the callbacks is destroyed.
#[must_use]
pub(crate) struct Evicted<N, P> {
    named: Vec<Listener<P>>,
    wildcard: Vec<Wildcard<N, P>>,
}

impl<N, P> Evicted<N, P> {
    fn none() -> Self {
        Self {
            named: Vec::new(),
            wildcard: Vec::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.named.len() + self.wildcard.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether any evicted listener was still live, i.e. not already
    /// retired by its cancellation signal.
    pub(crate) fn any_live(&self) -> bool {
        self.named.iter().any(|listener| !listener.is_cancelled())
            || self.wildcard.iter().any(|listener| !listener.is_cancelled())
    }
}

/// Per-name listener sets plus the wildcard list. Names keep the order in
/// which they first gained a listener.
pub(crate) struct Registry<N, P> {
    named: IndexMap<N, Vec<Listener<P>>>,
    wildcard: Vec<Wildcard<N, P>>,
}

impl<N: EventName, P> Registry<N, P> {
    pub(crate) fn new() -> Self {
        Self {
            named: IndexMap::new(),
            wildcard: Vec::new(),
        }
    }

    /// Appends a listener and returns the new size of its set, along with
    /// any cancelled listeners swept out of that set on the way.
    pub(crate) fn insert(&mut self, name: N, listener: Listener<P>) -> (usize, Evicted<N, P>) {
        let slot = self.named.entry(name).or_default();
        let evicted = Evicted {
            named: sweep(slot),
            wildcard: Vec::new(),
        };
        slot.push(listener);
        (slot.len(), evicted)
    }

    pub(crate) fn insert_any(&mut self, listener: Wildcard<N, P>) -> (usize, Evicted<N, P>) {
        let evicted = Evicted {
            named: Vec::new(),
            wildcard: sweep(&mut self.wildcard),
        };
        self.wildcard.push(listener);
        (self.wildcard.len(), evicted)
    }

    pub(crate) fn remove(&mut self, topic: &Topic<N>, id: ListenerId) -> Evicted<N, P> {
        match topic {
            Topic::Event(name) => self.remove_named(name, |listener| listener.id == id),
            Topic::Any => self.remove_wildcard(|listener| listener.id == id),
        }
    }

    pub(crate) fn remove_handler(&mut self, name: &N, handler: &Handler<P>) -> Evicted<N, P> {
        self.remove_named(name, |listener| listener.handler.same(handler))
    }

    pub(crate) fn remove_any_handler(&mut self, handler: &Handler<Envelope<N, P>>) -> Evicted<N, P> {
        self.remove_wildcard(|listener| listener.handler.same(handler))
    }

    fn remove_named(&mut self, name: &N, matches: impl Fn(&Listener<P>) -> bool) -> Evicted<N, P> {
        let mut evicted = Evicted::none();
        let Some(slot) = self.named.get_mut(name) else {
            return evicted;
        };
        if let Some(position) = slot.iter().position(matches) {
            evicted.named.push(slot.remove(position));
        }
        if slot.is_empty() {
            self.named.shift_remove(name);
        }
        evicted
    }

    fn remove_wildcard(&mut self, matches: impl Fn(&Wildcard<N, P>) -> bool) -> Evicted<N, P> {
        let mut evicted = Evicted::none();
        if let Some(position) = self.wildcard.iter().position(matches) {
            evicted.wildcard.push(self.wildcard.remove(position));
        }
        evicted
    }

    pub(crate) fn count(&self, topic: &Topic<N>) -> usize {
        match topic {
            Topic::Event(name) => self.named.get(name).map_or(0, |slot| live(slot).count()),
            Topic::Any => live(&self.wildcard).count(),
        }
    }

    pub(crate) fn ids(&self, topic: &Topic<N>) -> Vec<ListenerId> {
        match topic {
            Topic::Event(name) => self
                .named
                .get(name)
                .map(|slot| live(slot).map(|listener| listener.id).collect())
                .unwrap_or_default(),
            Topic::Any => live(&self.wildcard).map(|listener| listener.id).collect(),
        }
    }

    pub(crate) fn active_names(&self) -> Vec<N> {
        self.named
            .iter()
            .filter(|(_, slot)| live(slot).next().is_some())
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub(crate) fn find(&self, name: &N, id: ListenerId) -> Option<Listener<P>> {
        live(self.named.get(name)?)
            .find(|listener| listener.id == id)
            .cloned()
    }

    /// Copies the invocation lists for one emission of `name`. Listeners
    /// whose signal fired but which are not yet removed are left out.
    pub(crate) fn snapshot(&self, name: &N) -> (Vec<Listener<P>>, Vec<Wildcard<N, P>>) {
        let named = self
            .named
            .get(name)
            .map(|slot| live(slot).cloned().collect())
            .unwrap_or_default();
        (named, live(&self.wildcard).cloned().collect())
    }

    /// Removes one name's listeners, or everything when `name` is `None`.
    pub(crate) fn clear(&mut self, name: Option<&N>) -> Evicted<N, P> {
        match name {
            Some(name) => Evicted {
                named: self.named.shift_remove(name).unwrap_or_default(),
                wildcard: Vec::new(),
            },
            None => {
                let named = std::mem::take(&mut self.named)
                    .into_values()
                    .flatten()
                    .collect();
                let wildcard = std::mem::take(&mut self.wildcard);
                Evicted { named, wildcard }
            }
        }
    }
}

fn live<A>(slot: &[Listener<A>]) -> impl Iterator<Item = &Listener<A>> {
    slot.iter().filter(|listener| !listener.is_cancelled())
}

/// Takes cancelled listeners out of `slot`. Allocates only when there is
/// something to take.
fn sweep<A>(slot: &mut Vec<Listener<A>>) -> Vec<Listener<A>> {
    if !slot.iter().any(Listener::is_cancelled) {
        return Vec::new();
    }
    let (cancelled, kept): (Vec<_>, Vec<_>) = std::mem::take(slot)
        .into_iter()
        .partition(Listener::is_cancelled);
    *slot = kept;
    cancelled
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio_util::sync::CancellationToken;

    fn listener<A: 'static>(id: u64) -> Listener<A> {
        Listener::new(ListenerId::new(id), Handler::new(|_: &A| ()), None)
    }

    fn bound<A: 'static>(id: u64, token: &CancellationToken) -> Listener<A> {
        Listener::new(
            ListenerId::new(id),
            Handler::new(|_: &A| ()),
            Some(token.clone()),
        )
    }

    fn add(registry: &mut Registry<&'static str, u32>, name: &'static str, listener: Listener<u32>) -> usize {
        registry.insert(name, listener).0
    }

    fn add_any(registry: &mut Registry<&'static str, u32>, listener: Wildcard<&'static str, u32>) -> usize {
        registry.insert_any(listener).0
    }

    #[test]
    fn insert_reports_slot_size() {
        let mut registry = Registry::new();
        assert_eq!(add(&mut registry, "a", listener(1)), 1);
        assert_eq!(add(&mut registry, "a", listener(2)), 2);
        assert_eq!(add(&mut registry, "b", listener(3)), 1);
        assert_eq!(add_any(&mut registry, listener(4)), 1);

        assert_eq!(registry.count(&Topic::Event("a")), 2);
        assert_eq!(registry.count(&Topic::Any), 1);
        assert_eq!(registry.count(&Topic::Event("missing")), 0);
    }

    #[test]
    fn remove_by_id_targets_one_slot() {
        let mut registry = Registry::new();
        add(&mut registry, "a", listener(1));
        add_any(&mut registry, listener(2));

        assert!(registry.remove(&Topic::Event("a"), ListenerId::new(2)).is_empty());
        assert_eq!(registry.remove(&Topic::Any, ListenerId::new(2)).len(), 1);
        assert_eq!(registry.remove(&Topic::Event("a"), ListenerId::new(1)).len(), 1);
        assert!(registry.active_names().is_empty());
    }

    #[test]
    fn remove_by_handler_uses_identity() {
        let mut registry = Registry::new();
        let shared = Handler::new(|_: &u32| ());
        let lookalike = Handler::new(|_: &u32| ());
        add(
            &mut registry,
            "a",
            Listener::new(ListenerId::new(1), shared.clone(), None),
        );

        assert!(registry.remove_handler(&"a", &lookalike).is_empty());
        assert_eq!(registry.remove_handler(&"a", &shared).len(), 1);
        assert_eq!(registry.count(&Topic::Event("a")), 0);
    }

    #[test]
    fn active_names_exclude_wildcard_only() {
        let mut registry = Registry::new();
        add(&mut registry, "b", listener(1));
        add(&mut registry, "a", listener(2));
        add_any(&mut registry, listener(3));

        assert_eq!(registry.active_names(), vec!["b", "a"]);
    }

    #[test]
    fn cancelled_listeners_are_hidden_before_removal() {
        let mut registry = Registry::new();
        let token = CancellationToken::new();
        add(&mut registry, "a", bound(1, &token));
        add(&mut registry, "a", listener(2));
        add(&mut registry, "b", bound(3, &token));
        add_any(&mut registry, bound(4, &token));
        token.cancel();

        assert_eq!(registry.ids(&Topic::Event("a")), vec![ListenerId::new(2)]);
        assert_eq!(registry.count(&Topic::Any), 0);
        assert_eq!(registry.active_names(), vec!["a"]);
        assert!(registry.find(&"a", ListenerId::new(1)).is_none());

        let (named, wildcard) = registry.snapshot(&"a");
        assert_eq!(named.len(), 1);
        assert!(wildcard.is_empty());
    }

    #[test]
    fn insert_sweeps_cancelled_from_its_slot() {
        let mut registry = Registry::new();
        let token = CancellationToken::new();
        add(&mut registry, "a", bound(1, &token));
        add(&mut registry, "b", bound(2, &token));
        token.cancel();

        let (count, evicted) = registry.insert("a", listener(3));
        assert_eq!(count, 1);
        assert_eq!(evicted.len(), 1);
        assert!(!evicted.any_live());

        let (count, evicted) = registry.insert("a", listener(4));
        assert_eq!(count, 2);
        assert!(evicted.is_empty());
    }

    #[test]
    fn removing_a_cancelled_listener_is_not_live() {
        let mut registry = Registry::new();
        let token = CancellationToken::new();
        add(&mut registry, "a", bound(1, &token));
        token.cancel();

        let evicted = registry.remove(&Topic::Event("a"), ListenerId::new(1));
        assert_eq!(evicted.len(), 1);
        assert!(!evicted.any_live());
        assert!(registry.active_names().is_empty());
    }

    #[test]
    fn clear_single_name_keeps_others() {
        let mut registry = Registry::new();
        add(&mut registry, "a", listener(1));
        add(&mut registry, "b", listener(2));
        add_any(&mut registry, listener(3));

        assert_eq!(registry.clear(Some(&"a")).len(), 1);
        assert_eq!(registry.active_names(), vec!["b"]);
        assert_eq!(registry.count(&Topic::Any), 1);

        assert_eq!(registry.clear(None).len(), 2);
        assert!(registry.active_names().is_empty());
        assert_eq!(registry.count(&Topic::Any), 0);
    }

    #[test]
    fn snapshot_is_detached_from_registry() {
        let mut registry = Registry::new();
        add(&mut registry, "a", listener(1));
        let (named, wildcard) = registry.snapshot(&"a");
        let _evicted = registry.clear(None);

        assert_eq!(named.len(), 1);
        assert!(wildcard.is_empty());
        assert!(registry.find(&"a", ListenerId::new(1)).is_none());
    }
}
