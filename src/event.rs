use std::fmt::Debug;
use std::hash::Hash;

/// Key naming a class of events. Usually a fieldless enum, or `&'static str`.
pub trait EventName: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T: Clone + Eq + Hash + Debug + Send + Sync + 'static> EventName for T {}

pub trait Payload: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Payload for T {}

/// Registry slot addressed by subscription management calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic<N> {
    /// Listeners bound to one event name.
    Event(N),
    /// Wildcard listeners, which observe every emission.
    Any,
}

impl<N> From<N> for Topic<N> {
    #[inline]
    fn from(name: N) -> Self {
        Topic::Event(name)
    }
}

/// What a wildcard listener receives: the originating event name and the
/// processed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope<N, P> {
    pub name: N,
    pub data: P,
}
