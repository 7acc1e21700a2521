//! State observation and message dispatch shared by every state machine.

use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Handle returned when registering an observer; pass it back to
/// [`Observable::unobserve`] on teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Observer<S> = Box<dyn FnMut(&S) + Send>;

/// Holds a state value and notifies observers on every assignment.
///
/// Observers run synchronously, in registration order, once per call to
/// [`Observable::set`]. They receive a shared reference to the new state and
/// cannot mutate it.
pub struct Observable<S> {
    value: S,
    observers: Vec<(ObserverId, Observer<S>)>,
    next_id: u64,
}

impl<S> Observable<S> {
    pub fn new(value: S) -> Self {
        Self {
            value,
            observers: Vec::new(),
            next_id: 0,
        }
    }

    pub fn get(&self) -> &S {
        &self.value
    }

    pub fn set(&mut self, value: S) {
        self.value = value;
        for (_, observer) in &mut self.observers {
            observer(&self.value);
        }
    }

    pub fn observe(&mut self, observer: impl FnMut(&S) + Send + 'static) -> ObserverId {
        let id = ObserverId(self.next_id);
        self.next_id += 1;
        self.observers.push((id, Box::new(observer)));
        id
    }

    /// Returns `false` when `id` was not registered.
    pub fn unobserve(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(observer_id, _)| *observer_id != id);
        self.observers.len() != before
    }
}

impl<S: fmt::Debug> fmt::Debug for Observable<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable")
            .field("value", &self.value)
            .field("observers", &self.observers.len())
            .finish()
    }
}

/// Delivers messages produced by background tasks back to the owner of a
/// state machine, which applies them on its own serialized context.
pub type Dispatch<M> = Arc<dyn Fn(M) + Send + Sync>;

/// Dispatch backed by an unbounded channel. Messages sent after the
/// receiver is gone are dropped.
pub fn channel_dispatch<M: Send + 'static>() -> (Dispatch<M>, mpsc::UnboundedReceiver<M>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let dispatch: Dispatch<M> = Arc::new(move |message| {
        let _ = tx.send(message);
    });
    (dispatch, rx)
}

/// Adapts a dispatch so that child messages are wrapped into the parent's
/// message type.
pub fn map_dispatch<M, C>(
    dispatch: Dispatch<M>,
    wrap: impl Fn(C) -> M + Send + Sync + 'static,
) -> Dispatch<C>
where
    M: 'static,
    C: 'static,
{
    Arc::new(move |message| dispatch(wrap(message)))
}
