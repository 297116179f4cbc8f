//! A small synchronous, registration-ordered multi-listener emitter.
//!
//! [`crate::log::Log`] uses one of these per event name (`before`, `add`, `clean`, `changeMeta`)
//! rather than a single [`nakamoto_net::Publisher`]-style sink, since more than one [`crate::node`]
//! can observe the same log. Listeners run synchronously, in registration order, on the caller's
//! stack — there is no queueing or async dispatch here.

/// Handle returned by [`Emitter::on`]. Dropping it does *not* unsubscribe; call
/// [`Emitter::remove`] explicitly (mirrors the "capture the handle, release on teardown"
/// guidance in the design notes: forgetting to do so leaks a listener, not memory-unsafety).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(usize);

enum Slot<F> {
    Listener(F),
    Once(F),
    Removed,
}

/// An emitter for a single event carrying arguments of type `A`.
///
/// Listeners are plain `FnMut`, not `Send` — node/log state is shared via `Rc<RefCell<_>>`
/// (§5's single-threaded cooperative model), so a `Send` bound here would reject the very
/// closures this exists to support.
pub struct Emitter<A> {
    listeners: Vec<Slot<Box<dyn FnMut(&mut A)>>>,
    next_id: usize,
}

impl<A> Default for Emitter<A> {
    fn default() -> Self {
        Self {
            listeners: Vec::new(),
            next_id: 0,
        }
    }
}

impl<A> Emitter<A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener that runs on every future `emit`.
    pub fn on(&mut self, listener: impl FnMut(&mut A) + 'static) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners.push(Slot::Listener(Box::new(listener)));
        id
    }

    /// Register a listener that runs on only the next `emit`, then unregisters itself.
    pub fn once(&mut self, listener: impl FnMut(&mut A) + 'static) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners.push(Slot::Once(Box::new(listener)));
        id
    }

    /// Unregister a previously-registered listener. No-op if already removed.
    pub fn remove(&mut self, id: ListenerId) {
        if let Some(slot) = self.listeners.get_mut(id.0) {
            *slot = Slot::Removed;
        }
    }

    /// Run every live listener, in registration order, against `args`. `once` listeners run and
    /// are then removed.
    pub fn emit(&mut self, args: &mut A) {
        for slot in self.listeners.iter_mut() {
            match slot {
                Slot::Listener(f) => f(args),
                Slot::Once(_) => {
                    if let Slot::Once(mut f) = std::mem::replace(slot, Slot::Removed) {
                        f(args);
                    }
                }
                Slot::Removed => {}
            }
        }
    }

    /// Drop every listener. Called on teardown (`Node::destroy`, `Log` drop).
    pub fn clear(&mut self) {
        self.listeners.clear();
    }

    pub fn len(&self) -> usize {
        self.listeners
            .iter()
            .filter(|s| matches!(s, Slot::Listener(_) | Slot::Once(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<A> std::fmt::Debug for Emitter<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("listeners", &self.len())
            .finish()
    }
}
