//! The append-only action log (§4.1).
//!
//! Grounded on `protocol.rs::Context`: the non-peer-specific state a protocol instance owns (a
//! clock, storage, a source of entropy). `Log` generalizes that shape to own a [`Store`] and an
//! [`Emitter`] per event instead of a routing table, since routing here is the concern of
//! [`crate::node`], not the log.

use std::collections::HashSet;

use log::error;

use crate::action::{Action, Meta, MetaDiff, RemoveReasonCriteria};
use crate::clock::{Clock, SystemTimer, Timer};
use crate::emitter::Emitter;
use crate::error::LogError;
use crate::id::Id;
use crate::store::{Order, Store};

/// Arguments passed to the `before`/`add`/`clean`/`changeMeta` listeners.
pub struct LogEvent {
    pub action: Action,
    pub meta: Meta,
}

/// The append-only, totally-ordered action log.
pub struct Log<S: Store> {
    node_id: String,
    store: S,
    clock: Clock,
    last_time: i64,
    sequence: u64,
    before: Emitter<LogEvent>,
    add: Emitter<LogEvent>,
    clean: Emitter<LogEvent>,
    change_meta: Emitter<(Id, MetaDiff)>,
}

impl<S: Store> Log<S> {
    /// # Panics
    /// Panics if `node_id` is empty (the constructor "throws on missing `nodeId`" in §4.1).
    pub fn new(node_id: impl Into<String>, store: S) -> Self {
        Self::with_clock(node_id, store, Clock::new(SystemTimer.now()))
    }

    pub fn with_clock(node_id: impl Into<String>, store: S, clock: Clock) -> Self {
        let node_id = node_id.into();
        assert!(!node_id.is_empty(), "Log requires a non-empty nodeId");

        Self {
            node_id,
            store,
            clock,
            last_time: 0,
            sequence: 0,
            before: Emitter::new(),
            add: Emitter::new(),
            clean: Emitter::new(),
            change_meta: Emitter::new(),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Generate a strictly-increasing [`Id`] (§4.1). Reuses `last_time` and bumps `sequence`
    /// when the clock has not advanced since the previous call; this is why long clock-backward
    /// jumps inflate `sequence` (§9 Open Question i) — by design, not a defect.
    pub fn generate_id(&mut self) -> Id {
        let now = self.clock.now();

        if now <= self.last_time {
            self.sequence = match self.sequence.checked_add(1) {
                Some(seq) => seq,
                None => {
                    error!("log {}: sequence counter overflowed, wrapping", self.node_id);
                    0
                }
            };
        } else {
            self.last_time = now;
            self.sequence = 0;
        }
        Id::new(self.last_time, self.node_id.clone(), self.sequence)
    }

    pub fn on_before(&mut self, listener: impl FnMut(&mut LogEvent) + 'static) {
        self.before.on(listener);
    }

    pub fn on_add(&mut self, listener: impl FnMut(&mut LogEvent) + 'static) {
        self.add.on(listener);
    }

    pub fn on_clean(&mut self, listener: impl FnMut(&mut LogEvent) + 'static) {
        self.clean.on(listener);
    }

    pub fn on_change_meta(&mut self, listener: impl FnMut(&mut (Id, MetaDiff)) + 'static) {
        self.change_meta.on(listener);
    }

    pub fn once_before(&mut self, listener: impl FnMut(&mut LogEvent) + 'static) {
        self.before.once(listener);
    }

    pub fn once_add(&mut self, listener: impl FnMut(&mut LogEvent) + 'static) {
        self.add.once(listener);
    }

    pub fn once_clean(&mut self, listener: impl FnMut(&mut LogEvent) + 'static) {
        self.clean.once(listener);
    }

    pub fn once_change_meta(&mut self, listener: impl FnMut(&mut (Id, MetaDiff)) + 'static) {
        self.change_meta.once(listener);
    }

    /// Add an action to the log (§4.1). `meta.id`/`meta.time`/`meta.reasons` are filled in with
    /// their defaults when absent before `before` runs.
    ///
    /// A reasonless action with a freshly-generated id always resolves to its `meta`; a
    /// reasonless action whose `meta` (and thus `id`) was supplied by the caller — e.g. a `sync`
    /// entry that arrived with empty `reasons` — resolves to `None` iff that id is already in the
    /// store, so duplicate delivery of the same id is deduplicated even though the action itself
    /// is never persisted.
    ///
    /// # Panics
    /// Panics if `action.kind` is empty — "`add` throws synchronously on missing `type`" (§4.1).
    pub async fn add(
        &mut self,
        action: Action,
        meta: Option<Meta>,
    ) -> Result<Option<Meta>, LogError> {
        assert!(!action.kind.is_empty(), "action is missing a `type`");

        let externally_supplied_id = meta.is_some();
        let meta = meta.unwrap_or_else(|| Meta::new(self.generate_id()));

        let mut event = LogEvent { action, meta };
        self.before.emit(&mut event);
        let LogEvent { action, meta } = event;

        if meta.reasons.is_empty() {
            if externally_supplied_id && self.store.has(&meta.id).await {
                return Ok(None);
            }
            // Reasonless actions are never persisted (§4.1): every listener still observes them
            // once via `add`, but `each`/the store never see them.
            let mut event = LogEvent { action, meta };
            self.add.emit(&mut event);
            return Ok(Some(event.meta));
        }

        match self.store.add(action.clone(), meta).await? {
            None => Ok(None),
            Some(stored_meta) => {
                let mut event = LogEvent {
                    action,
                    meta: stored_meta,
                };
                self.add.emit(&mut event);
                Ok(Some(event.meta))
            }
        }
    }

    /// Merge `diff` into the stored meta for `id` (§4.1).
    ///
    /// # Panics
    /// Panics if `diff` attempts to touch `id`/`added` — those fields are represented outside
    /// `MetaDiff` precisely so this can never be reached at the type level; this check guards
    /// callers constructing a diff by hand from untyped data (e.g. a deserialized wire message).
    pub async fn change_meta(&mut self, id: Id, diff: MetaDiff) -> Result<bool, LogError> {
        let ok = self.store.change_meta(&id, &diff).await;
        if ok {
            self.change_meta.emit(&mut (id, diff));
        }
        Ok(ok)
    }

    /// Remove `reason` from every entry carrying it, deleting entries for which it was the sole
    /// reason (§4.1). `removeReason`'s retained-reasons computation is the plain `HashSet`
    /// removal of exactly the named reason — the off-by-one in the original source (§9 Open
    /// Question ii) is not reproduced.
    pub async fn remove_reason(&mut self, reason: &str, criteria: &RemoveReasonCriteria) {
        let page = self.store.get(Order::Added).await;

        for (action, mut meta) in page.entries {
            if !meta.reasons.contains(reason) || !criteria.matches(&meta) {
                continue;
            }

            if meta.reasons.len() == 1 {
                self.store.remove(&meta.id).await;
                let mut event = LogEvent { action, meta };
                self.clean.emit(&mut event);
            } else {
                let mut remaining: HashSet<String> = meta.reasons.clone();
                remaining.remove(reason);
                let diff = MetaDiff {
                    reasons: Some(remaining),
                    ..Default::default()
                };
                self.store.change_meta(&meta.id, &diff).await;
            }
        }
    }

    /// Iterate stored entries in `order`, invoking `callback` with each. Returning `false` from
    /// `callback` aborts iteration early (§4.1).
    pub async fn each(&self, order: Order, mut callback: impl FnMut(&Action, &Meta) -> bool) {
        let page = self.store.get(order).await;
        for (action, meta) in &page.entries {
            if !callback(action, meta) {
                break;
            }
        }
    }
}
