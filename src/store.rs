//! The Store contract (§4.2) and its in-memory reference implementation.
//!
//! `Store` is deliberately narrow — a capability interface, not a full database trait — so that a
//! persistent implementation can satisfy the same conformance suite as [`MemoryStore`] (§9).

use std::cmp::Reverse;
use std::collections::HashMap;

use async_trait::async_trait;

use crate::action::{Action, Meta, MetaDiff};
use crate::error::StoreError;
use crate::id::Id;

/// Iteration order for [`Store::get`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    /// Descending by `meta.added` (the default).
    Added,
    /// Descending by `meta.id`, via `is_first_older`.
    Created,
}

/// A page of `(action, meta)` pairs returned by [`Store::get`]. The in-memory reference store
/// always returns every matching entry in one page (`next: None`); the cursor type exists so a
/// paginated persistent store can report more to fetch.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub entries: Vec<(Action, Meta)>,
    pub next: Option<PageCursor>,
}

/// Opaque resume point for a paginated `Store::get` implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor(pub u64);

/// Per-peer sync watermarks, in `added`-space (§3 "Sync cursor").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LastSynced {
    pub sent: u64,
    pub received: u64,
}

/// The Store contract (§4.2, §6).
#[async_trait(?Send)]
pub trait Store {
    /// Persist `(action, meta)`. Returns the stored `meta` (with `added` assigned), or `None`
    /// if `meta.id` was already present (the wire/JS contract's `false`).
    async fn add(&mut self, action: Action, meta: Meta) -> Result<Option<Meta>, StoreError>;

    /// Return every currently-stored entry in the given order, as a single page (§4.2).
    async fn get(&self, order: Order) -> Page;

    /// Look up a stored entry by id.
    async fn by_id(&self, id: &Id) -> Option<(Action, Meta)>;

    /// Whether `id` is currently stored.
    async fn has(&self, id: &Id) -> bool;

    /// Remove the entry for `id`. Returns whether anything was removed.
    async fn remove(&mut self, id: &Id) -> bool;

    /// Merge `diff` into the stored meta for `id`. Returns `false` if `id` is unknown.
    async fn change_meta(&mut self, id: &Id, diff: &MetaDiff) -> bool;

    /// The highest `added` assigned so far (`0` if the store is empty).
    async fn last_added(&self) -> u64;

    /// Sync watermarks for `peer_id`, if any have been recorded.
    async fn last_synced(&self, peer_id: &str) -> LastSynced;

    /// Record updated sync watermarks for `peer_id`. Fields left `None` are unchanged.
    async fn set_last_synced(&mut self, peer_id: &str, sent: Option<u64>, received: Option<u64>);
}

/// Reference in-memory [`Store`] (§4.2): two parallel vectors ordered by `added` descending, plus
/// an `added` counter and per-peer sync watermarks.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Vec<(Action, Meta)>,
    added_counter: u64,
    synced: HashMap<String, LastSynced>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn index_of(&self, id: &Id) -> Option<usize> {
        self.entries.iter().position(|(_, m)| &m.id == id)
    }
}

#[async_trait(?Send)]
impl Store for MemoryStore {
    async fn add(&mut self, action: Action, mut meta: Meta) -> Result<Option<Meta>, StoreError> {
        if self.index_of(&meta.id).is_some() {
            return Ok(None);
        }
        self.added_counter += 1;
        meta.added = Some(self.added_counter);
        // Kept sorted descending by `added` at insertion time (always the front: `added` only grows).
        self.entries.insert(0, (action, meta.clone()));

        Ok(Some(meta))
    }

    async fn get(&self, order: Order) -> Page {
        let mut entries = self.entries.clone();
        match order {
            // Already maintained in descending-`added` order.
            Order::Added => {}
            Order::Created => {
                entries.sort_by_key(|(_, m)| Reverse(m.id.clone()));
            }
        }
        Page {
            entries,
            next: None,
        }
    }

    async fn by_id(&self, id: &Id) -> Option<(Action, Meta)> {
        self.index_of(id).map(|ix| self.entries[ix].clone())
    }

    async fn has(&self, id: &Id) -> bool {
        self.index_of(id).is_some()
    }

    async fn remove(&mut self, id: &Id) -> bool {
        match self.index_of(id) {
            Some(ix) => {
                self.entries.remove(ix);
                true
            }
            None => false,
        }
    }

    async fn change_meta(&mut self, id: &Id, diff: &MetaDiff) -> bool {
        match self.index_of(id) {
            Some(ix) => {
                diff.apply(&mut self.entries[ix].1);
                true
            }
            None => false,
        }
    }

    async fn last_added(&self) -> u64 {
        self.added_counter
    }

    async fn last_synced(&self, peer_id: &str) -> LastSynced {
        self.synced.get(peer_id).copied().unwrap_or_default()
    }

    async fn set_last_synced(&mut self, peer_id: &str, sent: Option<u64>, received: Option<u64>) {
        let entry = self.synced.entry(peer_id.to_string()).or_default();
        if let Some(sent) = sent {
            entry.sent = sent;
        }
        if let Some(received) = received {
            entry.received = received;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action() -> Action {
        Action::new("test/add")
    }

    fn meta(time: i64, seq: u64, reasons: &[&str]) -> Meta {
        Meta::new(Id::new(time, "1", seq))
            .with_reasons(reasons.iter().map(|s| s.to_string()))
    }

    #[tokio::test]
    async fn add_rejects_duplicate_ids() {
        let mut store = MemoryStore::new();
        let id = Id::new(1, "1", 0);

        assert!(store
            .add(action(), Meta::new(id.clone()).with_reasons(["t".into()]))
            .await
            .unwrap()
            .is_some());
        assert!(store
            .add(action(), Meta::new(id).with_reasons(["t".into()]))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn by_id_returns_stored_tuple() {
        let mut store = MemoryStore::new();
        let id = Id::new(1, "1", 0);
        store
            .add(action(), Meta::new(id.clone()).with_reasons(["t".into()]))
            .await
            .unwrap();

        let (got_action, got_meta) = store.by_id(&id).await.unwrap();
        assert_eq!(got_action, action());
        assert_eq!(got_meta.id, id);
        assert_eq!(got_meta.added, Some(1));
    }

    #[tokio::test]
    async fn get_added_order_is_descending() {
        let mut store = MemoryStore::new();
        store.add(action(), meta(1, 0, &["t"])).await.unwrap();
        store.add(action(), meta(2, 0, &["t"])).await.unwrap();
        store.add(action(), meta(3, 0, &["t"])).await.unwrap();

        let page = store.get(Order::Added).await;
        let addeds: Vec<_> = page.entries.iter().map(|(_, m)| m.added.unwrap()).collect();

        assert_eq!(addeds, vec![3, 2, 1]);
        assert!(page.next.is_none());
    }

    #[tokio::test]
    async fn get_created_order_is_descending_by_id() {
        let mut store = MemoryStore::new();
        store.add(action(), meta(5, 0, &["t"])).await.unwrap();
        store.add(action(), meta(1, 0, &["t"])).await.unwrap();
        store.add(action(), meta(3, 0, &["t"])).await.unwrap();

        let page = store.get(Order::Created).await;
        let times: Vec<_> = page.entries.iter().map(|(_, m)| m.id.time).collect();

        assert_eq!(times, vec![5, 3, 1]);
    }

    #[tokio::test]
    async fn change_meta_on_unknown_id_returns_false() {
        let mut store = MemoryStore::new();
        let ok = store
            .change_meta(&Id::new(1, "1", 0), &MetaDiff::default())
            .await;

        assert!(!ok);
    }

    #[tokio::test]
    async fn set_last_synced_merges_fields() {
        let mut store = MemoryStore::new();
        store.set_last_synced("peer-a", Some(5), None).await;
        store.set_last_synced("peer-a", None, Some(9)).await;

        let synced = store.last_synced("peer-a").await;
        assert_eq!(synced.sent, 5);
        assert_eq!(synced.received, 9);
    }

    #[tokio::test]
    async fn remove_reports_whether_anything_was_removed() {
        let mut store = MemoryStore::new();
        let id = Id::new(1, "1", 0);
        store
            .add(action(), Meta::new(id.clone()).with_reasons(["t".into()]))
            .await
            .unwrap();

        assert!(store.remove(&id).await);
        assert!(!store.remove(&id).await);
    }
}
