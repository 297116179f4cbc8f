//! Actions and their metadata (§3).

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::id::{Id, Timestamp};

/// An opaque application event. Its payload is never interpreted by the core; only `kind`
/// (the wire `type` field) is ever inspected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Action {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            payload: Map::new(),
        }
    }

    pub fn with_payload(kind: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}

/// Per-action metadata (§3). `extra` holds additional fields carried through transparently —
/// this core never interprets them, so they ride along as loose JSON rather than a closed struct.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Meta {
    pub id: Id,
    pub time: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added: Option<u64>,
    pub reasons: HashSet<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Meta {
    /// A fresh, reasonless `Meta` for `id`, defaulting `time` to `id.time`.
    pub fn new(id: Id) -> Self {
        let time = id.time;
        Self {
            id,
            time,
            added: None,
            reasons: HashSet::new(),
            extra: Map::new(),
        }
    }

    pub fn with_reasons(mut self, reasons: impl IntoIterator<Item = String>) -> Self {
        self.reasons = reasons.into_iter().collect();
        self
    }

    pub fn is_persisted(&self) -> bool {
        !self.reasons.is_empty()
    }
}

/// A partial update to a [`Meta`], as accepted by `Log::change_meta` / `Store::change_meta`.
/// `id` and `added` are intentionally absent: `Log::change_meta` rejects diffs naming either
/// (§4.1).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetaDiff {
    #[serde(default)]
    pub time: Option<Timestamp>,
    #[serde(default)]
    pub reasons: Option<HashSet<String>>,
    #[serde(default)]
    pub extra: Map<String, Value>,
}

impl MetaDiff {
    pub fn apply(&self, meta: &mut Meta) {
        if let Some(time) = self.time {
            meta.time = time;
        }
        if let Some(reasons) = &self.reasons {
            meta.reasons = reasons.clone();
        }
        for (k, v) in &self.extra {
            meta.extra.insert(k.clone(), v.clone());
        }
    }
}

/// Criteria narrowing which entries `Log::remove_reason` touches, beyond carrying the reason
/// itself (§4.1).
#[derive(Debug, Clone, Default)]
pub struct RemoveReasonCriteria {
    pub min_added: Option<u64>,
    pub max_added: Option<u64>,
    pub older_than: Option<Id>,
    pub younger_than: Option<Id>,
}

impl RemoveReasonCriteria {
    pub fn matches(&self, meta: &Meta) -> bool {
        if let (Some(min), Some(added)) = (self.min_added, meta.added) {
            if added < min {
                return false;
            }
        }
        if let (Some(max), Some(added)) = (self.max_added, meta.added) {
            if added > max {
                return false;
            }
        }
        if let Some(older_than) = &self.older_than {
            if meta.id >= *older_than {
                return false;
            }
        }
        if let Some(younger_than) = &self.younger_than {
            if meta.id <= *younger_than {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasonless_action_is_not_persisted() {
        let meta = Meta::new(Id::new(1, "1", 0));
        assert!(!meta.is_persisted());
    }

    #[test]
    fn reasoned_action_is_persisted() {
        let meta = Meta::new(Id::new(1, "1", 0)).with_reasons(["test".to_string()]);
        assert!(meta.is_persisted());
    }

    #[test]
    fn diff_merges_extra_fields_without_clobbering_others() {
        let mut meta = Meta::new(Id::new(1, "1", 0));
        meta.extra.insert("a".into(), Value::from(1));

        let diff = MetaDiff {
            extra: Map::from_iter([("b".to_string(), Value::from(2))]),
            ..Default::default()
        };
        diff.apply(&mut meta);

        assert_eq!(meta.extra.get("a"), Some(&Value::from(1)));
        assert_eq!(meta.extra.get("b"), Some(&Value::from(2)));
    }

    #[test]
    fn criteria_min_max_added_bounds() {
        let mut meta = Meta::new(Id::new(1, "1", 0));
        meta.added = Some(5);

        let criteria = RemoveReasonCriteria {
            min_added: Some(6),
            ..Default::default()
        };
        assert!(!criteria.matches(&meta));

        let criteria = RemoveReasonCriteria {
            min_added: Some(5),
            max_added: Some(5),
            ..Default::default()
        };
        assert!(criteria.matches(&meta));
    }
}
