//! Total ordering over action identifiers.
//!
//! An [`Id`] is the triple `(time, node_id, sequence)` that uniquely and comparably names an
//! action within a log. Ids are generated locally (monotonically, by [`crate::log::Log`]) but
//! compared globally: two peers that never shared a clock must still agree on which of two ids
//! is older.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// Action identifier: `(time, nodeId, sequence)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Id {
    pub time: Timestamp,
    pub node_id: String,
    pub sequence: u64,
}

impl Id {
    pub fn new(time: Timestamp, node_id: impl Into<String>, sequence: u64) -> Self {
        Self {
            time,
            node_id: node_id.into(),
            sequence,
        }
    }

    /// Split `node_id` at its last `:` into `(prefix, suffix)`. Ids without a `:` have an empty
    /// prefix and the whole string as suffix.
    fn split_node_id(&self) -> (&str, &str) {
        match self.node_id.rfind(':') {
            Some(ix) => (&self.node_id[..ix], &self.node_id[ix + 1..]),
            None => ("", self.node_id.as_str()),
        }
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.time, self.node_id, self.sequence)
    }
}

/// Compare two node-id suffixes: numerically if both parse as integers, else lexicographically.
fn cmp_suffix(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

impl Ord for Id {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time.cmp(&other.time).then_with(|| {
            let (prefix_a, suffix_a) = self.split_node_id();
            let (prefix_b, suffix_b) = other.split_node_id();

            prefix_a
                .cmp(prefix_b)
                .then_with(|| cmp_suffix(suffix_a, suffix_b))
                .then_with(|| self.sequence.cmp(&other.sequence))
        })
    }
}

impl PartialOrd for Id {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Returns whether `a` is older than `b`, treating `None` as negative infinity.
pub fn is_first_older(a: Option<&Id>, b: Option<&Id>) -> bool {
    match (a, b) {
        (None, None) => false,
        (None, Some(_)) => true,
        (Some(_), None) => false,
        (Some(a), Some(b)) => a < b,
    }
}
