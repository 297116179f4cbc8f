//! A clock with interior mutability, so a single `Clock` can be shared between a [`crate::log::Log`]
//! and every [`crate::node`] driving it, and swapped for a deterministic one in tests.
//!
//! Kept in the same shape as the teacher's `RefClock` (`Rc<RefCell<_>>`, `elapse`/`set`/
//! `local_time`), re-based on this crate's own millisecond `Timestamp` instead of
//! `nakamoto_net::LocalTime` now that the crate no longer depends on `nakamoto-net`.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::id::Timestamp;

/// Source of "now", in milliseconds since the epoch. The `timer` node option (§6) is exactly
/// this trait, letting a host supply its own clock.
pub trait Timer: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// The real wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimer;

impl Timer for SystemTimer {
    fn now(&self) -> Timestamp {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before the Unix epoch")
            .as_millis() as Timestamp
    }
}

/// Clock with interior mutability, shared by value.
#[derive(Debug, Clone)]
pub struct Clock(Rc<RefCell<Timestamp>>);

impl Clock {
    pub fn new(now: Timestamp) -> Self {
        Self(Rc::new(RefCell::new(now)))
    }

    pub fn system() -> Self {
        Self::new(SystemTimer.now())
    }

    pub fn now(&self) -> Timestamp {
        *self.0.borrow()
    }

    pub fn set(&self, now: Timestamp) {
        *self.0.borrow_mut() = now;
    }

    pub fn elapse(&self, millis: i64) {
        *self.0.borrow_mut() += millis;
    }
}

impl From<Timestamp> for Clock {
    fn from(now: Timestamp) -> Self {
        Self::new(now)
    }
}
