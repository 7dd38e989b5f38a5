//! Cross-thread state primitives.
//!
//! These are the building blocks every layer above uses for state
//! transitions that are cheaper than full mutual exclusion:
//!
//! - [`AtomicCell`] - a shared cell whose reads always observe the most
//!   recent write, for values too rich for `std::sync::atomic`
//! - [`Guarded`] - a value reachable only through a scoped lock guard,
//!   so "access without the lock" does not compile
//! - [`TakeSwitch`] - a one-shot claim flag: exactly one winner among any
//!   number of racing claimants

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A shared mutable cell with full cross-thread visibility.
///
/// `get()` is guaranteed to observe the value of the most recent `set()`
/// from any thread, never a stale cached copy. Backed by a mutex rather
/// than raw atomics so it works for arbitrary `Clone` types; the critical
/// section is only the copy in/out.
#[derive(Debug, Default)]
pub struct AtomicCell<T> {
    value: Mutex<T>,
}

impl<T: Clone> AtomicCell<T> {
    /// Create a cell holding `value`.
    pub fn new(value: T) -> Self {
        Self {
            value: Mutex::new(value),
        }
    }

    /// Read the current value.
    pub fn get(&self) -> T {
        self.value
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the value, returning the previous one.
    pub fn set(&self, value: T) -> T {
        let mut slot = self.value.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *slot, value)
    }
}

/// A value that can only be reached through its lock.
///
/// There is no unguarded accessor: the sole way to touch the inner value
/// is the guard returned by [`Guarded::lock`], which releases on drop.
/// This replaces a runtime "lock not held" check with a compile-time
/// impossibility.
#[derive(Debug, Default)]
pub struct Guarded<T> {
    inner: Mutex<T>,
}

impl<T> Guarded<T> {
    /// Wrap `value`.
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Acquire the lock and return a scoped guard over the value.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A single-use claim flag.
///
/// Among any number of concurrent [`try_claim`](TakeSwitch::try_claim)
/// callers, exactly one ever receives `true`; every later call from any
/// thread receives `false`. Used to make fault handling, close, and
/// first-time-initialization paths idempotent under races.
#[derive(Debug, Default)]
pub struct TakeSwitch {
    claimed: AtomicBool,
}

impl TakeSwitch {
    /// Create an unclaimed switch.
    pub fn new() -> Self {
        Self {
            claimed: AtomicBool::new(false),
        }
    }

    /// Attempt to claim the switch. Returns `true` for exactly one caller.
    pub fn try_claim(&self) -> bool {
        !self.claimed.swap(true, Ordering::AcqRel)
    }

    /// Whether the switch has been claimed by anyone.
    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn atomic_cell_get_set() {
        let cell = AtomicCell::new(7u32);
        assert_eq!(cell.get(), 7);
        assert_eq!(cell.set(9), 7);
        assert_eq!(cell.get(), 9);
    }

    #[test]
    fn atomic_cell_visible_across_threads() {
        let cell = Arc::new(AtomicCell::new(String::from("before")));
        let writer = {
            let cell = cell.clone();
            thread::spawn(move || {
                cell.set(String::from("after"));
            })
        };
        writer.join().unwrap();
        assert_eq!(cell.get(), "after");
    }

    #[test]
    fn guarded_scoped_access() {
        let guarded = Guarded::new(vec![1, 2, 3]);
        {
            let mut v = guarded.lock();
            v.push(4);
        }
        assert_eq!(guarded.lock().len(), 4);
    }

    #[test]
    fn take_switch_single_winner_sequential() {
        let switch = TakeSwitch::new();
        assert!(!switch.is_claimed());
        assert!(switch.try_claim());
        assert!(switch.is_claimed());
        assert!(!switch.try_claim());
        assert!(!switch.try_claim());
        assert!(switch.is_claimed());
    }

    #[test]
    fn take_switch_single_winner_concurrent() {
        let switch = Arc::new(TakeSwitch::new());
        let barrier = Arc::new(std::sync::Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let switch = switch.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    switch.try_claim()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
        assert!(switch.is_claimed());
    }
}
