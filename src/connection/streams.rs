//! Stream id allocation and completion routing.
//!
//! Every connection owns a fixed [`StreamTable`]: one slot per stream id,
//! cycling `Free -> Reserved -> AwaitingResponse -> Free`. Reservation is a
//! lock-free scan with a compare-and-set claim, so many caller tasks can
//! grab ids concurrently without a table-wide lock. Completion handles are
//! single-assignment: the `oneshot` sender is *taken* under a per-slot
//! mutex, so a response, a timeout cancel, and a connection fault can race
//! freely and the caller still sees at most one outcome.
//!
//! A timeout cancel takes the detour `AwaitingResponse -> Orphaned ->
//! Free`: the completion is detached immediately, but the id is withheld
//! from reuse until the response the server still owes on it arrives and
//! is discarded. A stale body can therefore never be delivered to a new
//! request that picked up the same id. Slot generations additionally guard
//! the cancel itself: it only fires if the slot still belongs to the
//! generation the caller armed.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio::sync::oneshot;

use crate::error::{Result, TransportError};
use crate::frame::Response;

/// Maximum stream ids per connection: ids are signed bytes and negative
/// values belong to server events.
pub const MAX_STREAMS: usize = 128;

/// Default stream ids per connection.
pub const DEFAULT_STREAMS: usize = MAX_STREAMS;

const FREE: u8 = 0;
const RESERVED: u8 = 1;
const AWAITING: u8 = 2;
/// Cancelled but still owed a response; not reservable until it arrives.
const ORPHANED: u8 = 3;

type Completion = oneshot::Sender<Result<Response>>;

#[derive(Debug, Default)]
struct StreamSlot {
    state: AtomicU8,
    /// Bumped every time the slot returns to Free, so stale cancels can be
    /// told apart from cancels aimed at the current occupant.
    generation: AtomicU64,
    completion: Mutex<Option<Completion>>,
}

impl StreamSlot {
    /// Take the completion sender and return the slot to Free. The caller
    /// holds the completion mutex, which is what serializes the release
    /// against racing completes and cancels.
    fn release(&self, completion: &mut Option<Completion>) -> Option<Completion> {
        let sender = completion.take();
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.state.store(FREE, Ordering::Release);
        sender
    }
}

/// Fixed-size table of stream slots for one connection.
#[derive(Debug)]
pub struct StreamTable {
    slots: Vec<StreamSlot>,
    in_flight: AtomicUsize,
    /// Set by the fault path; refuses all further reservations.
    closed: AtomicBool,
}

impl StreamTable {
    /// Create a table with `count` slots (ids `0..count`).
    ///
    /// `count` is clamped to [`MAX_STREAMS`]; stream ids must fit in the
    /// non-negative half of an `i8`.
    pub fn new(count: usize) -> Self {
        let count = count.clamp(1, MAX_STREAMS);
        Self {
            slots: (0..count).map(|_| StreamSlot::default()).collect(),
            in_flight: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of stream ids this table manages.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Requests currently awaiting a response.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Whether the table refuses new reservations.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Claim a free stream id.
    ///
    /// Scans the table attempting a compare-and-set on each candidate; a
    /// lost race simply moves on to the next slot. Fails immediately with
    /// [`TransportError::StreamsExhausted`] when nothing is free - that is
    /// backpressure for the caller, not a connection fault.
    pub fn reserve(&self) -> Result<ReservedStream<'_>> {
        if self.is_closed() {
            return Err(TransportError::ConnectionBroken(
                "connection is shut down".into(),
            ));
        }

        for (id, slot) in self.slots.iter().enumerate() {
            if slot
                .state
                .compare_exchange(FREE, RESERVED, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Ok(ReservedStream {
                    table: self,
                    id: id as i8,
                    armed: false,
                });
            }
        }

        Err(TransportError::StreamsExhausted)
    }

    /// Deliver `result` to the caller awaiting `id`.
    ///
    /// Returns `false` when no caller is waiting there (slot free, still
    /// reserved, orphaned, or already completed) - the frame is stale or
    /// bogus and the caller upstream decides how loudly to log it. For an
    /// orphaned slot this is the late response a cancelled request was
    /// still owed; discarding it is what returns the id to the free set.
    pub fn complete(&self, id: i8, result: Result<Response>) -> bool {
        let Some(slot) = self.slot(id) else {
            return false;
        };
        let state = slot.state.load(Ordering::Acquire);
        if state != AWAITING && state != ORPHANED {
            return false;
        }

        let mut completion = slot
            .completion
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let state = slot.state.load(Ordering::Acquire);
        if state != AWAITING && state != ORPHANED {
            return false;
        }
        match slot.release(&mut completion) {
            Some(sender) => {
                drop(completion);
                self.in_flight.fetch_sub(1, Ordering::AcqRel);
                // The receiver may have been dropped in the timeout race;
                // single assignment already happened when we took the sender.
                let _ = sender.send(result);
                true
            }
            // Orphaned: no sender left, the release alone reclaims the id.
            None => false,
        }
    }

    /// Cancel the request on `id` if it is still the `generation` the
    /// caller armed. Fails only that slot; the connection and every other
    /// slot are untouched. Returns whether a pending completion was
    /// actually cancelled.
    ///
    /// The slot moves to Orphaned, not Free: the server still owes a
    /// response on this id, and handing the id to a new request before
    /// that response is accounted for would deliver a stale body to the
    /// wrong caller. The id returns to the free set when the late response
    /// arrives ([`complete`](StreamTable::complete)) or the connection
    /// faults ([`fail_all`](StreamTable::fail_all)).
    pub fn cancel(&self, id: i8, generation: u64) -> bool {
        let Some(slot) = self.slot(id) else {
            return false;
        };

        let mut completion = slot
            .completion
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.generation.load(Ordering::Acquire) != generation
            || slot.state.load(Ordering::Acquire) != AWAITING
        {
            return false;
        }
        // Dropping the sender is enough: the caller has already given up.
        let cancelled = completion.take().is_some();
        if cancelled {
            slot.state.store(ORPHANED, Ordering::Release);
        }
        drop(completion);
        if cancelled {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
        }
        cancelled
    }

    /// Fail every awaiting slot with a connection-broken error and refuse
    /// all future reservations. Orphaned slots are reclaimed too - their
    /// late responses are never coming now. Called from the connection
    /// fault path (which guarantees it runs once).
    pub fn fail_all(&self, reason: &str) {
        self.closed.store(true, Ordering::Release);

        for slot in &self.slots {
            let mut completion = slot
                .completion
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(sender) = slot.release(&mut completion) {
                drop(completion);
                self.in_flight.fetch_sub(1, Ordering::AcqRel);
                let _ = sender.send(Err(TransportError::ConnectionBroken(reason.to_string())));
            }
        }
    }

    fn slot(&self, id: i8) -> Option<&StreamSlot> {
        if id < 0 {
            return None;
        }
        self.slots.get(id as usize)
    }
}

/// A successfully claimed stream id, not yet awaiting a response.
///
/// Dropping an unarmed reservation returns the id to the free set.
#[derive(Debug)]
pub struct ReservedStream<'a> {
    table: &'a StreamTable,
    id: i8,
    armed: bool,
}

impl ReservedStream<'_> {
    /// The claimed stream id, to be written into the frame header.
    pub fn id(&self) -> i8 {
        self.id
    }

    /// Attach the caller's completion handle and move the slot to
    /// AwaitingResponse. Returns the slot generation, which the caller
    /// passes back to [`StreamTable::cancel`] on timeout.
    ///
    /// Fails if the connection faulted between reservation and arming; the
    /// slot is released and the caller gets a broken-connection error.
    pub fn arm(mut self, sender: Completion) -> Result<u64> {
        let slot = &self.table.slots[self.id as usize];

        let generation = {
            let mut completion = slot
                .completion
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *completion = Some(sender);
            slot.state.store(AWAITING, Ordering::Release);
            slot.generation.load(Ordering::Acquire)
        };
        self.armed = true;
        self.table.in_flight.fetch_add(1, Ordering::AcqRel);

        // The fault path may have walked the table before we armed; it
        // would then miss this slot forever. Re-check and self-fail.
        if self.table.is_closed() && self.table.cancel(self.id, generation) {
            return Err(TransportError::ConnectionBroken(
                "connection faulted during submit".into(),
            ));
        }

        Ok(generation)
    }
}

impl Drop for ReservedStream<'_> {
    fn drop(&mut self) {
        if !self.armed {
            let slot = &self.table.slots[self.id as usize];
            let mut completion = slot
                .completion
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let _ = slot.release(&mut completion);
        }
    }
}
