//! The shared memory segment of an endpoint, i.e. the state that remote peers write into
//!  one-sidedly: the pending-header slot, and a table of per-rank mutexes that coordinate
//!  access to it.
//!
//! A rank's mutex being locked means that rank's listen slot is *armed*: the receiver locks it
//!  when it (re-)arms the slot, and a depositing peer unlocks it as part of writing a header.
//!  So every arming admits exactly one deposit, and a header can never be overwritten before
//!  the receiver claimed it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::trace;
use crate::header::{Header, HeaderSlot, Rank};
use crate::util::lock_ignoring_poison;

#[derive(Default)]
pub struct SegmentMutex {
    locked: AtomicBool,
}

impl SegmentMutex {
    /// single non-blocking attempt, returns `true` if the mutex was acquired
    pub fn try_lock(&self) -> bool {
        self.locked.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    /// returns `true` if the mutex was locked before
    pub fn unlock(&self) -> bool {
        self.locked.compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }
}

pub struct Segment {
    header_slot: HeaderSlot,
    rank_mutexes: Vec<SegmentMutex>,
    endpoint_lock: Mutex<()>,
}

impl Segment {
    pub fn new(num_ranks: usize) -> Segment {
        Segment {
            header_slot: HeaderSlot::new(),
            rank_mutexes: (0..num_ranks).map(|_| SegmentMutex::default()).collect(),
            endpoint_lock: Mutex::new(()),
        }
    }

    pub fn num_ranks(&self) -> usize {
        self.rank_mutexes.len()
    }

    pub fn header_slot(&self) -> &HeaderSlot {
        &self.header_slot
    }

    pub fn rank_mutex(&self, rank: Rank) -> Option<&SegmentMutex> {
        self.rank_mutexes.get(rank as usize)
    }

    /// The endpoint-wide scoped lock. This is the one blocking lock on the segment, it is held
    ///  only for endpoint start and stop.
    pub fn lock_endpoint(&self) -> MutexGuard<'_, ()> {
        lock_ignoring_poison(&self.endpoint_lock)
    }

    /// This is the peer side of a one-sided header write into `target_rank`'s listen slot. It
    ///  consumes the slot's arming, and returns `false` without writing anything if the slot is
    ///  not armed (either the receiver did not arm it yet, or another deposit got there first).
    pub fn deposit_header(&self, target_rank: Rank, header: Header) -> bool {
        let Some(mutex) = self.rank_mutex(target_rank) else {
            trace!("deposit for unknown rank {} - ignoring", target_rank);
            return false;
        };

        if !mutex.unlock() {
            trace!("listen slot of rank {} is not armed - deposit of {} rejected", target_rank, header);
            return false;
        }

        self.header_slot.write(header);
        true
    }
}
