use std::sync::Mutex;
use rustc_hash::FxHashSet;
use crate::header::ClaimKey;
use crate::util::lock_ignoring_poison;

/// The set of arrivals that have a live connection, ensuring that an arrival is never accepted
///  twice.
///
/// Entries are added while the receiver holds its header lock, and removed by whichever poll
///  call completes (or abandons) the connection. The table's own mutex is a leaf lock: no other
///  lock is ever acquired while holding it.
#[derive(Default)]
pub struct ClaimTable {
    claims: Mutex<FxHashSet<ClaimKey>>,
}

impl ClaimTable {
    /// returns `false` if the key is claimed already
    pub fn try_claim(&self, key: ClaimKey) -> bool {
        lock_ignoring_poison(&self.claims).insert(key)
    }

    /// returns `false` if the key was not claimed
    pub fn release(&self, key: ClaimKey) -> bool {
        lock_ignoring_poison(&self.claims).remove(&key)
    }

    #[cfg(test)]
    fn is_claimed(&self, key: ClaimKey) -> bool {
        lock_ignoring_poison(&self.claims).contains(&key)
    }

    pub fn len(&self) -> usize {
        lock_ignoring_poison(&self.claims).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
