use std::sync::Arc;
use bytes::BytesMut;
#[cfg(test)] use mockall::automock;
use tracing::trace;
use crate::header::{Header, Rank};
use crate::segment::Segment;

/// This is the receiver's view of the message-passing substrate that performs the actual
///  one-sided writes (GASNet, MPI one-sided, a TCP emulation, in-process loopback, ...).
///
/// All functions are non-blocking.
#[cfg_attr(test, automock)]
pub trait Transport: Send + Sync + 'static {
    fn current_rank(&self) -> Rank;

    /// Make the endpoint's shared segment available. This is called once when the receiver
    ///  starts, and it is matched by a call to `close_segment` when it stops.
    fn open_segment(&self) -> anyhow::Result<Arc<Segment>>;

    fn close_segment(&self);

    /// Single attempt to acquire the transport-level arrival lock. This succeeds only if a
    ///  header arrived in the listen slot since the last successful claim. After success, the
    ///  caller owns the lock and must call `release_arrival_claim`.
    fn try_claim_arrival(&self) -> bool;

    fn release_arrival_claim(&self);

    /// Advance the one-sided transfer described by `header`, appending whatever payload bytes
    ///  have landed since the last call to `buf`. Returns the number of bytes appended, 0 meaning
    ///  that nothing new arrived.
    fn poll_transfer(&self, header: &Header, buf: &mut BytesMut) -> usize;

    /// Drop the transfer that came with a header the receiver did not accept. The caller holds
    ///  the arrival claim for that header, so this is the most recently deposited transfer for
    ///  the header's (rank, tag).
    fn discard_transfer(&self, header: &Header);
}

/// Scoped ownership of the transport-level arrival lock
pub struct ArrivalClaim<'a> {
    transport: &'a dyn Transport,
}

impl<'a> ArrivalClaim<'a> {
    pub fn try_claim(transport: &'a dyn Transport) -> Option<ArrivalClaim<'a>> {
        if transport.try_claim_arrival() {
            trace!("claimed arrival");
            Some(ArrivalClaim { transport })
        }
        else {
            None
        }
    }
}

impl Drop for ArrivalClaim<'_> {
    fn drop(&mut self) {
        self.transport.release_arrival_claim();
    }
}
