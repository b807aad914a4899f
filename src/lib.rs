//! This is the receive side of a parcelport: the component that turns one-sided transfers from
//!  other localities into complete, reassembled parcels ready for dispatch.
//!
//! ## Design goals
//!
//! * No dedicated I/O thread: the receiver is driven by repeated calls to `Receiver::poll`
//!   from the runtime's worker threads (or tokio tasks), any number of them concurrently
//! * `poll` never blocks: all locks on its path are probed once, and failure to get one just
//!   means 'no work for this call'. The one exception is returning an incomplete connection to
//!   the pool, which waits for the (very short-lived) pool lock rather than dropping work
//! * `poll` returns whether it did work, so callers can back off adaptively when idle
//! * The transport substrate (GASNet, MPI, loopback, ...) is behind the `Transport` trait
//!
//! ## Reception protocol
//!
//! Each endpoint has a single pending-header slot in its shared segment. The receiver *arms*
//!  the slot by locking its rank's segment mutex; a peer deposits a header by writing it into
//!  the slot (consuming the arming), then signals an arrival. A poll call that manages to get
//!  both the receiver's header lock and the transport's arrival lock reads the header, re-arms
//!  the slot, and turns the header into a `Connection`. Re-arming happens before the locks are
//!  released, so no arrival window is lost.
//!
//! Arrivals are identified by (origin rank, tag). A claim table ensures there is at most one
//!  connection per arrival at any time.
//!
//! ## Connections
//!
//! A connection is owned by exactly one party at any time - the poll call working on it, the
//!  FIFO pool of incomplete connections, or the dispatcher once it is complete. Each poll does a
//!  single non-blocking receive step on one connection: incomplete connections go back to the
//!  pool's tail, complete ones are sent to a `DispatchLoop` that calls the `ParcelDispatcher`.
//!
//! Protocol violations (oversized headers, transfers delivering more than declared) complete the
//!  connection with a `ProtocolViolation` instead of a payload, leaving it to the dispatcher to
//!  report them.
//!
//! ```ascii
//!  poll()
//!    |-- accept(): try header lock -> try arrival lock -> read header, re-arm, claim
//!    |      \-- nothing? try pool lock -> pop front
//!    \-- receive_step(): receive() -> complete?  yes: release claim, send to dispatch loop
//!                                               no:  push to pool tail
//! ```

pub mod background;
pub mod claim_table;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod end_point;
pub mod header;
pub mod loopback;
pub mod receiver;
pub mod segment;
pub mod transport;
mod util;

#[cfg(test)]
mod tests {
    use tracing::Level;

    #[ctor::ctor]
    fn init_test_logging() {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(Level::TRACE)
            .try_init()
            .ok();
    }
}
