use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use anyhow::bail;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use crate::claim_table::ClaimTable;
use crate::config::ReceiverConfig;
use crate::connection::Connection;
use crate::header::Rank;
use crate::segment::Segment;
use crate::transport::{ArrivalClaim, Transport};
use crate::util::{lock_ignoring_poison, try_lock_ignoring_poison};

/// The listen slot armed by `post_new_header`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListenSlot {
    pub rank: Rank,
    /// `false` if the slot was still armed from before, i.e. nothing was deposited since the
    ///  previous arming
    pub freshly_armed: bool,
}

/// State guarded by the header lock. The segment is present between `start()` and `stop()`.
struct PendingHeader {
    segment: Option<Arc<Segment>>,
    listen_slot: Option<ListenSlot>,
}

/// Outcome of the non-blocking 'probe' phase of a poll
enum Probe {
    Claimed(Connection),
    /// no arrival, or an arrival that was discarded
    NotReady,
    /// some other poll call holds the header lock
    Busy,
}

/// The receiver turns arrivals on an endpoint into connections, and drives the connections
///  until their payload is complete.
///
/// `start` and `stop` must not race each other. Apart from that, all functions may be called
///  concurrently from any number of threads. `poll` never waits for anything except the pool lock when it returns an
///  incomplete connection to the pool, which is held only for a push or a pop.
///
/// Lock order: the header lock is always released before the pool lock is acquired. The claim
///  table's lock is a leaf.
pub struct Receiver {
    config: Arc<ReceiverConfig>,
    transport: Arc<dyn Transport>,
    header_lock: Mutex<PendingHeader>,
    connections: Mutex<VecDeque<Connection>>,
    /// cleared by `stop()` before it drains the pool, read under the pool lock
    accepts_pending: AtomicBool,
    claims: ClaimTable,
    completed: mpsc::UnboundedSender<Connection>,
}

impl Receiver {
    /// Completed connections are sent to `completed`, see `DispatchLoop` for the receiving end.
    pub fn new(
        config: Arc<ReceiverConfig>,
        transport: Arc<dyn Transport>,
        completed: mpsc::UnboundedSender<Connection>,
    ) -> Receiver {
        Receiver {
            config,
            transport,
            header_lock: Mutex::new(PendingHeader {
                segment: None,
                listen_slot: None,
            }),
            connections: Default::default(),
            accepts_pending: AtomicBool::new(false),
            claims: Default::default(),
            completed,
        }
    }

    /// Open the endpoint's segment and arm the first listen slot. This must be called exactly
    ///  once before polling.
    pub fn start(&self) -> anyhow::Result<()> {
        let mut pending = lock_ignoring_poison(&self.header_lock);
        if pending.segment.is_some() {
            bail!("receiver is started already");
        }

        let segment = self.transport.open_segment()?;
        let rank = self.transport.current_rank();
        if segment.rank_mutex(rank).is_none() {
            self.transport.close_segment();
            bail!("rank {} is outside the segment's {} ranks", rank, segment.num_ranks());
        }

        let _endpoint = segment.lock_endpoint();
        pending.segment = Some(segment.clone());
        let listen_slot = self.post_new_header(&mut pending);
        self.accepts_pending.store(true, Ordering::Release);

        info!("receiver for rank {} started, listening on {:?}", rank, listen_slot);
        Ok(())
    }

    /// Disarm the listen slot, close the segment and abandon all connections in the pool.
    ///  Returns the number of abandoned connections.
    ///
    /// A connection that is in flight in a concurrent `poll` call is abandoned by that call
    ///  instead of being returned to the pool, and it is not counted here.
    pub fn stop(&self) -> usize {
        let mut pending = lock_ignoring_poison(&self.header_lock);
        let Some(segment) = pending.segment.take() else {
            debug!("receiver is not started - nothing to stop");
            return 0;
        };

        {
            let _endpoint = segment.lock_endpoint();
            if let Some(mutex) = segment.rank_mutex(self.transport.current_rank()) {
                mutex.unlock();
            }
            if !segment.header_slot().is_empty() {
                debug!("discarding header {} that was not accepted", segment.header_slot().read());
            }
            segment.header_slot().reset();
        }
        pending.listen_slot = None;
        self.transport.close_segment();
        drop(pending);

        let abandoned = {
            let mut pool = lock_ignoring_poison(&self.connections);
            self.accepts_pending.store(false, Ordering::Release);
            pool.drain(..).collect::<Vec<_>>()
        };
        for connection in &abandoned {
            self.claims.release(connection.claim_key());
        }
        if !abandoned.is_empty() {
            warn!("abandoning {} incomplete connection(s)", abandoned.len());
        }
        if !self.claims.is_empty() {
            debug!("{} connection(s) still in flight - they are abandoned by their poll calls", self.claims.len());
        }

        info!("receiver for rank {} stopped", self.transport.current_rank());
        abandoned.len()
    }

    pub fn is_started(&self) -> bool {
        lock_ignoring_poison(&self.header_lock).segment.is_some()
    }

    pub fn num_pending_connections(&self) -> usize {
        lock_ignoring_poison(&self.connections).len()
    }

    pub fn num_claims(&self) -> usize {
        self.claims.len()
    }

    /// One non-blocking attempt at making progress: either accept a new arrival, or take the
    ///  oldest connection from the pool, and do a single receive step on it.
    ///
    /// Returns `true` if this call did work (not necessarily completing a transfer), and
    ///  `false` if there was nothing to do or everything was busy.
    pub fn poll(&self) -> bool {
        let candidate = match self.accept() {
            Probe::Claimed(connection) => Some(connection),
            Probe::NotReady => self.try_pop_pending(),
            Probe::Busy => {
                trace!("header lock is busy");
                self.try_pop_pending()
            }
        };

        match candidate {
            Some(connection) => {
                self.receive_step(connection);
                true
            }
            None => false,
        }
    }

    fn try_pop_pending(&self) -> Option<Connection> {
        try_lock_ignoring_poison(&self.connections)?
            .pop_front()
    }

    /// Single receive step on a connection, returning it to the pool if it is incomplete and
    ///  handing it off for dispatch if it is complete.
    pub fn receive_step(&self, mut connection: Connection) {
        if !connection.receive(self.transport.as_ref()) {
            // this is the one place where poll() waits for a lock
            let mut pool = lock_ignoring_poison(&self.connections);
            if self.accepts_pending.load(Ordering::Acquire) {
                pool.push_back(connection);
                return;
            }
            drop(pool);

            self.claims.release(connection.claim_key());
            warn!("receiver is stopped - abandoning incomplete connection for {}", connection.header());
            return;
        }

        self.claims.release(connection.claim_key());
        debug!("connection for {} is complete", connection.header());

        if let Err(e) = self.completed.send(connection) {
            warn!("dispatch channel is closed - dropping completed connection for {}", e.0.header());
        }
    }

    fn accept(&self) -> Probe {
        match try_lock_ignoring_poison(&self.header_lock) {
            Some(pending) => self.accept_locked(pending),
            None => Probe::Busy,
        }
    }

    /// Takes ownership of the header lock's guard to release it in the right order: after the
    ///  arrival claim, and after the header was consumed and the next listen slot was armed.
    fn accept_locked(&self, mut pending: MutexGuard<'_, PendingHeader>) -> Probe {
        let Some(segment) = pending.segment.clone() else {
            trace!("receiver is not started");
            return Probe::NotReady;
        };

        let Some(arrival) = ArrivalClaim::try_claim(self.transport.as_ref()) else {
            return Probe::NotReady;
        };

        let header = segment.header_slot().read();
        let slot_index = pending.listen_slot
            .map(|slot| slot.rank)
            .unwrap_or_else(|| self.transport.current_rank());

        self.post_new_header(&mut pending);

        let is_accepted = if header.is_empty() {
            warn!("arrival signalled, but the header slot is empty - discarding");
            false
        }
        else if !self.claims.try_claim(header.claim_key()) {
            warn!("arrival for {} while a connection for rank {} / tag {} is still outstanding - discarding", header, header.origin_rank, header.tag);
            self.transport.discard_transfer(&header);
            false
        }
        else {
            true
        };

        drop(arrival);
        drop(pending);

        if !is_accepted {
            return Probe::NotReady;
        }

        debug!("accepted {} in listen slot {}", header, slot_index);
        Probe::Claimed(Connection::new(header, slot_index, self.config.max_payload_size))
    }

    /// Reset the pending-header slot and make a single attempt at arming this rank's listen
    ///  slot. The caller must hold the header lock, which is what the guard parameter is for.
    ///
    /// Returns `None` if the receiver is not started.
    fn post_new_header(&self, pending: &mut MutexGuard<'_, PendingHeader>) -> Option<ListenSlot> {
        debug_assert!(self.header_lock.try_lock().is_err(), "header lock must be held");

        let segment = pending.segment.clone()?;
        segment.header_slot().reset();

        let rank = self.transport.current_rank();
        let freshly_armed = segment.rank_mutex(rank)?.try_lock();
        if !freshly_armed {
            debug!("listen slot for rank {} is still armed", rank);
        }

        let listen_slot = ListenSlot { rank, freshly_armed };
        pending.listen_slot = Some(listen_slot);
        Some(listen_slot)
    }
}
