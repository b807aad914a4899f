//! An in-process transport: a locality that sends parcels to itself, with 'one-sided' writes
//!  being plain memory operations. Besides single-locality runs, this is the backend for
//!  exercising the receiver without a network.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use anyhow::bail;
use bytes::{Buf, Bytes, BytesMut};
use rustc_hash::FxHashMap;
use tracing::{debug, trace};
use crate::header::{ClaimKey, Header, Rank};
use crate::segment::Segment;
use crate::transport::Transport;
use crate::util::lock_ignoring_poison;

pub struct LoopbackTransport {
    rank: Rank,
    num_ranks: usize,
    /// maximum number of bytes a single `poll_transfer` call delivers
    chunk_size: usize,
    segment: Mutex<Option<Arc<Segment>>>,
    arrival_lock: AtomicBool,
    num_arrivals: AtomicUsize,
    /// payloads that were put but not yet fully delivered, in the order they were put
    transfers: Mutex<FxHashMap<ClaimKey, VecDeque<Bytes>>>,
}

impl LoopbackTransport {
    pub fn new(rank: Rank, num_ranks: usize, chunk_size: usize) -> LoopbackTransport {
        assert!(chunk_size > 0, "chunk size must be positive");

        LoopbackTransport {
            rank,
            num_ranks,
            chunk_size,
            segment: Mutex::new(None),
            arrival_lock: AtomicBool::new(false),
            num_arrivals: AtomicUsize::new(0),
            transfers: Default::default(),
        }
    }

    pub fn segment(&self) -> Option<Arc<Segment>> {
        lock_ignoring_poison(&self.segment).clone()
    }

    /// The sending side of a transfer: write the payload into the segment and deposit the
    ///  header into the listen slot.
    ///
    /// Returns `Ok(false)` if the listen slot is not armed, i.e. the previous header was not
    ///  accepted yet. Nothing is written in that case, and the caller should retry later.
    pub fn put(&self, header: &Header, payload: Bytes) -> anyhow::Result<bool> {
        let mut buf = BytesMut::with_capacity(Header::SERIALIZED_LEN);
        header.ser(&mut buf);
        self.put_raw(&buf, payload)
    }

    /// like `put`, with the header in its encoded form
    pub fn put_raw(&self, mut header_buf: &[u8], payload: Bytes) -> anyhow::Result<bool> {
        let header = Header::deser(&mut header_buf)?;
        if header.is_empty() {
            bail!("header {} has the empty marker as its tag", header);
        }
        if header_buf.has_remaining() {
            bail!("{} trailing bytes after header", header_buf.remaining());
        }

        let Some(segment) = self.segment() else {
            bail!("segment is not open");
        };

        // the payload is in place before the header becomes visible
        lock_ignoring_poison(&self.transfers)
            .entry(header.claim_key())
            .or_default()
            .push_back(payload);

        if !segment.deposit_header(self.rank, header) {
            self.drop_newest_payload(&header);
            return Ok(false);
        }

        self.num_arrivals.fetch_add(1, Ordering::AcqRel);
        trace!("put {}", header);
        Ok(true)
    }

    fn drop_newest_payload(&self, header: &Header) -> bool {
        let mut transfers = lock_ignoring_poison(&self.transfers);
        let Some(queue) = transfers.get_mut(&header.claim_key()) else {
            return false;
        };

        let dropped = queue.pop_back().is_some();
        if queue.is_empty() {
            transfers.remove(&header.claim_key());
        }
        dropped
    }
}

impl Transport for LoopbackTransport {
    fn current_rank(&self) -> Rank {
        self.rank
    }

    fn open_segment(&self) -> anyhow::Result<Arc<Segment>> {
        let mut segment = lock_ignoring_poison(&self.segment);
        if segment.is_some() {
            bail!("segment is open already");
        }

        debug!("opening segment for {} ranks", self.num_ranks);
        let result = Arc::new(Segment::new(self.num_ranks));
        *segment = Some(result.clone());
        Ok(result)
    }

    fn close_segment(&self) {
        debug!("closing segment");
        *lock_ignoring_poison(&self.segment) = None;
        lock_ignoring_poison(&self.transfers).clear();
        self.num_arrivals.store(0, Ordering::Release);
    }

    fn try_claim_arrival(&self) -> bool {
        if self.arrival_lock.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return false;
        }

        let has_arrival = self.num_arrivals
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if !has_arrival {
            self.arrival_lock.store(false, Ordering::Release);
        }
        has_arrival
    }

    fn release_arrival_claim(&self) {
        self.arrival_lock.store(false, Ordering::Release);
    }

    fn poll_transfer(&self, header: &Header, buf: &mut BytesMut) -> usize {
        let mut transfers = lock_ignoring_poison(&self.transfers);
        let Some(queue) = transfers.get_mut(&header.claim_key()) else {
            return 0;
        };
        let Some(payload) = queue.front_mut() else {
            return 0;
        };

        let num_bytes = payload.len().min(self.chunk_size);
        buf.extend_from_slice(&payload[..num_bytes]);
        payload.advance(num_bytes);

        if payload.is_empty() {
            queue.pop_front();
            if queue.is_empty() {
                transfers.remove(&header.claim_key());
            }
        }
        num_bytes
    }

    fn discard_transfer(&self, header: &Header) {
        if self.drop_newest_payload(header) {
            debug!("discarded payload for {}", header);
        }
    }
}
