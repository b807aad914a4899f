use std::error::Error;
use std::fmt::{Display, Formatter};
use bytes::{Bytes, BytesMut};
use tracing::{debug, trace, warn};
use crate::header::{ClaimKey, Header, Rank};
use crate::transport::Transport;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    HeaderBound,
    Receiving,
    Complete,
}

/// A transfer that completed without delivering a usable payload. This is reported to the
///  dispatcher as part of the completed connection rather than raised by the receiver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProtocolViolation {
    PayloadTooLarge { declared: u64, max: usize },
    Overrun { declared: u64, received: usize },
}

impl Display for ProtocolViolation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolViolation::PayloadTooLarge { declared, max } =>
                write!(f, "declared payload size of {} bytes exceeds the maximum of {} bytes", declared, max),
            ProtocolViolation::Overrun { declared, received } =>
                write!(f, "received {} bytes for a payload declared as {} bytes", received, declared),
        }
    }
}

impl Error for ProtocolViolation {}

/// The reassembly state of one inbound transfer.
///
/// A connection is owned by exactly one party at a time: the poll call that is working on it,
///  the receiver's pool, or - once complete - the dispatcher.
pub struct Connection {
    header: Header,
    slot_index: Rank,
    max_payload_size: usize,
    payload: BytesMut,
    state: ConnectionState,
    violation: Option<ProtocolViolation>,
}

impl Connection {
    pub fn new(header: Header, slot_index: Rank, max_payload_size: usize) -> Connection {
        Connection {
            header,
            slot_index,
            max_payload_size,
            payload: BytesMut::new(),
            state: ConnectionState::HeaderBound,
            violation: None,
        }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn origin_rank(&self) -> Rank {
        self.header.origin_rank
    }

    /// the listen slot that was armed when this connection's header arrived
    pub fn slot_index(&self) -> Rank {
        self.slot_index
    }

    pub fn claim_key(&self) -> ClaimKey {
        self.header.claim_key()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state == ConnectionState::Complete
    }

    pub fn num_received(&self) -> usize {
        self.payload.len()
    }

    pub fn violation(&self) -> Option<&ProtocolViolation> {
        self.violation.as_ref()
    }

    /// The received payload, or the reason why there is none. This is meant to be called on a
    ///  complete connection; for an incomplete connection it returns the partial payload.
    pub fn into_payload(self) -> Result<Bytes, ProtocolViolation> {
        match self.violation {
            Some(violation) => Err(violation),
            None => Ok(self.payload.freeze()),
        }
    }

    /// Single non-blocking reassembly step, returning `true` iff the connection is complete.
    ///
    /// Calling this on a complete connection is a no-op.
    pub fn receive(&mut self, transport: &dyn Transport) -> bool {
        if self.state == ConnectionState::Complete {
            return true;
        }

        if self.state == ConnectionState::HeaderBound {
            if self.header.payload_size > self.max_payload_size as u64 {
                warn!("header {} declares a payload bigger than the configured maximum of {} bytes", self.header, self.max_payload_size);
                self.violation = Some(ProtocolViolation::PayloadTooLarge {
                    declared: self.header.payload_size,
                    max: self.max_payload_size,
                });
                self.state = ConnectionState::Complete;
                return true;
            }
            if self.header.payload_size == 0 {
                trace!("empty payload for {} - complete without transfer", self.header);
                self.state = ConnectionState::Complete;
                return true;
            }
            self.payload.reserve(self.header.payload_size as usize);
        }

        let num_new = transport.poll_transfer(&self.header, &mut self.payload);
        if num_new == 0 {
            return false;
        }

        let received = self.payload.len();
        trace!("{} more bytes for {}, {} received so far", num_new, self.header, received);

        if received as u64 > self.header.payload_size {
            debug!("transfer for {} delivered {} bytes - more than declared", self.header, received);
            self.violation = Some(ProtocolViolation::Overrun {
                declared: self.header.payload_size,
                received,
            });
            self.state = ConnectionState::Complete;
            return true;
        }

        if received as u64 == self.header.payload_size {
            trace!("payload for {} complete", self.header);
            self.state = ConnectionState::Complete;
            return true;
        }

        self.state = ConnectionState::Receiving;
        false
    }
}
