use std::fmt::{Display, Formatter};
use std::mem::size_of;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use bytes::{Buf, BufMut, BytesMut};

/// identifies a locality, i.e. one participating process
pub type Rank = u32;

/// The slot marker a peer writes into a header when it claims a listen slot. Zero is reserved
///  as the 'empty' sentinel.
pub type Tag = u32;

/// A (rank, tag) pair identifies one arrival for its entire lifetime, i.e. until the
///  connection spawned from it is complete or abandoned.
pub type ClaimKey = (Rank, Tag);

/// Fixed-size descriptor of one inbound transfer.
///
/// Encoded form (all numbers BE):
/// ```ascii
/// 0:  origin rank (u32)
/// 4:  tag / slot marker (u32) - 0 for an empty slot
/// 8:  payload size (u64)
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Header {
    pub origin_rank: Rank,
    pub tag: Tag,
    pub payload_size: u64,
}

impl Header {
    pub const SERIALIZED_LEN: usize = size_of::<Rank>() + size_of::<Tag>() + size_of::<u64>();

    pub const EMPTY: Header = Header {
        origin_rank: 0,
        tag: 0,
        payload_size: 0,
    };

    pub fn new(origin_rank: Rank, tag: Tag, payload_size: u64) -> Header {
        Header { origin_rank, tag, payload_size }
    }

    pub fn is_empty(&self) -> bool {
        self.tag == 0
    }

    pub fn claim_key(&self) -> ClaimKey {
        (self.origin_rank, self.tag)
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_u32(self.origin_rank);
        buf.put_u32(self.tag);
        buf.put_u64(self.payload_size);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<Header> {
        let origin_rank = buf.try_get_u32()?;
        let tag = buf.try_get_u32()?;
        let payload_size = buf.try_get_u64()?;

        Ok(Header {
            origin_rank,
            tag,
            payload_size,
        })
    }
}

impl Display for Header {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[rank {} tag {}: {} bytes]", self.origin_rank, self.tag, self.payload_size)
    }
}

/// The pending-header register of an endpoint: remote peers write a header into it (one-sided),
///  the receiver reads and resets it.
///
/// The tag doubles as the 'slot is filled' marker. It is published last and read first, so a
///  reader that sees a non-zero tag sees the rest of the header as well.
#[derive(Default)]
pub struct HeaderSlot {
    origin_rank: AtomicU32,
    tag: AtomicU32,
    payload_size: AtomicU64,
}

impl HeaderSlot {
    pub fn new() -> HeaderSlot {
        Default::default()
    }

    pub fn write(&self, header: Header) {
        self.origin_rank.store(header.origin_rank, Ordering::Relaxed);
        self.payload_size.store(header.payload_size, Ordering::Relaxed);
        self.tag.store(header.tag, Ordering::Release);
    }

    pub fn read(&self) -> Header {
        let tag = self.tag.load(Ordering::Acquire);
        if tag == 0 {
            return Header::EMPTY;
        }

        Header {
            origin_rank: self.origin_rank.load(Ordering::Relaxed),
            tag,
            payload_size: self.payload_size.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.tag.store(0, Ordering::Release);
    }

    pub fn is_empty(&self) -> bool {
        self.tag.load(Ordering::Acquire) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::simple(Header::new(1, 2, 3), vec![0,0,0,1, 0,0,0,2, 0,0,0,0,0,0,0,3])]
    #[case::empty(Header::EMPTY, vec![0; 16])]
    #[case::big(Header::new(0x01020304, 0xffffffff, 4096), vec![1,2,3,4, 255,255,255,255, 0,0,0,0,0,0,16,0])]
    fn test_ser(#[case] header: Header, #[case] expected: Vec<u8>) {
        let mut buf = BytesMut::new();
        header.ser(&mut buf);
        assert_eq!(buf.as_ref(), expected.as_slice());
        assert_eq!(buf.len(), Header::SERIALIZED_LEN);

        let mut b: &[u8] = &buf;
        assert_eq!(Header::deser(&mut b).unwrap(), header);
        assert!(b.is_empty());
    }

    #[rstest]
    #[case::empty(vec![])]
    #[case::rank_only(vec![0,0,0,1])]
    #[case::one_short(vec![0,0,0,1, 0,0,0,2, 0,0,0,0,0,0,0])]
    fn test_deser_too_short(#[case] buf: Vec<u8>) {
        let mut b: &[u8] = &buf;
        assert!(Header::deser(&mut b).is_err());
    }

    #[test]
    fn test_slot_write_read_reset() {
        let slot = HeaderSlot::new();
        assert!(slot.is_empty());
        assert_eq!(slot.read(), Header::EMPTY);

        slot.write(Header::new(3, 9, 4096));
        assert!(!slot.is_empty());
        assert_eq!(slot.read(), Header::new(3, 9, 4096));
        // reading does not consume
        assert_eq!(slot.read(), Header::new(3, 9, 4096));

        slot.reset();
        assert!(slot.is_empty());
        assert_eq!(slot.read(), Header::EMPTY);
    }

    #[test]
    fn test_slot_write_empty_header_leaves_slot_empty() {
        let slot = HeaderSlot::new();
        slot.write(Header::new(5, 0, 10));
        assert!(slot.is_empty());
        assert_eq!(slot.read(), Header::EMPTY);
    }
}
