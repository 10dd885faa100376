//! The on-wire SR packet format.
//!
//! An SR frame is Ethernet II framing, the SR header, then the payload:
//!
//! ```text
//! offset 0   u8  version        must equal SR_VERSION
//!        1   u8  type           bitfield, PT_DATA = 0x01
//!        2   u8  nhops          number of links
//!        3   u8  next           index of the node to receive this packet
//!        4   u8  flags
//!        5   u8  reserved
//!        6   u16 cksum          Internet 1's-complement over the header
//!        8   u16 data_len       payload length
//!       10   u32 data_seq
//!       14   u32 seq            set by the origin
//!       18   u32 qdst           discovery target, else 0
//!       22   link_sample        one randomized liveness sample, 24 bytes
//!       46   link[nhops]        (fwd, rev, seq, age), 16 bytes each
//!       ...  node[nhops + 1]    4 bytes each; node[i] is link i's sender
//!       ...  payload[data_len]  PT_DATA only
//! ```
//!
//! All integers are big-endian. The checksum covers `hlen_with_data` bytes of
//! the SR region for data packets and `hlen_wo_data` otherwise; trailing
//! Ethernet padding is outside it.

mod checksum;
mod ether;

pub use checksum::internet_checksum;
pub use ether::EtherHeader;

use std::convert::Infallible;

use arbitrary::Arbitrary;
use octs::{BufTooShortOr, Bytes, BytesMut, Decode, Encode, EncodeLen, FixedEncodeLen, Read, Write};
use static_assertions::const_assert_eq;

use crate::addr::{NodeAddr, Path};
use crate::metric::{LinkSample, Metric};

/// Version byte this crate speaks; anything else is rejected.
pub const SR_VERSION: u8 = 0x0c;

/// Type bit marking a data/forward packet.
pub const PT_DATA: u8 = 0x01;

/// Mask of type bits the codec understands. A type byte with none of these
/// set is rejected at decode.
pub const KNOWN_TYPES: u8 = PT_DATA;

/// Most links a single header can carry.
pub const MAX_HOPS: usize = u8::MAX as usize;

pub(crate) const ETHER_LEN: usize = EtherHeader::ENCODE_LEN;

/// Length of the fixed prefix, through the random link sample.
pub(crate) const FIXED_LEN: usize = 22 + LinkSample::ENCODE_LEN;
pub(crate) const LINK_LEN: usize = LinkEntry::ENCODE_LEN;
pub(crate) const NODE_LEN: usize = NodeAddr::ENCODE_LEN;

// SR-relative offsets the staged validator peeks at.
pub(crate) const VERSION_OFF: usize = 0;
pub(crate) const TYPE_OFF: usize = 1;
pub(crate) const NHOPS_OFF: usize = 2;
pub(crate) const NEXT_OFF: usize = 3;
pub(crate) const CKSUM_OFF: usize = 6;
pub(crate) const DATA_LEN_OFF: usize = 8;

/// Header length, excluding payload, for a given hop count.
#[must_use]
pub const fn hlen_wo_data(nhops: usize) -> usize {
    FIXED_LEN + nhops * LINK_LEN + (nhops + 1) * NODE_LEN
}

/// Shortest possible SR header: zero links, one node slot.
pub(crate) const MIN_HLEN: usize = hlen_wo_data(0);

const_assert_eq!(46, FIXED_LEN);
const_assert_eq!(50, MIN_HLEN);
const_assert_eq!(16, LINK_LEN);

/// Per-hop metric record carried in the header's link array.
///
/// The endpoints live in the node array: link `i` runs from node `i` to node
/// `i + 1`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Arbitrary)]
pub struct LinkEntry {
    /// Metric from node `i` to node `i + 1`.
    pub fwd: Metric,
    /// Metric from node `i + 1` to node `i`.
    pub rev: Metric,
    /// Sequence counter of the observation.
    pub seq: u32,
    /// Age in seconds of the observation.
    pub age: u32,
}

impl FixedEncodeLen for LinkEntry {
    const ENCODE_LEN: usize = Metric::ENCODE_LEN * 2 + u32::ENCODE_LEN * 2;
}

impl Encode for LinkEntry {
    type Error = Infallible;

    fn encode(&self, mut dst: impl Write) -> Result<(), BufTooShortOr<Self::Error>> {
        dst.write(&self.fwd)?;
        dst.write(&self.rev)?;
        dst.write(&self.seq)?;
        dst.write(&self.age)?;
        Ok(())
    }
}

impl Decode for LinkEntry {
    type Error = Infallible;

    fn decode(mut src: impl Read) -> Result<Self, BufTooShortOr<Self::Error>> {
        Ok(Self {
            fwd: src.read()?,
            rev: src.read()?,
            seq: src.read()?,
            age: src.read()?,
        })
    }
}

/// The SR header itself.
///
/// The link and node arrays are kept consistent by construction: there is
/// always exactly one more node slot than link records. Decoded headers
/// re-encode byte-exact, including the stored checksum and the reserved byte;
/// [`encode_frame`] recomputes the checksum when a header is (re)emitted.
#[derive(Debug, Clone, PartialEq, Eq, Arbitrary)]
pub struct SrHeader {
    /// Protocol version, [`SR_VERSION`] on everything this crate builds.
    pub version: u8,
    /// Packet type bitfield.
    pub ptype: u8,
    /// Index of the node that should receive this packet next.
    pub next: u8,
    /// Flag bits, origin-defined.
    pub flags: u8,
    reserved: u8,
    /// Checksum as stored on the wire.
    pub cksum: u16,
    /// Payload length counted by the header.
    pub data_len: u16,
    /// Data-path sequence number.
    pub data_seq: u32,
    /// Sequence number set by the origin.
    pub seq: u32,
    /// Destination of a discovery query, else [`NodeAddr::INVALID`].
    pub qdst: NodeAddr,
    /// Randomized extra liveness sample, preserved byte-exact on forward.
    pub random: LinkSample,
    links: Vec<LinkEntry>,
    nodes: Vec<NodeAddr>,
}

impl SrHeader {
    /// Fresh data header along `path` with zeroed link records.
    ///
    /// # Panics
    ///
    /// Panics if `path` is empty or longer than [`MAX_HOPS`] `+ 1`.
    #[must_use]
    pub fn new_data(path: &[NodeAddr], next: u8, flags: u8, data_len: u16) -> Self {
        assert!(!path.is_empty(), "a path names at least its origin");
        assert!(path.len() <= MAX_HOPS + 1, "path too long for one header");
        Self {
            version: SR_VERSION,
            ptype: PT_DATA,
            next,
            flags,
            reserved: 0,
            cksum: 0,
            data_len,
            data_seq: 0,
            seq: 0,
            qdst: NodeAddr::INVALID,
            random: LinkSample::default(),
            links: vec![LinkEntry::default(); path.len() - 1],
            nodes: path.to_vec(),
        }
    }

    /// Number of links; one less than the number of node slots.
    #[must_use]
    pub fn num_links(&self) -> usize {
        self.links.len()
    }

    /// Whether the type bitfield has [`PT_DATA`] set.
    #[must_use]
    pub const fn is_data(&self) -> bool {
        self.ptype & PT_DATA != 0
    }

    /// Node in slot `i`, valid for `i <= num_links()`.
    ///
    /// # Panics
    ///
    /// Panics if `i` is out of range.
    #[must_use]
    pub fn link_node(&self, i: usize) -> NodeAddr {
        self.nodes[i]
    }

    /// Metric record of link `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i >= num_links()`.
    #[must_use]
    pub fn link(&self, i: usize) -> &LinkEntry {
        &self.links[i]
    }

    /// All metric records, in hop order.
    #[must_use]
    pub fn links(&self) -> &[LinkEntry] {
        &self.links
    }

    /// All node slots, origin first.
    #[must_use]
    pub fn nodes(&self) -> &[NodeAddr] {
        &self.nodes
    }

    /// The node array as an owned [`Path`].
    #[must_use]
    pub fn path(&self) -> Path {
        self.nodes.clone()
    }

    /// Overwrites link `i` and both its endpoint slots.
    ///
    /// # Panics
    ///
    /// Panics if `i >= num_links()`.
    pub fn set_link(
        &mut self,
        i: usize,
        from: NodeAddr,
        to: NodeAddr,
        fwd: Metric,
        rev: Metric,
        seq: u32,
        age: u32,
    ) {
        self.links[i] = LinkEntry { fwd, rev, seq, age };
        self.nodes[i] = from;
        self.nodes[i + 1] = to;
    }

    /// Header length without payload.
    #[must_use]
    pub fn hlen_wo_data(&self) -> usize {
        hlen_wo_data(self.num_links())
    }

    /// Header length plus the payload counted in `data_len`.
    #[must_use]
    pub fn hlen_with_data(&self) -> usize {
        self.hlen_wo_data() + usize::from(self.data_len)
    }
}

impl EncodeLen for SrHeader {
    fn encode_len(&self) -> usize {
        self.hlen_wo_data()
    }
}

impl Encode for SrHeader {
    type Error = Infallible;

    #[allow(clippy::cast_possible_truncation)] // construction caps links at MAX_HOPS
    fn encode(&self, mut dst: impl Write) -> Result<(), BufTooShortOr<Self::Error>> {
        dst.write(&self.version)?;
        dst.write(&self.ptype)?;
        dst.write(&(self.links.len() as u8))?;
        dst.write(&self.next)?;
        dst.write(&self.flags)?;
        dst.write(&self.reserved)?;
        dst.write(&self.cksum)?;
        dst.write(&self.data_len)?;
        dst.write(&self.data_seq)?;
        dst.write(&self.seq)?;
        dst.write(&self.qdst)?;
        dst.write(&self.random)?;
        for link in &self.links {
            dst.write(link)?;
        }
        for node in &self.nodes {
            dst.write(node)?;
        }
        Ok(())
    }
}

impl Decode for SrHeader {
    type Error = Infallible;

    fn decode(mut src: impl Read) -> Result<Self, BufTooShortOr<Self::Error>> {
        let version = src.read()?;
        let ptype = src.read()?;
        let nhops = src.read::<u8>()?;
        let next = src.read()?;
        let flags = src.read()?;
        let reserved = src.read()?;
        let cksum = src.read()?;
        let data_len = src.read()?;
        let data_seq = src.read()?;
        let seq = src.read()?;
        let qdst = src.read()?;
        let random = src.read()?;
        let mut links = Vec::with_capacity(usize::from(nhops));
        for _ in 0..nhops {
            links.push(src.read()?);
        }
        let mut nodes = Vec::with_capacity(usize::from(nhops) + 1);
        for _ in 0..=nhops {
            nodes.push(src.read()?);
        }
        Ok(Self {
            version,
            ptype,
            next,
            flags,
            reserved,
            cksum,
            data_len,
            data_seq,
            seq,
            qdst,
            random,
            links,
            nodes,
        })
    }
}

/// A fully decoded frame.
#[derive(Debug, Clone)]
pub struct SrFrame {
    /// The Ethernet framing.
    pub ether: EtherHeader,
    /// The SR header.
    pub header: SrHeader,
    /// Payload view into the original frame; empty for non-data types.
    pub payload: Bytes,
}

/// Codec-level rejection of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// The frame ended before the header did.
    #[error("frame truncated")]
    Truncated,
    /// No known bit is set in the type byte.
    #[error("unknown packet type {ptype:#04x}")]
    UnknownType {
        /// The offending type byte.
        ptype: u8,
    },
    /// The payload counted by `data_len` runs past the frame end.
    #[error("header and payload run past the frame end")]
    BadLength,
}

/// Decodes a whole frame, tolerating trailing Ethernet padding.
///
/// # Errors
///
/// Errors if the frame is shorter than its header claims or the type byte is
/// unknown. No checksum or version judgement happens here; that is the
/// validator's job.
pub fn decode_frame(frame: &Bytes) -> Result<SrFrame, FrameError> {
    let mut buf = frame.clone();
    let ether = buf
        .read::<EtherHeader>()
        .map_err(|_| FrameError::Truncated)?;
    let header = buf.read::<SrHeader>().map_err(|_| FrameError::Truncated)?;
    if header.ptype & KNOWN_TYPES == 0 {
        return Err(FrameError::UnknownType {
            ptype: header.ptype,
        });
    }
    let payload = if header.is_data() {
        let start = ETHER_LEN + header.hlen_wo_data();
        let end = start + usize::from(header.data_len);
        if end > frame.len() {
            return Err(FrameError::BadLength);
        }
        frame.slice(start..end)
    } else {
        Bytes::new()
    };
    Ok(SrFrame {
        ether,
        header,
        payload,
    })
}

/// Assembles a frame and stores a fresh checksum in it.
///
/// The checksum field is zeroed, the 1's-complement sum is taken over
/// `hlen_with_data` bytes of the SR region for data packets (`hlen_wo_data`
/// otherwise), and the complement is stored. For data packets `payload` must
/// be exactly `header.data_len` bytes.
#[must_use]
#[allow(clippy::missing_panics_doc)] // writes into a growable buffer cannot fail
pub fn encode_frame(ether: &EtherHeader, header: &SrHeader, payload: &[u8]) -> Bytes {
    debug_assert!(
        !header.is_data() || usize::from(header.data_len) == payload.len(),
        "data_len must count the payload"
    );
    let hlen = header.hlen_wo_data();
    let tlen = if header.is_data() {
        hlen + payload.len()
    } else {
        hlen
    };
    let mut buf = BytesMut::with_capacity(ETHER_LEN + hlen + payload.len());
    buf.write(ether).unwrap();
    buf.write(header).unwrap();
    buf.write_from(payload).unwrap();

    let ck_at = ETHER_LEN + CKSUM_OFF;
    buf[ck_at..ck_at + 2].copy_from_slice(&[0, 0]);
    let ck = internet_checksum(&buf[ETHER_LEN..ETHER_LEN + tlen]);
    buf[ck_at..ck_at + 2].copy_from_slice(&ck.to_be_bytes());
    buf.freeze()
}
