//! Node and link addressing for the source-routed overlay.

use std::convert::Infallible;
use std::fmt;

use arbitrary::Arbitrary;
use octs::{BufTooShortOr, Decode, Encode, FixedEncodeLen, Read, Write};

/// IPv4-shaped identifier of a mesh node.
///
/// Addresses are opaque to the protocol apart from equality and the all-zero
/// [`NodeAddr::INVALID`] sentinel. Encoded as a big-endian `u32` on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Arbitrary)]
pub struct NodeAddr(pub u32);

impl NodeAddr {
    /// The all-zero "no such node" sentinel.
    pub const INVALID: Self = Self(0);

    /// Whether this address names an actual node.
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// The address as dotted-quad octets, most significant first.
    #[must_use]
    pub const fn octets(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }
}

impl From<[u8; 4]> for NodeAddr {
    fn from(octets: [u8; 4]) -> Self {
        Self(u32::from_be_bytes(octets))
    }
}

impl fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let [a, b, c, d] = self.octets();
        write!(f, "{a}.{b}.{c}.{d}")
    }
}

impl FixedEncodeLen for NodeAddr {
    const ENCODE_LEN: usize = u32::ENCODE_LEN;
}

impl Encode for NodeAddr {
    type Error = Infallible;

    fn encode(&self, mut dst: impl Write) -> Result<(), BufTooShortOr<Self::Error>> {
        dst.write(&self.0)
    }
}

impl Decode for NodeAddr {
    type Error = Infallible;

    fn decode(mut src: impl Read) -> Result<Self, BufTooShortOr<Self::Error>> {
        Ok(Self(src.read()?))
    }
}

/// 6-byte hardware address of a link-layer neighbor.
///
/// The all-ones [`LinkAddr::BROADCAST`] sentinel doubles as the "lookup
/// failed" value of [`ArpTable::lookup`]: emitting to it hands the frame to
/// the driver's broadcast path.
///
/// [`ArpTable::lookup`]: crate::table::ArpTable::lookup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Arbitrary)]
pub struct LinkAddr(pub [u8; 6]);

impl LinkAddr {
    /// The all-ones broadcast sentinel.
    pub const BROADCAST: Self = Self([0xff; 6]);

    /// Whether this is the broadcast sentinel.
    #[must_use]
    pub fn is_broadcast(self) -> bool {
        self == Self::BROADCAST
    }
}

impl fmt::Display for LinkAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FixedEncodeLen for LinkAddr {
    const ENCODE_LEN: usize = 6;
}

impl Encode for LinkAddr {
    type Error = Infallible;

    fn encode(&self, mut dst: impl Write) -> Result<(), BufTooShortOr<Self::Error>> {
        for b in self.0 {
            dst.write(&b)?;
        }
        Ok(())
    }
}

impl Decode for LinkAddr {
    type Error = Infallible;

    fn decode(mut src: impl Read) -> Result<Self, BufTooShortOr<Self::Error>> {
        let mut octets = [0u8; 6];
        for b in &mut octets {
            *b = src.read()?;
        }
        Ok(Self(octets))
    }
}

/// An explicit node-by-node route.
///
/// `path[0]` is the origin, `path[len - 1]` the final destination; adjacent
/// entries are directly reachable links. A path of length 1 names a node with
/// no hops.
pub type Path = Vec<NodeAddr>;

/// Position of `node` in `path`, if present.
#[must_use]
pub fn index_of(path: &[NodeAddr], node: NodeAddr) -> Option<usize> {
    path.iter().position(|n| *n == node)
}

/// Space-separated rendering of a path, for logs and dumps.
#[derive(Debug, Clone, Copy)]
pub struct DisplayPath<'a>(pub &'a [NodeAddr]);

impl fmt::Display for DisplayPath<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, node) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{node}")?;
        }
        Ok(())
    }
}
