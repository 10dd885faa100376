//! Ethernet II framing.

use std::convert::Infallible;

use arbitrary::Arbitrary;
use octs::{BufTooShortOr, Decode, Encode, FixedEncodeLen, Read, Write};

use crate::addr::LinkAddr;

/// The 14-byte Ethernet II header in front of every SR packet.
///
/// Data forwarding fills unicast addresses; flood origination and rebroadcast
/// set [`LinkAddr::BROADCAST`] as the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Arbitrary)]
pub struct EtherHeader {
    /// Destination hardware address.
    pub dst: LinkAddr,
    /// Source hardware address.
    pub src: LinkAddr,
    /// Protocol number of the SR overlay, chosen by configuration.
    pub ether_type: u16,
}

impl FixedEncodeLen for EtherHeader {
    const ENCODE_LEN: usize = LinkAddr::ENCODE_LEN * 2 + u16::ENCODE_LEN;
}

impl Encode for EtherHeader {
    type Error = Infallible;

    fn encode(&self, mut dst: impl Write) -> Result<(), BufTooShortOr<Self::Error>> {
        dst.write(&self.dst)?;
        dst.write(&self.src)?;
        dst.write(&self.ether_type)?;
        Ok(())
    }
}

impl Decode for EtherHeader {
    type Error = Infallible;

    fn decode(mut src: impl Read) -> Result<Self, BufTooShortOr<Self::Error>> {
        Ok(Self {
            dst: src.read()?,
            src: src.read()?,
            ether_type: src.read()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use octs::BytesMut;

    use super::*;

    #[test]
    fn encode_decode() {
        let v = EtherHeader {
            dst: LinkAddr::BROADCAST,
            src: LinkAddr([2, 0, 0, 0, 0, 9]),
            ether_type: 0x0644,
        };
        let mut buf = BytesMut::with_capacity(EtherHeader::ENCODE_LEN);

        buf.write(&v).unwrap();
        assert_eq!(EtherHeader::ENCODE_LEN, buf.len());
        assert_eq!(&[0x06, 0x44], &buf[12..14]);

        assert_eq!(v, buf.freeze().read::<EtherHeader>().unwrap());
    }
}
