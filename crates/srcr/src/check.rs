//! Staged validation of incoming SR frames.
//!
//! Sits between the wire and the rest of the data plane. Checks run in a
//! fixed order and the first failure wins; a rejected frame is handed back to
//! the embedder so a diagnostic tap can keep it, and is otherwise dropped.

use std::fmt::Write as _;

use ahash::AHashMap;
use octs::Bytes;
use tracing::warn;

use crate::addr::LinkAddr;
use crate::wire::{
    self, DATA_LEN_OFF, ETHER_LEN, MIN_HLEN, NEXT_OFF, NHOPS_OFF, PT_DATA, SR_VERSION, TYPE_OFF,
    VERSION_OFF, internet_checksum,
};

/// Why a frame failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CheckError {
    /// Shorter than Ethernet framing plus the minimum SR header.
    #[error("frame truncated")]
    Truncated,
    /// Version byte is not ours.
    #[error("unknown sr version {version:#04x}")]
    BadVersion {
        /// The offending version byte.
        version: u8,
    },
    /// The header (plus counted payload) runs past the frame.
    #[error("bad packet size, wanted {want}, only got {got}")]
    BadLength {
        /// Bytes the header claims.
        want: usize,
        /// Bytes actually present after the Ethernet header.
        got: usize,
    },
    /// The 1's-complement sum over the header range is not zero.
    #[error("bad sr checksum")]
    BadChecksum,
    /// `next` points past the last node slot.
    #[error("next hop {next} out of range ({nhops} links)")]
    BadNextHop {
        /// The `next` index found.
        next: u8,
        /// The link count found.
        nhops: u8,
    },
}

/// A frame the validator refused, with the reason.
///
/// The frame is returned intact so an embedder with a diagnostic output can
/// mirror it there instead of freeing it.
#[derive(Debug)]
pub struct Rejected {
    /// The untouched frame.
    pub frame: Bytes,
    /// Why it was refused.
    pub error: CheckError,
}

/// The header validator.
///
/// Counts drops and remembers which neighbors speak the wrong version. The
/// first drop and the first bad version are logged verbosely; everything
/// after only increments counters.
#[derive(Debug)]
pub struct HeaderCheck {
    version: u8,
    drops: u64,
    logged_drop: bool,
    logged_version: bool,
    bad_table: AHashMap<LinkAddr, u8>,
}

impl Default for HeaderCheck {
    fn default() -> Self {
        Self::new(SR_VERSION)
    }
}

impl HeaderCheck {
    /// Validator accepting the given version byte.
    #[must_use]
    pub fn new(version: u8) -> Self {
        Self {
            version,
            drops: 0,
            logged_drop: false,
            logged_version: false,
            bad_table: AHashMap::new(),
        }
    }

    /// Runs the ordered checks over `frame`.
    ///
    /// # Errors
    ///
    /// Errors with the frame and the first failed check; the drop counter has
    /// already been incremented when this returns.
    pub fn check(&mut self, frame: Bytes) -> Result<Bytes, Rejected> {
        match self.inspect(&frame) {
            Ok(()) => Ok(frame),
            Err(error) => {
                if !self.logged_drop {
                    self.logged_drop = true;
                    warn!("first drop: {error}");
                }
                self.drops += 1;
                Err(Rejected { frame, error })
            }
        }
    }

    fn inspect(&mut self, frame: &[u8]) -> Result<(), CheckError> {
        if frame.len() < ETHER_LEN + MIN_HLEN {
            return Err(CheckError::Truncated);
        }
        let sr = &frame[ETHER_LEN..];

        let version = sr[VERSION_OFF];
        if version != self.version {
            let src = LinkAddr(frame[6..12].try_into().unwrap_or_default());
            self.bad_table.insert(src, version);
            if !self.logged_version {
                self.logged_version = true;
                warn!("unknown sr version {version:#04x} from {src}");
            }
            return Err(CheckError::BadVersion { version });
        }

        let nhops = sr[NHOPS_OFF];
        let tlen = if sr[TYPE_OFF] & PT_DATA != 0 {
            let data_len = u16::from_be_bytes([sr[DATA_LEN_OFF], sr[DATA_LEN_OFF + 1]]);
            wire::hlen_wo_data(usize::from(nhops)) + usize::from(data_len)
        } else {
            wire::hlen_wo_data(usize::from(nhops))
        };
        // short frames are padded up to the Ethernet minimum, so only the
        // lower bound can be checked
        if tlen > sr.len() {
            return Err(CheckError::BadLength {
                want: tlen,
                got: sr.len(),
            });
        }

        if internet_checksum(&sr[..tlen]) != 0 {
            return Err(CheckError::BadChecksum);
        }

        let next = sr[NEXT_OFF];
        if next > nhops {
            return Err(CheckError::BadNextHop { next, nhops });
        }

        Ok(())
    }

    /// Frames refused so far.
    #[must_use]
    pub const fn drops(&self) -> u64 {
        self.drops
    }

    /// One line per neighbor that sent a wrong version byte.
    #[must_use]
    pub fn bad_nodes(&self) -> String {
        let mut out = String::new();
        for (mac, version) in &self.bad_table {
            let _ = writeln!(out, "eth {mac} version {version}");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::addr::NodeAddr;
    use crate::metric::Metric;
    use crate::wire::{EtherHeader, SrHeader, encode_frame};

    fn good_frame() -> Bytes {
        let path = [NodeAddr(0x0a00_0001), NodeAddr(0x0a00_0002)];
        let mut hdr = SrHeader::new_data(&path, 1, 0, 4);
        hdr.set_link(0, path[0], path[1], Metric(100), Metric(110), 1, 0);
        let ether = EtherHeader {
            dst: LinkAddr([2, 0, 0, 0, 0, 2]),
            src: LinkAddr([2, 0, 0, 0, 0, 1]),
            ether_type: 0x0644,
        };
        encode_frame(&ether, &hdr, b"ping")
    }

    #[test]
    fn accepts_a_clean_frame() {
        let mut check = HeaderCheck::default();
        assert!(check.check(good_frame()).is_ok());
        assert_eq!(0, check.drops());
    }

    #[test]
    fn rejects_truncated() {
        let mut check = HeaderCheck::default();
        let frame = good_frame().slice(..ETHER_LEN + MIN_HLEN - 1);
        let rej = check.check(frame).unwrap_err();
        assert_eq!(CheckError::Truncated, rej.error);
        assert_eq!(1, check.drops());
    }

    #[test]
    fn rejects_and_records_bad_version() {
        let mut check = HeaderCheck::default();
        let mut raw = good_frame().to_vec();
        raw[ETHER_LEN + VERSION_OFF] = SR_VERSION ^ 1;
        let rej = check.check(Bytes::from(raw)).unwrap_err();

        assert_matches!(rej.error, CheckError::BadVersion { version } if version == SR_VERSION ^ 1);
        assert_eq!(1, check.drops());
        let dump = check.bad_nodes();
        assert!(dump.contains("02:00:00:00:00:01"));
        assert!(dump.contains(&format!("version {}", SR_VERSION ^ 1)));
    }

    #[test]
    fn rejects_overlong_header() {
        let mut check = HeaderCheck::default();
        let mut raw = good_frame().to_vec();
        // claim far more payload than the frame carries
        raw[ETHER_LEN + DATA_LEN_OFF] = 0x01;
        let rej = check.check(Bytes::from(raw)).unwrap_err();
        assert_matches!(rej.error, CheckError::BadLength { .. });
    }

    #[test]
    fn tolerates_ethernet_padding() {
        let mut check = HeaderCheck::default();
        let mut raw = good_frame().to_vec();
        raw.resize(raw.len() + 10, 0);
        assert!(check.check(Bytes::from(raw)).is_ok());
    }

    #[test]
    fn rejects_corrupt_checksum() {
        let mut check = HeaderCheck::default();
        let mut raw = good_frame().to_vec();
        // a byte in the qdst field, past everything the earlier stages read
        raw[ETHER_LEN + 20] ^= 0x08;
        let rej = check.check(Bytes::from(raw)).unwrap_err();
        assert_eq!(CheckError::BadChecksum, rej.error);
        assert_eq!(1, check.drops());
    }

    #[test]
    fn rejects_next_past_last_hop() {
        let mut check = HeaderCheck::default();
        let path = [NodeAddr(0x0a00_0001), NodeAddr(0x0a00_0002)];
        let hdr = SrHeader::new_data(&path, 2, 0, 0);
        let ether = EtherHeader {
            dst: LinkAddr::BROADCAST,
            src: LinkAddr([2, 0, 0, 0, 0, 1]),
            ether_type: 0x0644,
        };
        let rej = check.check(encode_frame(&ether, &hdr, b"")).unwrap_err();
        assert_eq!(
            CheckError::BadNextHop { next: 2, nhops: 1 },
            rej.error
        );
    }

    #[test]
    fn counts_every_drop() {
        let mut check = HeaderCheck::default();
        for _ in 0..3 {
            let mut raw = good_frame().to_vec();
            raw[ETHER_LEN + VERSION_OFF] = 0x7f;
            let _ = check.check(Bytes::from(raw));
        }
        assert_eq!(3, check.drops());
        // same sender, one table entry
        assert_eq!(1, check.bad_nodes().lines().count());
    }
}
