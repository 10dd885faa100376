//! Link-quality metrics and the ETT estimator.

use std::convert::Infallible;
use std::fmt;

use arbitrary::Arbitrary;
use octs::{BufTooShortOr, Decode, Encode, FixedEncodeLen, Read, Write};

use crate::addr::NodeAddr;

/// Cost of traversing a link, in microseconds of expected air time.
///
/// Smaller is better. The zero value means "unknown/invalid"; it never
/// propagates into a link table and never wins a route comparison.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Arbitrary,
)]
pub struct Metric(pub u32);

impl Metric {
    /// The "no measurement" sentinel.
    pub const UNKNOWN: Self = Self(0);

    /// Whether this metric carries an actual measurement.
    #[must_use]
    pub const fn is_known(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FixedEncodeLen for Metric {
    const ENCODE_LEN: usize = u32::ENCODE_LEN;
}

impl Encode for Metric {
    type Error = Infallible;

    fn encode(&self, mut dst: impl Write) -> Result<(), BufTooShortOr<Self::Error>> {
        dst.write(&self.0)
    }
}

impl Decode for Metric {
    type Error = Infallible;

    fn decode(mut src: impl Read) -> Result<Self, BufTooShortOr<Self::Error>> {
        Ok(Self(src.read()?))
    }
}

/// One hop's worth of observed link quality, as carried in packet headers.
///
/// `seq` is the originator's sequence counter for the observation; `age` is
/// the elapsed time in seconds at capture. The all-[`Metric::UNKNOWN`],
/// all-invalid default marks an empty slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Arbitrary)]
pub struct LinkSample {
    /// Transmitting end of the observed link.
    pub from: NodeAddr,
    /// Receiving end of the observed link.
    pub to: NodeAddr,
    /// Metric in the `from -> to` direction.
    pub fwd: Metric,
    /// Metric in the `to -> from` direction.
    pub rev: Metric,
    /// Originator's sequence counter for this observation.
    pub seq: u32,
    /// Elapsed seconds at observation capture.
    pub age: u32,
}

impl FixedEncodeLen for LinkSample {
    const ENCODE_LEN: usize =
        NodeAddr::ENCODE_LEN * 2 + Metric::ENCODE_LEN * 2 + u32::ENCODE_LEN * 2;
}

impl Encode for LinkSample {
    type Error = Infallible;

    fn encode(&self, mut dst: impl Write) -> Result<(), BufTooShortOr<Self::Error>> {
        dst.write(&self.from)?;
        dst.write(&self.to)?;
        dst.write(&self.fwd)?;
        dst.write(&self.rev)?;
        dst.write(&self.seq)?;
        dst.write(&self.age)?;
        Ok(())
    }
}

impl Decode for LinkSample {
    type Error = Infallible;

    fn decode(mut src: impl Read) -> Result<Self, BufTooShortOr<Self::Error>> {
        Ok(Self {
            from: src.read()?,
            to: src.read()?,
            fwd: src.read()?,
            rev: src.read()?,
            seq: src.read()?,
            age: src.read()?,
        })
    }
}

// 802.11b DSSS timing, pg 205 of IEEE 802.11-1999. `rate` is in 500 kb/s
// units, so rate == 2 is the 1 Mb/s long-preamble case.
const T_SLOT: u64 = 20;
const T_SIFS: u64 = 10;
const T_DIFS: u64 = 50;
const T_ACK: u64 = 304;
const PLCP_LONG: u64 = 192;
const PLCP_SHORT: u64 = 96;
const CW_MIN: u64 = 31;
const CW_MAX: u64 = 1023;

/// Expected air time, in microseconds, to deliver one `len`-byte frame at
/// `rate` (500 kb/s units) with `retries` retransmissions.
///
/// Each attempt costs a DIFS, the expected backoff at the attempt's
/// contention window, the PLCP preamble, the payload air time, a SIFS, and
/// the ACK. The window doubles per retry up to the 802.11 maximum. Returns 0
/// when either `len` or `rate` is 0.
#[must_use]
pub fn packet_usecs(len: u32, rate: u32, retries: u32) -> u32 {
    if len == 0 || rate == 0 {
        return 0;
    }
    let plcp = if rate == 2 { PLCP_LONG } else { PLCP_SHORT };
    let tx = u64::from(len) * 8 * 2 / u64::from(rate);

    let mut cw = CW_MIN;
    let mut total: u64 = 0;
    for _ in 0..=retries {
        total += T_DIFS + (cw * T_SLOT) / 2 + plcp + tx + T_SIFS + T_ACK;
        cw = CW_MAX.min((cw + 1) * 2 - 1);
    }
    u32::try_from(total).unwrap_or(u32::MAX)
}

/// Estimated Transmission Time of a link, given per-direction delivery
/// probabilities in percent and a transmit rate in 500 kb/s units.
///
/// The expected retry count is computed in hundredths and the air time is
/// interpolated linearly between the two neighboring whole retry counts.
/// Either probability being 0 yields [`Metric::UNKNOWN`].
#[must_use]
pub fn ett_metric(ack_prob: u32, data_prob: u32, data_rate: u32) -> Metric {
    if ack_prob == 0 || data_prob == 0 {
        return Metric::UNKNOWN;
    }
    let retries_hundredths = 100 * 100 * 100 / (ack_prob * data_prob) - 100;
    let low = u64::from(packet_usecs(1500, data_rate, retries_hundredths / 100));
    let high = u64::from(packet_usecs(1500, data_rate, retries_hundredths / 100 + 1));
    let frac = u64::from(retries_hundredths % 100);
    let avg = (frac * high + (100 - frac) * low) / 100;
    Metric(u32::try_from(avg).unwrap_or(u32::MAX))
}

#[cfg(test)]
mod tests {
    use octs::BytesMut;

    use super::*;

    #[test]
    fn sample_encode_decode() {
        let v = LinkSample {
            from: NodeAddr(0x0a00_0001),
            to: NodeAddr(0x0a00_0002),
            fwd: Metric(700),
            rev: Metric(1400),
            seq: 42,
            age: 3,
        };
        let mut buf = BytesMut::with_capacity(LinkSample::ENCODE_LEN);

        buf.write(&v).unwrap();
        assert_eq!(LinkSample::ENCODE_LEN, buf.len());

        assert_eq!(v, buf.freeze().read::<LinkSample>().unwrap());
    }

    #[test]
    fn perfect_link_is_zero_retries() {
        for rate in [2, 4, 11, 22, 108] {
            assert_eq!(packet_usecs(1500, rate, 0), ett_metric(100, 100, rate).0);
        }
    }

    #[test]
    fn dead_link_is_unknown() {
        assert_eq!(Metric::UNKNOWN, ett_metric(0, 90, 2));
        assert_eq!(Metric::UNKNOWN, ett_metric(90, 0, 2));
        assert_eq!(Metric::UNKNOWN, ett_metric(0, 0, 22));
    }

    #[test]
    fn interpolation_is_exact() {
        // 80% both ways: 100*100*100 / 6400 - 100 = 56 hundredths,
        // so 56% of one retry and 44% of none.
        let low = u64::from(packet_usecs(1500, 22, 0));
        let high = u64::from(packet_usecs(1500, 22, 1));
        let want = (56 * high + 44 * low) / 100;
        assert_eq!(want, u64::from(ett_metric(80, 80, 22).0));
    }

    #[test]
    fn lossier_is_costlier() {
        let clean = ett_metric(100, 100, 22);
        let lossy = ett_metric(70, 70, 22);
        let worse = ett_metric(40, 40, 22);
        assert!(clean < lossy);
        assert!(lossy < worse);
    }

    #[test]
    fn airtime_grows_with_retries() {
        let one = packet_usecs(1500, 22, 0);
        let two = packet_usecs(1500, 22, 1);
        assert!(two > one);
        // the second attempt pays a wider contention window
        assert!(two - one > one - packet_usecs(0, 22, 0));
    }

    #[test]
    fn airtime_degenerate_args() {
        assert_eq!(0, packet_usecs(0, 22, 0));
        assert_eq!(0, packet_usecs(1500, 0, 0));
    }
}
