//! The source-route data path.
//!
//! [`Forwarder::encap`] wraps a local payload in Ethernet + SR framing along
//! an explicit path; [`Forwarder::push`] advances an in-flight frame one hop,
//! harvesting link observations from every packet it touches. Frames for
//! this node come back as [`Forwarded::Upward`]; everything else is
//! re-emitted toward the next hop as [`Forwarded::Wire`].

use octs::Bytes;
use tracing::warn;

use crate::addr::{LinkAddr, NodeAddr, index_of};
use crate::harvest::harvest_samples;
use crate::table::{ArpTable, LinkTable};
use crate::wire::{EtherHeader, PT_DATA, SrFrame, SrHeader, decode_frame, encode_frame};

/// Which port a frame entered the forwarder on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingress {
    /// Received off the wire.
    Wire,
    /// Looped in from this node's own encapsulation path.
    Host,
}

/// What the forwarder wants done with a processed frame.
#[derive(Debug)]
pub enum Forwarded {
    /// Emit on the wire toward the next hop.
    Wire(Bytes),
    /// Terminal delivery: this node is the last hop.
    Upward {
        /// The payload, stripped of all framing.
        payload: Bytes,
        /// The origin of the source route, i.e. the gateway the payload
        /// entered the mesh through.
        gateway: NodeAddr,
    },
}

/// Failure to encapsulate a local payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncapError {
    /// This node is absent from the path, or is its terminal hop.
    #[error("{node} is not an interior hop of the path")]
    NotOnPath {
        /// This node.
        node: NodeAddr,
        /// The path it was asked to send along.
        path: Vec<NodeAddr>,
    },
    /// The payload does not fit the header's 16-bit length field.
    #[error("payload of {len} bytes does not fit a header")]
    PayloadTooLarge {
        /// Offending payload length.
        len: usize,
    },
}

/// The per-node forwarder state machine.
#[derive(Debug)]
pub struct Forwarder {
    ip: NodeAddr,
    eth: LinkAddr,
    ether_type: u16,
    datas: u64,
    databytes: u64,
}

impl Forwarder {
    /// Forwarder for the node at `ip`/`eth`, emitting frames with the given
    /// protocol number.
    #[must_use]
    pub const fn new(ip: NodeAddr, eth: LinkAddr, ether_type: u16) -> Self {
        Self {
            ip,
            eth,
            ether_type,
            datas: 0,
            databytes: 0,
        }
    }

    /// This node's overlay address.
    #[must_use]
    pub const fn ip(&self) -> NodeAddr {
        self.ip
    }

    /// This node's hardware address.
    #[must_use]
    pub const fn eth(&self) -> LinkAddr {
        self.eth
    }

    /// Wraps `payload` in Ethernet + SR framing along `path`.
    ///
    /// This node must appear in `path` at a non-terminal position; `next` is
    /// set one past it. A missing ARP entry for the next hop is not fatal:
    /// the frame goes out to the broadcast sentinel and the driver floods it.
    ///
    /// # Errors
    ///
    /// Errors if this node is not an interior hop of `path`, or the payload
    /// is too large to count.
    ///
    /// # Panics
    ///
    /// Panics if `path` has more than [`MAX_HOPS`] links.
    ///
    /// [`MAX_HOPS`]: crate::wire::MAX_HOPS
    #[allow(clippy::cast_possible_truncation)] // next < path.len() <= MAX_HOPS + 1
    pub fn encap(
        &mut self,
        payload: &[u8],
        path: &[NodeAddr],
        flags: u8,
        arp: &impl ArpTable,
    ) -> Result<Bytes, EncapError> {
        let next = match index_of(path, self.ip) {
            Some(i) if i + 1 < path.len() => i + 1,
            _ => {
                return Err(EncapError::NotOnPath {
                    node: self.ip,
                    path: path.to_vec(),
                });
            }
        };
        let data_len = u16::try_from(payload.len())
            .map_err(|_| EncapError::PayloadTooLarge { len: payload.len() })?;

        let header = SrHeader::new_data(path, next as u8, flags, data_len);
        let next_hop = path[next];
        let dst = arp.lookup(next_hop);
        if dst.is_broadcast() {
            warn!("encap: arp lookup failed for {next_hop}, broadcasting");
        }
        let ether = EtherHeader {
            dst,
            src: self.eth,
            ether_type: self.ether_type,
        };
        self.datas += 1;
        self.databytes += u64::from(data_len);
        Ok(encode_frame(&ether, &header, payload))
    }

    /// Advances an in-flight data frame one hop.
    ///
    /// Every frame that gets this far is mined for link observations, and
    /// the previous hop's MAC is snooped into the ARP table. Before
    /// re-emitting, the record for the link the frame just crossed is
    /// overwritten with this node's own current view of it.
    ///
    /// Returns `None` when the frame is dropped: undecodable, not a data
    /// packet, or not addressed to this node.
    pub fn push(
        &mut self,
        frame: &Bytes,
        ingress: Ingress,
        links: &mut impl LinkTable,
        arp: &mut impl ArpTable,
    ) -> Option<Forwarded> {
        let SrFrame {
            mut ether,
            mut header,
            payload,
        } = match decode_frame(frame) {
            Ok(f) => f,
            Err(err) => {
                warn!("dropping undecodable frame: {err}");
                return None;
            }
        };
        if header.ptype != PT_DATA {
            warn!("bad packet type {:#06x}", header.ptype);
            return None;
        }

        let next = usize::from(header.next);
        if next > header.num_links() {
            // the validator rejects these; a frame that skipped it is junk
            warn!("next hop {next} out of range ({} links)", header.num_links());
            return None;
        }
        if ingress == Ingress::Wire && header.link_node(next) != self.ip {
            // an upstream arp miss turns into a broadcast; don't complain then
            if !ether.dst.is_broadcast() {
                warn!(
                    "data not for me: seq {} {}/{} ip {} eth {}",
                    header.data_seq,
                    header.next,
                    header.num_links(),
                    header.link_node(next),
                    ether.dst,
                );
            }
            return None;
        }

        harvest_samples(&header, links);

        if next > 0 {
            arp.insert(header.link_node(next - 1), ether.src);
        }

        if next == header.num_links() {
            // this node is the ultimate consumer
            return Some(Forwarded::Upward {
                payload,
                gateway: header.link_node(0),
            });
        }
        if next == 0 {
            // origin slot with hops still to go can only be a reflection of
            // our own transmit; nothing sane to do with it
            warn!("data with next 0 from {}", header.link_node(0));
            return None;
        }

        let prev = header.link_node(next - 1);
        let fwd = links.get_link_metric(prev, self.ip);
        let rev = links.get_link_metric(self.ip, prev);
        let seq = links.get_link_seq(self.ip, prev);
        let age = links.get_link_age(self.ip, prev);
        header.set_link(next - 1, prev, self.ip, fwd, rev, seq, age);

        header.next += 1;
        let next_hop = header.link_node(usize::from(header.next));
        let dst = arp.lookup(next_hop);
        if dst.is_broadcast() {
            warn!("forward: arp lookup failed for {next_hop}, broadcasting");
        }
        ether.dst = dst;
        ether.src = self.eth;
        self.datas += 1;
        self.databytes += u64::from(header.data_len);
        Some(Forwarded::Wire(encode_frame(&ether, &header, &payload)))
    }

    /// Human-readable transmit counters.
    #[must_use]
    pub fn stats(&self) -> String {
        format!(
            "{} datas sent\n{} bytes of data sent\n",
            self.datas, self.databytes
        )
    }
}
