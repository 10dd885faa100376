//! Route-discovery flooding.
//!
//! A discovery query spreads as an origin-rooted broadcast. Every node
//! rebroadcasts a given `(origin, seq)` pair at most once, after a jittered
//! delay, and rewrites the query's route to the best path it currently knows
//! back to the origin; receivers closer to the target thereby converge on
//! low-metric routes even when the first copy to arrive took a poor path.
//!
//! The engine is sans-IO. [`Flood::process_flood`] returns the frame to hand
//! to the local route resolver; rebroadcasts come out of
//! [`Flood::poll_rebroadcast`], which the embedder calls when the deadline
//! from [`Flood::next_wakeup`] arrives. Timers reference records by
//! `(origin, seq)` key, so FIFO eviction of the seen arena can never leave a
//! dangling callback, it just silently cancels the rebroadcast.

use std::collections::VecDeque;
use std::fmt::Write as _;

use ahash::{AHashMap, AHashSet};
use octs::Bytes;
use tracing::{debug, warn};
use web_time::{Duration, Instant};

use crate::addr::{LinkAddr, NodeAddr};
use crate::harvest::harvest_samples;
use crate::table::{ArpTable, LinkTable, Rng};
use crate::wire::{EtherHeader, SrHeader, decode_frame, encode_frame};

/// Tunables of the flood engine.
///
/// The defaults are the protocol constants; change them only if every node
/// in the mesh changes them the same way.
#[derive(Debug, Clone)]
pub struct FloodConfig {
    /// Most `(origin, seq)` records kept before FIFO eviction.
    pub max_seen: usize,
    /// Lower bound of the rebroadcast jitter, in milliseconds.
    pub jitter_min_ms: u32,
    /// Upper bound of the rebroadcast jitter, inclusive, in milliseconds.
    pub jitter_max_ms: u32,
    /// Starting value of the origin sequence counter. Seed it with something
    /// unlikely to repeat across restarts, e.g. the boot clock's
    /// microseconds.
    pub initial_seq: u32,
    /// Verbose per-query logging.
    pub debug: bool,
}

impl Default for FloodConfig {
    fn default() -> Self {
        Self {
            max_seen: 100,
            jitter_min_ms: 1,
            jitter_max_ms: 1750,
            initial_seq: 0,
            debug: false,
        }
    }
}

#[derive(Debug)]
struct Seen {
    src: NodeAddr,
    dst: NodeAddr,
    seq: u32,
    count: u32,
    first_seen_at: Instant,
    to_send_at: Option<Instant>,
    forwarded: bool,
    pending: Option<Bytes>,
}

/// The flood engine of one node.
#[derive(Debug)]
pub struct Flood {
    ip: NodeAddr,
    eth: LinkAddr,
    ether_type: u16,
    seq: u32,
    seen: AHashMap<(NodeAddr, u32), Seen>,
    order: VecDeque<(NodeAddr, u32)>,
    neighbors: AHashSet<NodeAddr>,
    neighbors_v: Vec<NodeAddr>,
    config: FloodConfig,
}

impl Flood {
    /// Flood engine for the node at `ip`/`eth`.
    #[must_use]
    pub fn new(ip: NodeAddr, eth: LinkAddr, ether_type: u16, config: FloodConfig) -> Self {
        Self {
            ip,
            eth,
            ether_type,
            seq: config.initial_seq,
            seen: AHashMap::new(),
            order: VecDeque::new(),
            neighbors: AHashSet::new(),
            neighbors_v: Vec::new(),
            config,
        }
    }

    /// Originates a discovery flood for `qdst`, carrying `payload`.
    ///
    /// Returns the broadcast frame to emit on the wire. The query starts
    /// with a zero-hop route holding only this node.
    ///
    /// # Panics
    ///
    /// Panics if `payload` does not fit the header's 16-bit length field;
    /// discovery probes are small by construction.
    #[must_use]
    pub fn start_flood(&mut self, payload: &[u8], qdst: NodeAddr) -> Bytes {
        let data_len = u16::try_from(payload.len()).expect("discovery payload fits u16");
        self.seq = self.seq.wrapping_add(1);
        let mut header = SrHeader::new_data(&[self.ip], 0, 0, data_len);
        header.qdst = qdst;
        header.seq = self.seq;
        if self.config.debug {
            debug!("start_query {qdst} {}", self.seq);
        }
        let ether = EtherHeader {
            dst: LinkAddr::BROADCAST,
            src: self.eth,
            ether_type: self.ether_type,
        };
        encode_frame(&ether, &header, payload)
    }

    /// Ingests a discovery frame heard on the wire.
    ///
    /// Returns the frame to deliver upward to the local route resolver:
    /// every first copy of a query is delivered, whether or not this node is
    /// its target. Duplicates only bump the record's count. After calling
    /// this, re-arm the embedder's timer from [`Flood::next_wakeup`].
    pub fn process_flood(
        &mut self,
        frame: &Bytes,
        links: &mut impl LinkTable,
        arp: &mut impl ArpTable,
        rng: &mut impl Rng,
        now: Instant,
    ) -> Option<Bytes> {
        let decoded = match decode_frame(frame) {
            Ok(f) => f,
            Err(err) => {
                warn!("dropping undecodable flood frame: {err}");
                return None;
            }
        };
        if decoded.ether.ether_type != self.ether_type {
            warn!("bad ether_type {:#06x}", decoded.ether.ether_type);
            return None;
        }
        if decoded.ether.src == self.eth {
            // our own broadcast reflected back
            return None;
        }
        let header = decoded.header;
        harvest_samples(&header, links);

        // the last node slot is the immediate previous hop
        let neighbor = header.link_node(header.num_links());
        if self.neighbors.insert(neighbor) {
            self.neighbors_v.push(neighbor);
        }
        arp.insert(neighbor, decoded.ether.src);

        let key = (header.link_node(0), header.seq);
        if let Some(record) = self.seen.get_mut(&key) {
            record.count += 1;
            return None;
        }

        while self.order.len() >= self.config.max_seen {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }

        let mut record = Seen {
            src: key.0,
            dst: header.qdst,
            seq: header.seq,
            count: 1,
            first_seen_at: now,
            to_send_at: None,
            forwarded: true,
            pending: None,
        };
        if header.qdst != self.ip {
            // not for us: keep a copy, rebroadcast after the jitter
            let delay = rng.uniform(self.config.jitter_min_ms, self.config.jitter_max_ms);
            record.to_send_at = Some(now + Duration::from_millis(u64::from(delay)));
            record.forwarded = false;
            record.pending = Some(frame.clone());
        }
        self.order.push_back(key);
        self.seen.insert(key, record);
        Some(frame.clone())
    }

    /// Earliest pending rebroadcast deadline.
    #[must_use]
    pub fn next_wakeup(&self) -> Option<Instant> {
        self.seen
            .values()
            .filter(|s| !s.forwarded)
            .filter_map(|s| s.to_send_at)
            .min()
    }

    /// Rebroadcasts every record whose jitter has expired.
    ///
    /// Each query goes back out along the best route currently known from
    /// its origin, with fresh per-hop metrics, to the broadcast address.
    /// A record whose origin has no valid route just drops its pending
    /// frame.
    pub fn poll_rebroadcast(&mut self, links: &mut impl LinkTable, now: Instant) -> Vec<Bytes> {
        let due: Vec<(NodeAddr, u32)> = self
            .seen
            .iter()
            .filter(|(_, s)| !s.forwarded && s.to_send_at.is_some_and(|t| t <= now))
            .map(|(key, _)| *key)
            .collect();

        let mut out = Vec::new();
        for key in due {
            let Some(record) = self.seen.get_mut(&key) else {
                continue;
            };
            record.forwarded = true;
            let Some(pending) = record.pending.take() else {
                continue;
            };

            links.dijkstra(false);
            let best = links.best_route(record.src, false);
            if best.len() < 2 || !links.valid_route(&best) {
                if self.config.debug {
                    debug!("invalid route from src {}", record.src);
                }
                continue;
            }

            let Ok(old) = decode_frame(&pending) else {
                continue;
            };
            let mut header = SrHeader::new_data(&best, 0, 0, old.header.data_len);
            header.qdst = record.dst;
            header.seq = record.seq;
            for i in 0..best.len() - 1 {
                header.set_link(
                    i,
                    best[i],
                    best[i + 1],
                    links.get_link_metric(best[i], best[i + 1]),
                    links.get_link_metric(best[i + 1], best[i]),
                    links.get_link_seq(best[i], best[i + 1]),
                    links.get_link_age(best[i], best[i + 1]),
                );
            }
            if self.config.debug {
                debug!(
                    "forward_query {} -> {} {}",
                    record.src, record.dst, record.seq
                );
            }
            let ether = EtherHeader {
                dst: LinkAddr::BROADCAST,
                src: self.eth,
                ether_type: self.ether_type,
            };
            out.push(encode_frame(&ether, &header, &old.payload));
        }
        out
    }

    /// A uniformly chosen known neighbor, if any.
    pub fn random_neighbor(&self, rng: &mut impl Rng) -> Option<NodeAddr> {
        if self.neighbors_v.is_empty() {
            return None;
        }
        let max = u32::try_from(self.neighbors_v.len() - 1).unwrap_or(u32::MAX);
        self.neighbors_v
            .get(rng.uniform(0, max) as usize)
            .copied()
    }

    /// One line per seen record, oldest first.
    #[must_use]
    pub fn floods(&self, now: Instant) -> String {
        let mut out = String::new();
        for key in &self.order {
            let Some(s) = self.seen.get(key) else {
                continue;
            };
            let age = now.saturating_duration_since(s.first_seen_at);
            let to_send = s
                .to_send_at
                .map_or_else(String::new, |t| {
                    format!(" to_send_in {:?}", t.saturating_duration_since(now))
                });
            let _ = writeln!(
                out,
                "src {} dst {} seq {} count {} forwarded {} age {age:?}{to_send}",
                s.src, s.dst, s.seq, s.count, s.forwarded,
            );
        }
        out
    }

    /// Forgets every seen record and pending rebroadcast.
    pub fn clear(&mut self) {
        self.seen.clear();
        self.order.clear();
    }

    /// The origin sequence counter's current value.
    #[must_use]
    pub const fn seq(&self) -> u32 {
        self.seq
    }

    /// Toggles verbose per-query logging.
    pub fn set_debug(&mut self, debug: bool) {
        self.config.debug = debug;
    }
}
