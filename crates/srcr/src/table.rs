//! Interfaces to the collaborators the data plane is wired to.
//!
//! The link-state table, the IP-to-MAC table, and the jitter source are
//! owned by the embedder; the state machines in this crate borrow them per
//! call. Wiring happens at construction of the embedding graph, so a missing
//! collaborator is a compile error rather than a startup crash.

use crate::addr::{LinkAddr, NodeAddr, Path};
use crate::metric::Metric;

/// Link-state database with a shortest-path solver.
///
/// Implementations typically run Dijkstra over the known links and age
/// entries out; none of that lives in this crate.
pub trait LinkTable {
    /// Records an observation of the directed link `from -> to`.
    ///
    /// `metric` is never [`Metric::UNKNOWN`]; callers filter those out.
    /// Returns `false` if the table rejected the observation (stale sequence,
    /// unknown node, ...). Rejections are logged and ignored upstream.
    fn update_link(
        &mut self,
        from: NodeAddr,
        to: NodeAddr,
        seq: u32,
        age: u32,
        metric: Metric,
    ) -> bool;

    /// Best known path involving `dst`, per the most recent
    /// [`LinkTable::dijkstra`] run.
    ///
    /// With `from_me` the path runs from this node to `dst`; without it, from
    /// `dst` to this node. May return a path that fails
    /// [`LinkTable::valid_route`] when nothing usable is known.
    fn best_route(&self, dst: NodeAddr, from_me: bool) -> Path;

    /// Whether every adjacent pair in `route` is a usable link.
    fn valid_route(&self, route: &[NodeAddr]) -> bool;

    /// Current metric of the directed link `from -> to`, or
    /// [`Metric::UNKNOWN`].
    fn get_link_metric(&self, from: NodeAddr, to: NodeAddr) -> Metric;

    /// Sequence counter of the newest observation of `from -> to`.
    fn get_link_seq(&self, from: NodeAddr, to: NodeAddr) -> u32;

    /// Age in seconds of the newest observation of `from -> to`.
    fn get_link_age(&self, from: NodeAddr, to: NodeAddr) -> u32;

    /// Recomputes shortest paths; `from_me` selects the direction rooted at
    /// this node.
    fn dijkstra(&mut self, from_me: bool);

    /// Total metric of `route`, or [`Metric::UNKNOWN`] if any hop is unknown.
    fn get_route_metric(&self, route: &[NodeAddr]) -> Metric;
}

/// IP-to-hardware address mapping.
pub trait ArpTable {
    /// Records that `ip` was last seen at `mac`.
    fn insert(&mut self, ip: NodeAddr, mac: LinkAddr);

    /// Hardware address of `ip`, or [`LinkAddr::BROADCAST`] on a miss.
    ///
    /// A miss is not fatal: emitting to the broadcast sentinel lets the
    /// driver flood the frame while the mapping resolves.
    fn lookup(&self, ip: NodeAddr) -> LinkAddr;
}

/// Source of rebroadcast jitter.
pub trait Rng {
    /// Uniform value in `[lo, hi]`, both ends inclusive.
    fn uniform(&mut self, lo: u32, hi: u32) -> u32;
}

/// [`Rng`] adapter over any [`rand`] generator.
#[derive(Debug, Clone)]
pub struct RandRng<R>(pub R);

impl<R: rand::Rng> Rng for RandRng<R> {
    fn uniform(&mut self, lo: u32, hi: u32) -> u32 {
        self.0.gen_range(lo..=hi)
    }
}
