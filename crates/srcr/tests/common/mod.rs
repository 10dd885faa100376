#![allow(dead_code)]

use std::collections::HashMap;

use srcr::addr::{LinkAddr, NodeAddr, Path};
use srcr::metric::Metric;
use srcr::table::{ArpTable, LinkTable, Rng};

pub const ET: u16 = 0x0644;

pub const A: NodeAddr = NodeAddr(0x0a00_0001);
pub const B: NodeAddr = NodeAddr(0x0a00_0002);
pub const C: NodeAddr = NodeAddr(0x0a00_0003);
pub const D: NodeAddr = NodeAddr(0x0a00_0004);

#[must_use]
pub const fn mac(last: u8) -> LinkAddr {
    LinkAddr([2, 0, 0, 0, 0, last])
}

/// In-memory link-state table. Routes are set explicitly; a route is valid
/// when every adjacent pair of its nodes is a known link.
#[derive(Debug, Default)]
pub struct FakeLinks {
    links: HashMap<(NodeAddr, NodeAddr), (Metric, u32, u32)>,
    routes: HashMap<(NodeAddr, bool), Path>,
    /// Every `update_link` call, in order.
    pub updates: Vec<(NodeAddr, NodeAddr, u32, u32, Metric)>,
    /// How often the solver was asked to rerun.
    pub dijkstra_runs: u32,
}

impl FakeLinks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the directed link `from -> to`.
    pub fn set_link(&mut self, from: NodeAddr, to: NodeAddr, metric: Metric, seq: u32, age: u32) {
        self.links.insert((from, to), (metric, seq, age));
    }

    /// Sets both directions of `a <-> b` to the same metric.
    pub fn set_link_pair(&mut self, a: NodeAddr, b: NodeAddr, metric: Metric) {
        self.set_link(a, b, metric, 1, 0);
        self.set_link(b, a, metric, 1, 0);
    }

    /// Declares the solver's answer for `best_route(dst, from_me)`.
    pub fn set_route(&mut self, dst: NodeAddr, from_me: bool, path: Path) {
        self.routes.insert((dst, from_me), path);
    }
}

impl LinkTable for FakeLinks {
    fn update_link(
        &mut self,
        from: NodeAddr,
        to: NodeAddr,
        seq: u32,
        age: u32,
        metric: Metric,
    ) -> bool {
        self.updates.push((from, to, seq, age, metric));
        self.links.insert((from, to), (metric, seq, age));
        true
    }

    fn best_route(&self, dst: NodeAddr, from_me: bool) -> Path {
        self.routes.get(&(dst, from_me)).cloned().unwrap_or_default()
    }

    fn valid_route(&self, route: &[NodeAddr]) -> bool {
        route.len() >= 2
            && route
                .windows(2)
                .all(|w| self.links.contains_key(&(w[0], w[1])))
    }

    fn get_link_metric(&self, from: NodeAddr, to: NodeAddr) -> Metric {
        self.links
            .get(&(from, to))
            .map_or(Metric::UNKNOWN, |(m, _, _)| *m)
    }

    fn get_link_seq(&self, from: NodeAddr, to: NodeAddr) -> u32 {
        self.links.get(&(from, to)).map_or(0, |(_, seq, _)| *seq)
    }

    fn get_link_age(&self, from: NodeAddr, to: NodeAddr) -> u32 {
        self.links.get(&(from, to)).map_or(0, |(_, _, age)| *age)
    }

    fn dijkstra(&mut self, _from_me: bool) {
        self.dijkstra_runs += 1;
    }

    fn get_route_metric(&self, route: &[NodeAddr]) -> Metric {
        if route.len() < 2 {
            return Metric::UNKNOWN;
        }
        let mut total = 0u32;
        for w in route.windows(2) {
            let m = self.get_link_metric(w[0], w[1]);
            if !m.is_known() {
                return Metric::UNKNOWN;
            }
            total += m.0;
        }
        Metric(total)
    }
}

/// In-memory ARP table.
#[derive(Debug, Default)]
pub struct FakeArp {
    entries: HashMap<NodeAddr, LinkAddr>,
}

impl FakeArp {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(entries: &[(NodeAddr, LinkAddr)]) -> Self {
        let mut arp = Self::default();
        for (ip, mac) in entries {
            arp.insert(*ip, *mac);
        }
        arp
    }
}

impl ArpTable for FakeArp {
    fn insert(&mut self, ip: NodeAddr, mac: LinkAddr) {
        self.entries.insert(ip, mac);
    }

    fn lookup(&self, ip: NodeAddr) -> LinkAddr {
        self.entries.get(&ip).copied().unwrap_or(LinkAddr::BROADCAST)
    }
}

/// Rng pinned to a fixed value, clamped into the requested range.
#[derive(Debug)]
pub struct FixedRng(pub u32);

impl Rng for FixedRng {
    fn uniform(&mut self, lo: u32, hi: u32) -> u32 {
        self.0.clamp(lo, hi)
    }
}
