//! Harvesting of link observations out of packet headers.

use tracing::warn;

use crate::addr::NodeAddr;
use crate::metric::Metric;
use crate::table::LinkTable;
use crate::wire::SrHeader;

/// Feeds every usable link observation in `header` to the link table:
/// the randomized liveness sample, then each per-hop record, each in both
/// directions.
///
/// Unknown metrics are skipped so the table never sees a zero. A rejected
/// update is logged and ignored; the packet still makes progress.
pub(crate) fn harvest_samples(header: &SrHeader, links: &mut impl LinkTable) {
    let r = header.random;
    if r.from.is_valid() && r.to.is_valid() {
        update(links, r.from, r.to, r.seq, r.age, r.fwd);
        update(links, r.to, r.from, r.seq, r.age, r.rev);
    }

    for i in 0..header.num_links() {
        let a = header.link_node(i);
        let b = header.link_node(i + 1);
        let entry = *header.link(i);
        update(links, a, b, entry.seq, entry.age, entry.fwd);
        update(links, b, a, entry.seq, entry.age, entry.rev);
    }
}

fn update(
    links: &mut impl LinkTable,
    from: NodeAddr,
    to: NodeAddr,
    seq: u32,
    age: u32,
    metric: Metric,
) {
    if !metric.is_known() {
        return;
    }
    if !links.update_link(from, to, seq, age, metric) {
        warn!("couldn't update link {from} > {metric} > {to}");
    }
}
