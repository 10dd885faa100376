//! Route selection and discovery triggering.
//!
//! The querier fronts the forwarder for locally originated traffic. It keeps
//! one cache entry per destination, re-evaluates the chosen path only when
//! the dampening window has expired, and rate-limits how often a cache miss
//! may kick off a discovery flood.

use std::fmt::Write as _;

use ahash::AHashMap;
use octs::Bytes;
use tracing::{debug, warn};
use web_time::{Duration, Instant};

use crate::addr::{DisplayPath, NodeAddr, Path};
use crate::forward::Forwarder;
use crate::metric::Metric;
use crate::table::{ArpTable, LinkTable};

/// Tunables of the querier.
#[derive(Debug, Clone)]
pub struct QuerierConfig {
    /// Minimum spacing between discovery floods for one destination.
    pub query_wait: Duration,
    /// How long a chosen path is kept before re-evaluation.
    pub time_before_switch: Duration,
    /// Whether to dampen at all. With this off, every send re-evaluates,
    /// and near-equal paths can flap per packet under metric noise.
    pub route_dampening: bool,
    /// Verbose per-send logging.
    pub debug: bool,
}

impl Default for QuerierConfig {
    fn default() -> Self {
        Self {
            query_wait: Duration::from_secs(5),
            time_before_switch: Duration::from_secs(10),
            route_dampening: true,
            debug: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct DstInfo {
    path: Path,
    best_metric: Metric,
    last_query_at: Option<Instant>,
    first_selected_at: Option<Instant>,
    last_switch_at: Option<Instant>,
    query_count: u32,
}

/// What one [`Querier::send`] wants the embedder to do.
///
/// Both fields can be set at once: the first send to a fresh destination may
/// find a usable route *and* still probe for a better one.
#[derive(Debug, Default)]
pub struct SendOutcome {
    /// Encapsulated frame for the wire, when a usable route exists. The
    /// user payload is dropped otherwise.
    pub frame: Option<Bytes>,
    /// Destination to start a discovery flood for, rate-limited by
    /// [`QuerierConfig::query_wait`].
    pub query: Option<NodeAddr>,
}

/// The per-node route cache and discovery trigger.
#[derive(Debug)]
pub struct Querier {
    cache: AHashMap<NodeAddr, DstInfo>,
    config: QuerierConfig,
}

impl Querier {
    /// Querier with the given tunables.
    #[must_use]
    pub fn new(config: QuerierConfig) -> Self {
        Self {
            cache: AHashMap::new(),
            config,
        }
    }

    /// Sends a locally originated `payload` toward `dst`.
    ///
    /// Consults the cache, re-evaluating the chosen path on a miss, on an
    /// unusable entry, or once the dampening window has passed. With a
    /// usable route the payload is encapsulated via `forwarder`; without
    /// one it is dropped and a discovery flood is requested, at most once
    /// per [`QuerierConfig::query_wait`] per destination.
    pub fn send(
        &mut self,
        payload: &[u8],
        dst: NodeAddr,
        forwarder: &mut Forwarder,
        links: &mut impl LinkTable,
        arp: &impl ArpTable,
        now: Instant,
    ) -> SendOutcome {
        let mut outcome = SendOutcome::default();
        if !dst.is_valid() {
            warn!("got invalid dst {dst}");
            return outcome;
        }

        let mut do_query = false;
        let info = self.cache.entry(dst).or_insert_with(|| {
            do_query = true;
            DstInfo::default()
        });

        let window_expired = info
            .last_switch_at
            .is_none_or(|at| at + self.config.time_before_switch < now);
        if !info.best_metric.is_known()
            || info.path.is_empty()
            || !self.config.route_dampening
            || window_expired
        {
            let best = links.best_route(dst, true);
            info.last_switch_at = Some(now);
            if links.valid_route(&best) {
                if best != info.path {
                    info.first_selected_at = Some(now);
                }
                info.best_metric = links.get_route_metric(&best);
                info.path = best;
            } else {
                do_query = true;
                info.path = Path::new();
                info.best_metric = Metric::UNKNOWN;
            }
        }

        if info.best_metric.is_known() {
            match forwarder.encap(payload, &info.path, 0, arp) {
                Ok(frame) => outcome.frame = Some(frame),
                Err(err) => warn!("encap to {dst} failed: {err}"),
            }
        } else if self.config.debug {
            debug!("no valid route to {dst}");
        }

        if do_query {
            let waited = info
                .last_query_at
                .is_none_or(|at| at + self.config.query_wait <= now);
            if waited {
                info.last_query_at = Some(now);
                info.query_count += 1;
                outcome.query = Some(dst);
            }
        }
        outcome
    }

    /// Records a forced probe for `dst`, bypassing the rate limit.
    ///
    /// Backs the `query <ip>` control handler; the embedder starts the flood
    /// itself.
    pub fn send_query(&mut self, dst: NodeAddr, now: Instant) {
        let info = self.cache.entry(dst).or_default();
        info.last_query_at = Some(now);
        info.query_count += 1;
    }

    /// One line per cached destination, with the chosen path, its metric as
    /// the table sees it now, and the table's current best alternative.
    #[must_use]
    pub fn queries(&self, links: &impl LinkTable, now: Instant) -> String {
        fn ago(at: Option<Instant>, now: Instant) -> String {
            at.map_or_else(
                || "never".to_owned(),
                |at| format!("{:?}", now.saturating_duration_since(at)),
            )
        }

        let mut out = String::new();
        for (dst, info) in &self.cache {
            let current = links.get_route_metric(&info.path);
            let best = links.best_route(*dst, true);
            let best_metric = links.get_route_metric(&best);
            let _ = writeln!(
                out,
                "{dst} query_count {} best_metric {} last_query_ago {} \
                 first_selected_ago {} last_switch_ago {} \
                 current_path_metric {current} [ {} ] \
                 table_best_metric {best_metric} table_best_route [ {} ]",
                info.query_count,
                info.best_metric,
                ago(info.last_query_at, now),
                ago(info.first_selected_at, now),
                ago(info.last_switch_at, now),
                DisplayPath(&info.path),
                DisplayPath(&best),
            );
        }
        out
    }

    /// Forgets every cached destination.
    pub fn reset(&mut self) {
        self.cache.clear();
    }

    /// Toggles verbose per-send logging.
    pub fn set_debug(&mut self, debug: bool) {
        self.config.debug = debug;
    }
}
