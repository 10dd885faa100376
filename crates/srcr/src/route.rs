//! Operator-installed static source routes.
//!
//! A thin steering layer in front of the forwarder: if a destination has an
//! explicit route configured, user payloads go straight out along it and the
//! querier never gets involved.

use std::fmt::Write as _;

use ahash::AHashMap;
use octs::Bytes;

use crate::addr::{DisplayPath, NodeAddr, Path};
use crate::forward::{EncapError, Forwarder};
use crate::table::ArpTable;

/// Rejection of a static route.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    /// A route names at least its first hop.
    #[error("a route names at least one hop")]
    Empty,
    /// Static routes must start at this node.
    #[error("first hop {first} is not this node {me}")]
    FirstHopNotSelf {
        /// The route's first hop.
        first: NodeAddr,
        /// This node.
        me: NodeAddr,
    },
}

/// Fixed source routes keyed by final destination.
#[derive(Debug)]
pub struct StaticRoutes {
    ip: NodeAddr,
    routes: AHashMap<NodeAddr, Path>,
}

impl StaticRoutes {
    /// Empty table for the node at `ip`.
    #[must_use]
    pub fn new(ip: NodeAddr) -> Self {
        Self {
            ip,
            routes: AHashMap::new(),
        }
    }

    /// Installs `path` as the route to its final hop, replacing any previous
    /// route there.
    ///
    /// # Errors
    ///
    /// Errors if `path` is empty or does not start at this node.
    pub fn set_route(&mut self, path: Path) -> Result<(), RouteError> {
        let Some(&first) = path.first() else {
            return Err(RouteError::Empty);
        };
        if first != self.ip {
            return Err(RouteError::FirstHopNotSelf {
                first,
                me: self.ip,
            });
        }
        let dst = path[path.len() - 1];
        self.routes.insert(dst, path);
        Ok(())
    }

    /// The installed route to `dst`, if any.
    #[must_use]
    pub fn route_to(&self, dst: NodeAddr) -> Option<&Path> {
        self.routes.get(&dst)
    }

    /// Encapsulates `payload` along the static route to `dst`.
    ///
    /// `None` means no route is installed; the caller falls through to the
    /// querier.
    pub fn steer(
        &self,
        payload: &[u8],
        dst: NodeAddr,
        forwarder: &mut Forwarder,
        arp: &impl ArpTable,
    ) -> Option<Result<Bytes, EncapError>> {
        self.routes
            .get(&dst)
            .map(|path| forwarder.encap(payload, path, 0, arp))
    }

    /// One `dst : path` line per installed route.
    #[must_use]
    pub fn routes(&self) -> String {
        let mut out = String::new();
        for (dst, path) in &self.routes {
            let _ = writeln!(out, "{dst} : {}", DisplayPath(path));
        }
        out
    }

    /// Drops every installed route.
    pub fn clear(&mut self) {
        self.routes.clear();
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const A: NodeAddr = NodeAddr(0x0a00_0001);
    const B: NodeAddr = NodeAddr(0x0a00_0002);
    const C: NodeAddr = NodeAddr(0x0a00_0003);

    #[test]
    fn installs_and_lists_routes() {
        let mut routes = StaticRoutes::new(A);
        routes.set_route(vec![A, B, C]).unwrap();
        assert_eq!(Some(&vec![A, B, C]), routes.route_to(C));
        assert!(routes.routes().contains("10.0.0.3 : 10.0.0.1 10.0.0.2 10.0.0.3"));
    }

    #[test]
    fn rejects_foreign_first_hop() {
        let mut routes = StaticRoutes::new(A);
        assert_matches!(
            routes.set_route(vec![B, C]),
            Err(RouteError::FirstHopNotSelf { first, me }) if first == B && me == A
        );
        assert_eq!(Err(RouteError::Empty), routes.set_route(vec![]));
    }

    #[test]
    fn clear_removes_everything() {
        let mut routes = StaticRoutes::new(A);
        routes.set_route(vec![A, B]).unwrap();
        routes.clear();
        assert_eq!(None, routes.route_to(B));
        assert_eq!("", routes.routes());
    }
}
