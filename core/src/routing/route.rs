// Route records and lookup constraints.

use super::algorithms::Algorithm;
use crate::node::NodeId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// One candidate path towards a destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub destination: NodeId,
    pub next_hop: NodeId,
    /// Links between source and destination.
    pub hop_count: u32,
    /// Lower is better.
    pub metric: f64,
    /// 0–100
    pub reliability: f64,
    pub bandwidth: f64,
    pub is_active: bool,
    pub emergency_priority: bool,
    pub last_updated: u64,
    /// Full path, source first. Only source routes carry one.
    pub path: Option<Vec<NodeId>>,
    pub algorithm: Algorithm,
}

impl Route {
    pub fn age(&self, now: u64) -> u64 {
        now.saturating_sub(self.last_updated)
    }

    /// Selection order: metric, then hop count, then next hop id.
    pub fn preference(&self, other: &Route) -> Ordering {
        self.metric
            .partial_cmp(&other.metric)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.hop_count.cmp(&other.hop_count))
            .then_with(|| self.next_hop.cmp(&other.next_hop))
    }

    pub fn passes_through(&self, node: &str) -> bool {
        self.next_hop == node
            || self
                .path
                .as_ref()
                .is_some_and(|p| p.iter().skip(1).any(|n| n == node))
    }
}

/// Caller requirements for a lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteConstraints {
    /// Only emergency-priority routes qualify.
    pub emergency: bool,
    pub max_hops: Option<u32>,
    pub min_reliability: Option<f64>,
    /// Nodes the route must not go through (the message's route so far).
    pub avoid: BTreeSet<NodeId>,
}

impl RouteConstraints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emergency() -> Self {
        Self {
            emergency: true,
            ..Self::default()
        }
    }

    pub fn with_max_hops(mut self, max_hops: u32) -> Self {
        self.max_hops = Some(max_hops);
        self
    }

    pub fn with_min_reliability(mut self, reliability: f64) -> Self {
        self.min_reliability = Some(reliability);
        self
    }

    pub fn avoiding<I, S>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        self.avoid.extend(nodes.into_iter().map(Into::into));
        self
    }

    /// Active and within every bound; `hop_limit` is the table's own ceiling.
    pub fn admits(&self, route: &Route, hop_limit: u32) -> bool {
        if !route.is_active {
            return false;
        }
        if self.emergency && !route.emergency_priority {
            return false;
        }
        let limit = self.max_hops.map_or(hop_limit, |m| m.min(hop_limit));
        if route.hop_count > limit {
            return false;
        }
        if self
            .min_reliability
            .is_some_and(|min| route.reliability < min)
        {
            return false;
        }
        !self.avoid.iter().any(|n| route.passes_through(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(dest: &str, next: &str, hops: u32, metric: f64) -> Route {
        Route {
            destination: dest.into(),
            next_hop: next.into(),
            hop_count: hops,
            metric,
            reliability: 80.0,
            bandwidth: 500.0,
            is_active: true,
            emergency_priority: false,
            last_updated: 0,
            path: None,
            algorithm: Algorithm::Reactive,
        }
    }

    #[test]
    fn test_preference_orders_by_metric_then_hops() {
        let a = route("d", "x", 3, 10.0);
        let b = route("d", "y", 2, 10.0);
        let c = route("d", "z", 1, 20.0);
        assert_eq!(a.preference(&b), Ordering::Greater);
        assert_eq!(b.preference(&c), Ordering::Less);
    }

    #[test]
    fn test_constraints_filter() {
        let mut r = route("d", "x", 4, 10.0);
        assert!(RouteConstraints::new().admits(&r, 10));
        assert!(!RouteConstraints::new().with_max_hops(3).admits(&r, 10));
        assert!(!RouteConstraints::new().admits(&r, 3));
        assert!(!RouteConstraints::new().with_min_reliability(90.0).admits(&r, 10));
        assert!(!RouteConstraints::emergency().admits(&r, 10));
        assert!(!RouteConstraints::new().avoiding(["x"]).admits(&r, 10));
        r.is_active = false;
        assert!(!RouteConstraints::new().admits(&r, 10));
    }

    #[test]
    fn test_source_route_path_is_checked_against_avoid() {
        let mut r = route("d", "x", 2, 10.0);
        r.path = Some(vec!["s".into(), "x".into(), "d".into()]);
        assert!(RouteConstraints::new().avoiding(["s"]).admits(&r, 10));
        r.path = Some(vec!["s".into(), "x".into(), "y".into(), "d".into()]);
        assert!(!RouteConstraints::new().avoiding(["y"]).admits(&r, 10));
    }
}
