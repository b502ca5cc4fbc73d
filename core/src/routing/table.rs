// Route table: per-destination candidate routes.
//
// The table is the only owner of route mutation. Updates replace the whole
// map (copy-on-write) so concurrent readers always see a consistent version.
// Routes are deactivated rather than deleted; deactivated routes only become
// active again when a fresh discovery overwrites the same (destination,
// next hop) key.

use super::route::{Route, RouteConstraints};
use crate::config::RoutingConfig;
use crate::events::{EventBus, MeshEvent};
use crate::node::NodeId;
use crate::{MeshError, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// All known routes towards one destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteTableEntry {
    pub destination: NodeId,
    pub routes: Vec<Route>,
}

impl RouteTableEntry {
    fn newest_update(&self) -> u64 {
        self.routes.iter().map(|r| r.last_updated).max().unwrap_or(0)
    }
}

/// What the table calls when no stored route qualifies.
#[cfg_attr(test, mockall::automock)]
pub trait RouteDiscovery {
    fn discover(&self, destination: &NodeId, constraints: &RouteConstraints) -> Option<Route>;

    /// Whether a stored route can still be used (e.g. its next hop is still a
    /// live neighbour). Unusable routes are invalidated on lookup.
    fn is_usable(&self, route: &Route) -> bool;
}

/// Result of one maintenance pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteMaintenance {
    pub expired: usize,
    pub pruned: usize,
    pub destinations_dropped: usize,
}

/// Aggregate figures over the table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutingMetrics {
    pub destinations: usize,
    pub total_routes: usize,
    pub active_routes: usize,
    pub emergency_routes: usize,
    pub average_hop_count: f64,
    pub max_hop_count: u32,
}

#[derive(Debug, Clone, Copy)]
struct Limits {
    max_hops: u32,
    route_timeout_ms: u64,
}

pub struct RouteTable {
    entries: RwLock<Arc<HashMap<NodeId, RouteTableEntry>>>,
    limits: RwLock<Limits>,
    config: RoutingConfig,
    emergency_mode: AtomicBool,
    events: EventBus,
}

impl RouteTable {
    pub fn new(config: RoutingConfig, events: EventBus) -> Self {
        let limits = Limits {
            max_hops: config.max_hops,
            route_timeout_ms: config.route_timeout_ms,
        };
        Self {
            entries: RwLock::new(Arc::new(HashMap::new())),
            limits: RwLock::new(limits),
            config,
            emergency_mode: AtomicBool::new(false),
            events,
        }
    }

    pub fn snapshot(&self) -> Arc<HashMap<NodeId, RouteTableEntry>> {
        self.entries.read().clone()
    }

    pub fn entry(&self, destination: &str) -> Result<RouteTableEntry> {
        self.entries
            .read()
            .get(destination)
            .cloned()
            .ok_or_else(|| MeshError::NotFound(format!("routes to {}", destination)))
    }

    /// Entries ordered by destination, for persistence.
    pub fn entries(&self) -> Vec<RouteTableEntry> {
        let mut entries: Vec<RouteTableEntry> = self.snapshot().values().cloned().collect();
        entries.sort_by(|a, b| a.destination.cmp(&b.destination));
        entries
    }

    pub fn destination_count(&self) -> usize {
        self.entries.read().len()
    }

    pub fn max_hops(&self) -> u32 {
        self.limits.read().max_hops
    }

    pub fn route_timeout_ms(&self) -> u64 {
        self.limits.read().route_timeout_ms
    }

    pub fn is_emergency_mode(&self) -> bool {
        self.emergency_mode.load(Ordering::SeqCst)
    }

    // ========================================================================
    // LOOKUP
    // ========================================================================

    /// Best stored route meeting `constraints`, without side effects.
    pub fn lookup(&self, destination: &str, constraints: &RouteConstraints) -> Option<Route> {
        self.candidates(destination, constraints).into_iter().next()
    }

    fn candidates(&self, destination: &str, constraints: &RouteConstraints) -> Vec<Route> {
        let hop_limit = self.max_hops();
        let snapshot = self.snapshot();
        let mut routes: Vec<Route> = snapshot
            .get(destination)
            .map(|e| {
                e.routes
                    .iter()
                    .filter(|r| constraints.admits(r, hop_limit))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        routes.sort_by(|a, b| a.preference(b));
        routes
    }

    /// Best usable route; stale candidates are invalidated on the way, and if
    /// nothing qualifies `discovery` is consulted and its result merged.
    pub fn find_route(
        &self,
        destination: &NodeId,
        constraints: &RouteConstraints,
        discovery: &dyn RouteDiscovery,
    ) -> Result<Route> {
        for route in self.candidates(destination, constraints) {
            if discovery.is_usable(&route) {
                return Ok(route);
            }
            self.invalidate(destination, &route.next_hop);
        }

        let Some(mut route) = discovery.discover(destination, constraints) else {
            tracing::debug!("No route to {}", destination);
            return Err(MeshError::NotFound(format!("route to {}", destination)));
        };
        let hop_limit = constraints
            .max_hops
            .map_or(self.max_hops(), |m| m.min(self.max_hops()));
        if route.hop_count > hop_limit {
            return Err(MeshError::Exhausted(format!(
                "route to {} needs {} hops, limit {}",
                destination, route.hop_count, hop_limit
            )));
        }
        if constraints.emergency {
            route.emergency_priority = true;
        }
        if !constraints.admits(&route, hop_limit) {
            return Err(MeshError::NotFound(format!(
                "no route to {} satisfies constraints",
                destination
            )));
        }
        self.upsert(route.clone());
        Ok(route)
    }

    // ========================================================================
    // MUTATION
    // ========================================================================

    /// Merge a discovered route; an existing (destination, next hop) record is
    /// overwritten in place. Returns true if the key was new.
    pub fn upsert(&self, route: Route) -> bool {
        let emergency = route.emergency_priority;
        let published = route.clone();
        let capacity = self.config.route_cache_size.max(1);
        let inserted = self.mutate(|entries| {
            if !entries.contains_key(&route.destination) && entries.len() >= capacity {
                let oldest = entries
                    .values()
                    .min_by(|a, b| {
                        a.newest_update()
                            .cmp(&b.newest_update())
                            .then_with(|| a.destination.cmp(&b.destination))
                    })
                    .map(|e| e.destination.clone());
                if let Some(oldest) = oldest {
                    tracing::debug!("Route cache full, evicting {}", oldest);
                    entries.remove(&oldest);
                }
            }
            let entry = entries
                .entry(route.destination.clone())
                .or_insert_with(|| RouteTableEntry {
                    destination: route.destination.clone(),
                    routes: Vec::new(),
                });
            match entry.routes.iter_mut().find(|r| r.next_hop == route.next_hop) {
                Some(existing) => {
                    *existing = route;
                    false
                }
                None => {
                    entry.routes.push(route);
                    true
                }
            }
        });
        tracing::debug!(
            "Route to {} via {} ({} hops, metric {:.1})",
            published.destination,
            published.next_hop,
            published.hop_count,
            published.metric
        );
        if emergency {
            self.events.publish(MeshEvent::EmergencyRouteEstablished {
                route: published.clone(),
            });
        }
        self.events.publish(MeshEvent::RouteDiscovered { route: published });
        inserted
    }

    /// Deactivate routes to `destination` through `next_hop`.
    pub fn invalidate(&self, destination: &str, next_hop: &str) -> usize {
        let flipped = self.mutate(|entries| {
            let mut flipped = 0;
            if let Some(entry) = entries.get_mut(destination) {
                for route in entry.routes.iter_mut() {
                    if route.next_hop == next_hop && route.is_active {
                        route.is_active = false;
                        flipped += 1;
                    }
                }
            }
            flipped
        });
        if flipped > 0 {
            tracing::debug!("Invalidated route to {} via {}", destination, next_hop);
            self.events.publish(MeshEvent::RouteExpired {
                destination: destination.to_string(),
                next_hop: next_hop.to_string(),
            });
        }
        flipped
    }

    /// Deactivate every route whose first hop is `next_hop`.
    pub fn invalidate_next_hop(&self, next_hop: &str) -> usize {
        let flipped = self.mutate(|entries| {
            let mut flipped = Vec::new();
            for entry in entries.values_mut() {
                for route in entry.routes.iter_mut() {
                    if route.next_hop == next_hop && route.is_active {
                        route.is_active = false;
                        flipped.push(route.destination.clone());
                    }
                }
            }
            flipped
        });
        for destination in &flipped {
            self.events.publish(MeshEvent::RouteExpired {
                destination: destination.clone(),
                next_hop: next_hop.to_string(),
            });
        }
        flipped.len()
    }

    /// Drop routes to, via or through `node` (used when a node leaves).
    pub fn remove_routes_via(&self, node: &str) -> usize {
        self.mutate(|entries| {
            let before: usize = entries.values().map(|e| e.routes.len()).sum();
            entries.remove(node);
            for entry in entries.values_mut() {
                entry.routes.retain(|r| !r.passes_through(node));
            }
            entries.retain(|_, e| !e.routes.is_empty());
            let after: usize = entries.values().map(|e| e.routes.len()).sum();
            before - after
        })
    }

    /// Age out routes past the timeout; prune long-inactive ones.
    pub fn maintain(&self, now: u64) -> RouteMaintenance {
        let timeout = self.route_timeout_ms();
        let prune_after = timeout.saturating_mul(2);
        let (report, expired) = self.mutate(|entries| {
            let mut report = RouteMaintenance::default();
            let mut expired = Vec::new();
            for entry in entries.values_mut() {
                for route in entry.routes.iter_mut() {
                    if route.is_active && route.age(now) > timeout {
                        route.is_active = false;
                        report.expired += 1;
                        expired.push((route.destination.clone(), route.next_hop.clone()));
                    }
                }
                let before = entry.routes.len();
                entry
                    .routes
                    .retain(|r| r.is_active || r.age(now) <= prune_after);
                report.pruned += before - entry.routes.len();
            }
            let before = entries.len();
            entries.retain(|_, e| !e.routes.is_empty());
            report.destinations_dropped = before - entries.len();
            (report, expired)
        });
        for (destination, next_hop) in expired {
            self.events.publish(MeshEvent::RouteExpired {
                destination,
                next_hop,
            });
        }
        if report != RouteMaintenance::default() {
            tracing::debug!(
                "Route maintenance: {} expired, {} pruned",
                report.expired,
                report.pruned
            );
        }
        report
    }

    /// Enter or leave emergency routing. Entering widens the timeout and hop
    /// bound and flags routes towards `emergency_nodes`; leaving restores the
    /// normal limits. Activity flags are never touched.
    pub fn set_emergency_mode(&self, active: bool, emergency_nodes: &BTreeSet<NodeId>) {
        let was = self.emergency_mode.swap(active, Ordering::SeqCst);
        *self.limits.write() = if active {
            Limits {
                max_hops: self.config.emergency_max_hops,
                route_timeout_ms: self.config.emergency_route_timeout_ms,
            }
        } else {
            Limits {
                max_hops: self.config.max_hops,
                route_timeout_ms: self.config.route_timeout_ms,
            }
        };
        if active {
            self.mutate(|entries| {
                for node in emergency_nodes {
                    if let Some(entry) = entries.get_mut(node) {
                        for route in entry.routes.iter_mut() {
                            route.emergency_priority = true;
                        }
                    }
                }
            });
        }
        if was != active {
            tracing::info!(
                "Emergency routing {}",
                if active { "enabled" } else { "disabled" }
            );
        }
    }

    pub fn metrics(&self) -> RoutingMetrics {
        let snapshot = self.snapshot();
        let routes: Vec<&Route> = snapshot.values().flat_map(|e| e.routes.iter()).collect();
        let active: Vec<&&Route> = routes.iter().filter(|r| r.is_active).collect();
        let average_hop_count = if active.is_empty() {
            0.0
        } else {
            active.iter().map(|r| r.hop_count as f64).sum::<f64>() / active.len() as f64
        };
        RoutingMetrics {
            destinations: snapshot.len(),
            total_routes: routes.len(),
            active_routes: active.len(),
            emergency_routes: routes.iter().filter(|r| r.emergency_priority).count(),
            average_hop_count,
            max_hop_count: active.iter().map(|r| r.hop_count).max().unwrap_or(0),
        }
    }

    /// Replace the table with persisted entries.
    pub fn restore(&self, entries: Vec<RouteTableEntry>) {
        let map: HashMap<NodeId, RouteTableEntry> = entries
            .into_iter()
            .filter(|e| !e.routes.is_empty())
            .map(|e| (e.destination.clone(), e))
            .collect();
        tracing::info!("Restored routes for {} destinations", map.len());
        *self.entries.write() = Arc::new(map);
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut HashMap<NodeId, RouteTableEntry>) -> R) -> R {
        let mut guard = self.entries.write();
        let mut next = HashMap::clone(&guard);
        let result = f(&mut next);
        *guard = Arc::new(next);
        result
    }
}
