// Route discovery engine.
//
// Runs one algorithm (or the hybrid chain) against a graph snapshot and
// tracks each request through Idle -> Searching -> Found | NotFound | TimedOut.
// Discovery itself never writes to the route table; callers merge a Found
// route, so a timed-out search leaves nothing behind.

use super::algorithms::{self, Algorithm, DiscoveryRequest};
use super::proactive::ProactiveTable;
use super::route::{Route, RouteConstraints};
use super::table::RouteDiscovery;
use crate::config::DiscoveryCosts;
use crate::node::NodeId;
use crate::topology::ConnectionGraph;
use crate::{MeshError, Result};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Lifecycle of one discovery request.
#[derive(Debug, Clone, PartialEq)]
pub enum DiscoveryState {
    Idle,
    Searching,
    Found(Route),
    NotFound,
    TimedOut,
}

impl DiscoveryState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DiscoveryState::Found(_) | DiscoveryState::NotFound | DiscoveryState::TimedOut
        )
    }
}

/// One tracked discovery request.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoverySession {
    pub id: String,
    pub request: DiscoveryRequest,
    pub algorithm: Algorithm,
    pub state: DiscoveryState,
}

impl DiscoverySession {
    pub fn new(request: DiscoveryRequest, algorithm: Algorithm) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            request,
            algorithm,
            state: DiscoveryState::Idle,
        }
    }

    pub fn begin(&mut self) -> Result<()> {
        match self.state {
            DiscoveryState::Idle => {
                self.state = DiscoveryState::Searching;
                Ok(())
            }
            _ => Err(MeshError::Invalid(format!(
                "discovery {} already started",
                self.id
            ))),
        }
    }

    /// Move Searching to a terminal state.
    pub fn finish(&mut self, outcome: DiscoveryState) -> Result<()> {
        if self.state != DiscoveryState::Searching {
            return Err(MeshError::Invalid(format!(
                "discovery {} is not searching",
                self.id
            )));
        }
        if !outcome.is_terminal() {
            return Err(MeshError::Invalid(format!(
                "{:?} is not a terminal discovery state",
                outcome
            )));
        }
        self.state = outcome;
        Ok(())
    }

    pub fn route(&self) -> Option<&Route> {
        match &self.state {
            DiscoveryState::Found(route) => Some(route),
            _ => None,
        }
    }

    /// The session's result as the error taxonomy sees it.
    pub fn into_result(self) -> Result<Route> {
        match self.state {
            DiscoveryState::Found(route) => Ok(route),
            DiscoveryState::TimedOut => Err(MeshError::Timeout(format!(
                "discovery of {}",
                self.request.destination
            ))),
            _ => Err(MeshError::NotFound(format!(
                "route to {}",
                self.request.destination
            ))),
        }
    }
}

/// Counters over every session the engine has run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoveryStats {
    pub found: u64,
    pub not_found: u64,
    pub timed_out: u64,
    pub proactive_recomputes: u64,
}

pub struct RouteDiscoveryEngine {
    costs: DiscoveryCosts,
    proactive: RwLock<Option<Arc<ProactiveTable>>>,
    found: AtomicU64,
    not_found: AtomicU64,
    timed_out: AtomicU64,
    recomputes: AtomicU64,
}

impl RouteDiscoveryEngine {
    pub fn new(costs: DiscoveryCosts) -> Self {
        Self {
            costs,
            proactive: RwLock::new(None),
            found: AtomicU64::new(0),
            not_found: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
            recomputes: AtomicU64::new(0),
        }
    }

    pub fn costs(&self) -> &DiscoveryCosts {
        &self.costs
    }

    pub fn stats(&self) -> DiscoveryStats {
        DiscoveryStats {
            found: self.found.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            proactive_recomputes: self.recomputes.load(Ordering::Relaxed),
        }
    }

    /// Precomputed table for `graph`, recomputed if the topology moved on.
    pub fn proactive_table(&self, graph: &ConnectionGraph) -> Arc<ProactiveTable> {
        if let Some(table) = self.proactive.read().as_ref() {
            if !table.is_stale(graph) {
                return table.clone();
            }
        }
        let table = Arc::new(ProactiveTable::compute(graph));
        self.recomputes.fetch_add(1, Ordering::Relaxed);
        *self.proactive.write() = Some(table.clone());
        table
    }

    /// Run one algorithm synchronously.
    pub fn run(
        &self,
        graph: &ConnectionGraph,
        request: &DiscoveryRequest,
        algorithm: Algorithm,
        now: u64,
    ) -> Option<Route> {
        let costs = &self.costs;
        match algorithm {
            Algorithm::Reactive => algorithms::reactive(graph, request, costs, now),
            Algorithm::Proactive => {
                let table = self.proactive_table(graph);
                algorithms::proactive(&table, graph, request, costs, now)
            }
            Algorithm::SourceRoute => algorithms::source_route(graph, request, costs, now),
            Algorithm::Geographic => algorithms::geographic(graph, request, costs, now),
            Algorithm::Hybrid => {
                let table = self.proactive_table(graph);
                algorithms::hybrid(graph, Some(&table), request, costs, now)
            }
        }
    }

    /// Run a full tracked session synchronously.
    pub fn discover(
        &self,
        graph: &ConnectionGraph,
        request: DiscoveryRequest,
        algorithm: Algorithm,
        now: u64,
    ) -> DiscoverySession {
        let mut session = DiscoverySession::new(request, algorithm);
        // a fresh session is Idle, so begin() cannot fail here
        let _ = session.begin();
        let outcome = match self.run(graph, &session.request, algorithm, now) {
            Some(route) => {
                self.found.fetch_add(1, Ordering::Relaxed);
                DiscoveryState::Found(route)
            }
            None => {
                self.not_found.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    "{} discovery {} -> {} found nothing",
                    algorithm,
                    session.request.source,
                    session.request.destination
                );
                DiscoveryState::NotFound
            }
        };
        let _ = session.finish(outcome);
        session
    }

    /// Run a session on the blocking pool, bounded by `timeout`. A timed-out
    /// session is reported as `TimedOut` and its late result discarded.
    pub async fn discover_with_timeout(
        self: &Arc<Self>,
        graph: Arc<ConnectionGraph>,
        request: DiscoveryRequest,
        algorithm: Algorithm,
        now: u64,
        timeout: Duration,
    ) -> DiscoverySession {
        let engine = Arc::clone(self);
        let fallback = request.clone();
        let search = async move {
            let task = tokio::task::spawn_blocking(move || {
                engine.discover(&graph, request, algorithm, now)
            });
            match task.await {
                Ok(session) => Some(session),
                Err(join_error) => {
                    tracing::warn!("Discovery task failed: {}", join_error);
                    None
                }
            }
        };
        self.bounded(fallback, algorithm, timeout, search).await
    }

    /// Await `search` for at most `timeout`.
    pub async fn bounded<F>(
        &self,
        request: DiscoveryRequest,
        algorithm: Algorithm,
        timeout: Duration,
        search: F,
    ) -> DiscoverySession
    where
        F: Future<Output = Option<DiscoverySession>>,
    {
        match tokio::time::timeout(timeout, search).await {
            Ok(Some(session)) => session,
            Ok(None) => self.terminal_session(request, algorithm, DiscoveryState::NotFound),
            Err(_) => {
                self.timed_out.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    "Discovery {} -> {} timed out after {:?}",
                    request.source,
                    request.destination,
                    timeout
                );
                self.terminal_session(request, algorithm, DiscoveryState::TimedOut)
            }
        }
    }

    fn terminal_session(
        &self,
        request: DiscoveryRequest,
        algorithm: Algorithm,
        state: DiscoveryState,
    ) -> DiscoverySession {
        let mut session = DiscoverySession::new(request, algorithm);
        let _ = session.begin();
        let _ = session.finish(state);
        session
    }
}

/// Binds the engine to one graph and source so the route table can call
/// back into it.
pub struct GraphDiscovery<'a> {
    pub engine: &'a RouteDiscoveryEngine,
    pub graph: &'a ConnectionGraph,
    pub source: &'a NodeId,
    pub algorithm: Algorithm,
    /// Hop bound when the constraints carry none.
    pub default_max_hops: u32,
    pub now: u64,
}

impl RouteDiscovery for GraphDiscovery<'_> {
    fn discover(&self, destination: &NodeId, constraints: &RouteConstraints) -> Option<Route> {
        let request = DiscoveryRequest {
            source: self.source.clone(),
            destination: destination.clone(),
            emergency: constraints.emergency,
            max_hops: constraints.max_hops.unwrap_or(self.default_max_hops),
            avoid: constraints.avoid.clone(),
        };
        self.engine
            .discover(self.graph, request, self.algorithm, self.now)
            .into_result()
            .ok()
    }

    fn is_usable(&self, route: &Route) -> bool {
        if !self.graph.are_linked(self.source, &route.next_hop) {
            return false;
        }
        match &route.path {
            Some(path) => path
                .windows(2)
                .all(|pair| self.graph.are_linked(&pair[0], &pair[1])),
            None => true,
        }
    }
}
