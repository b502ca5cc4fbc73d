//! Periodic maintenance.
//!
//! Each task runs on its own fixed-interval tokio timer so a slow health check
//! never delays route aging or heartbeats. Message forwarding does not go
//! through the scheduler at all.

use crate::engine::MeshEngine;
use std::fmt;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceTask {
    RouteAging,
    NodePruning,
    HealthCheck,
    TopologyOptimization,
    BroadcastSweep,
    Heartbeat,
}

impl MaintenanceTask {
    pub const ALL: [MaintenanceTask; 6] = [
        MaintenanceTask::RouteAging,
        MaintenanceTask::NodePruning,
        MaintenanceTask::HealthCheck,
        MaintenanceTask::TopologyOptimization,
        MaintenanceTask::BroadcastSweep,
        MaintenanceTask::Heartbeat,
    ];

    /// Period taken from the engine's configuration. Route aging speeds up
    /// while the engine is in emergency mode.
    pub fn period(&self, engine: &MeshEngine) -> Duration {
        let config = engine.config();
        let ms = match self {
            MaintenanceTask::RouteAging if engine.is_emergency_mode() => {
                config.routing.emergency_update_interval_ms
            }
            MaintenanceTask::RouteAging => config.routing.update_interval_ms,
            MaintenanceTask::NodePruning | MaintenanceTask::HealthCheck => {
                config.topology.health_check_interval_ms
            }
            MaintenanceTask::TopologyOptimization => config.topology.optimize_interval_ms,
            MaintenanceTask::BroadcastSweep => config
                .broadcast
                .sweep_interval_ms
                .min(config.broadcast.retry_interval_ms),
            MaintenanceTask::Heartbeat => config.router.heartbeat_interval_ms,
        };
        Duration::from_millis(ms.max(1))
    }

    /// Timer resolution: the shortest period the task can take in any mode.
    fn tick_period(&self, engine: &MeshEngine) -> Duration {
        match self {
            MaintenanceTask::RouteAging => {
                let routing = &engine.config().routing;
                let ms = routing
                    .update_interval_ms
                    .min(routing.emergency_update_interval_ms);
                Duration::from_millis(ms.max(1))
            }
            _ => self.period(engine),
        }
    }

    fn run(&self, engine: &MeshEngine) {
        match self {
            MaintenanceTask::RouteAging => {
                let report = engine.age_routes();
                tracing::trace!("Route aging: {:?}", report);
            }
            MaintenanceTask::NodePruning => {
                engine.prune_nodes();
            }
            MaintenanceTask::HealthCheck => {
                engine.check_health();
            }
            MaintenanceTask::TopologyOptimization => {
                engine.optimize_topology();
            }
            MaintenanceTask::BroadcastSweep => {
                engine.sweep_broadcasts();
            }
            MaintenanceTask::Heartbeat => {
                let sent = engine.send_heartbeat();
                if sent > 0 {
                    tracing::trace!("Heartbeat sent to {} peers", sent);
                }
            }
        }
    }
}

impl fmt::Display for MaintenanceTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MaintenanceTask::RouteAging => "route-aging",
            MaintenanceTask::NodePruning => "node-pruning",
            MaintenanceTask::HealthCheck => "health-check",
            MaintenanceTask::TopologyOptimization => "topology-optimization",
            MaintenanceTask::BroadcastSweep => "broadcast-sweep",
            MaintenanceTask::Heartbeat => "heartbeat",
        };
        f.write_str(s)
    }
}

/// Handles for the running timers. Dropping the scheduler stops them.
pub struct MaintenanceScheduler {
    tasks: Vec<(MaintenanceTask, JoinHandle<()>)>,
}

impl MaintenanceScheduler {
    /// Spawn every task. Must be called inside a tokio runtime.
    pub fn start(engine: MeshEngine) -> Self {
        Self::start_tasks(engine, &MaintenanceTask::ALL)
    }

    pub fn start_tasks(engine: MeshEngine, tasks: &[MaintenanceTask]) -> Self {
        let tasks = tasks
            .iter()
            .map(|&task| {
                let engine = engine.clone();
                let resolution = task.tick_period(&engine);
                tracing::debug!("Scheduling {} every {:?}", task, task.period(&engine));
                let handle = tokio::spawn(async move {
                    let mut ticker = tokio::time::interval(resolution);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    // first tick completes immediately
                    ticker.tick().await;
                    let mut last_run = Instant::now();
                    loop {
                        ticker.tick().await;
                        // the period is re-read each tick so mode changes apply at once
                        if last_run.elapsed() >= task.period(&engine) {
                            task.run(&engine);
                            last_run = Instant::now();
                        }
                    }
                });
                (task, handle)
            })
            .collect();
        Self { tasks }
    }

    pub fn task_count(&self) -> usize {
        self.tasks.iter().filter(|(_, h)| !h.is_finished()).count()
    }

    pub fn shutdown(mut self) {
        self.abort_all();
    }

    fn abort_all(&mut self) {
        for (task, handle) in self.tasks.drain(..) {
            tracing::debug!("Stopping {}", task);
            handle.abort();
        }
    }
}

impl Drop for MaintenanceScheduler {
    fn drop(&mut self) {
        self.abort_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::MeshConfig;
    use crate::engine::Platform;
    use crate::node::{Node, NodeRole};
    use crate::platform::InMemoryTransport;
    use crate::routing::RouteConstraints;
    use std::sync::Arc;

    fn engine(transport: Arc<InMemoryTransport>) -> MeshEngine {
        let platform = Platform::default()
            .with_clock(Arc::new(ManualClock::new(0)))
            .with_transport(transport);
        let engine = MeshEngine::with_platform("a", NodeRole::Coordinator, MeshConfig::default(), platform);
        engine.add_remote_node(Node::new("b", NodeRole::Relay));
        engine.connect_peer("b").unwrap();
        engine
    }

    #[test]
    fn test_periods_follow_config() {
        let e = engine(Arc::new(InMemoryTransport::new()));
        assert_eq!(MaintenanceTask::Heartbeat.period(&e), Duration::from_secs(10));
        assert_eq!(MaintenanceTask::BroadcastSweep.period(&e), Duration::from_secs(30));
        assert_eq!(MaintenanceTask::RouteAging.period(&e), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_runs_on_its_timer() {
        let transport = Arc::new(InMemoryTransport::new());
        let e = engine(transport.clone());
        e.activate_emergency().unwrap();

        let scheduler = MaintenanceScheduler::start_tasks(e.clone(), &[MaintenanceTask::Heartbeat]);
        assert_eq!(transport.sent_to("b"), 0);

        tokio::time::sleep(Duration::from_millis(25_000)).await;
        assert_eq!(transport.sent_to("b"), 2);

        scheduler.shutdown();
        tokio::time::sleep(Duration::from_millis(30_000)).await;
        assert_eq!(transport.sent_to("b"), 2);
    }

    #[test]
    fn test_route_aging_speeds_up_in_emergency() {
        let e = engine(Arc::new(InMemoryTransport::new()));
        e.activate_emergency().unwrap();
        assert_eq!(MaintenanceTask::RouteAging.period(&e), Duration::from_secs(30));
        e.deactivate_emergency().unwrap();
        assert_eq!(MaintenanceTask::RouteAging.period(&e), Duration::from_secs(60));
    }

    /// Engine at t=0 with a route to b, then the clock jumped far enough that
    /// the route is stale in either mode.
    fn stale_route_engine() -> MeshEngine {
        let clock = ManualClock::new(0);
        let platform = Platform::default()
            .with_clock(Arc::new(clock.clone()))
            .with_transport(Arc::new(InMemoryTransport::new()));
        let e = MeshEngine::with_platform("a", NodeRole::Coordinator, MeshConfig::default(), platform);
        e.add_remote_node(Node::new("b", NodeRole::Relay));
        e.connect_peer("b").unwrap();
        e.find_route("b", &RouteConstraints::default()).unwrap();
        clock.set(700_000);
        e
    }

    fn has_active_route(e: &MeshEngine) -> bool {
        e.routes().lookup("b", &RouteConstraints::default()).is_some()
    }

    #[tokio::test(start_paused = true)]
    async fn test_route_aging_timer_follows_mode() {
        let calm = stale_route_engine();
        let urgent = stale_route_engine();
        urgent.activate_emergency().unwrap();

        let calm_timer = MaintenanceScheduler::start_tasks(calm.clone(), &[MaintenanceTask::RouteAging]);
        let urgent_timer =
            MaintenanceScheduler::start_tasks(urgent.clone(), &[MaintenanceTask::RouteAging]);

        tokio::time::sleep(Duration::from_millis(31_000)).await;
        assert!(has_active_route(&calm));
        assert!(!has_active_route(&urgent));

        tokio::time::sleep(Duration::from_millis(30_000)).await;
        assert!(!has_active_route(&calm));

        calm_timer.shutdown();
        urgent_timer.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_tasks_start() {
        let e = engine(Arc::new(InMemoryTransport::new()));
        let scheduler = MaintenanceScheduler::start(e);
        tokio::task::yield_now().await;
        assert_eq!(scheduler.task_count(), MaintenanceTask::ALL.len());
    }
}
