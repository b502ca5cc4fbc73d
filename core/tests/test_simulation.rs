// Integration tests for the network simulator
//
// Full-length runs of the fault-free baseline plus the stressed scenarios,
// checked for delivery, determinism and consistent bookkeeping.

use meshaid_core::config::MeshConfig;
use meshaid_core::routing::Algorithm;
use meshaid_core::simulation::{
    builtin_scenarios, compare_algorithms, find_scenario, static_baseline, NetworkSimulator,
    SimulationEventKind, SimulationTuning,
};

#[test]
fn test_static_baseline_converges() {
    let config = static_baseline();
    assert_eq!(config.duration_ticks, 300);
    assert_eq!(config.failure_rate, 0.0);
    assert_eq!(config.mobility_factor, 0.0);
    assert_eq!(config.battery_drain_factor, 0.0);

    let mut sim = NetworkSimulator::new(config).unwrap();
    let report = sim.run();

    assert_eq!(report.ticks, 300);
    assert!(report.metrics.messages_generated > 0);
    assert!(
        report.metrics.delivery_rate >= 99.0,
        "delivery {:.2}% ({} delivered, {} failed)",
        report.metrics.delivery_rate,
        report.metrics.messages_delivered,
        report.metrics.messages_failed
    );
    assert_eq!(report.metrics.online_nodes, report.metrics.total_nodes);
    assert_eq!(report.metrics.node_failures, 0);
    assert!(report.events.is_empty());

    println!(
        "✓ Static baseline: {:.1}% delivery over {} messages",
        report.metrics.delivery_rate, report.metrics.messages_generated
    );
}

#[test]
fn test_same_seed_same_report() {
    let config = find_scenario("emergency_scenario").unwrap().with_duration(60);
    let a = NetworkSimulator::new(config.clone()).unwrap().run();
    let b = NetworkSimulator::new(config).unwrap().run();
    assert_eq!(a.metrics, b.metrics);
    assert_eq!(a.events, b.events);

    println!("✓ Identical seeds replay identically");
}

#[test]
fn test_different_seed_different_run() {
    let config = find_scenario("network_stress_test").unwrap().with_duration(40);
    let a = NetworkSimulator::new(config.clone().with_seed(1)).unwrap().run();
    let b = NetworkSimulator::new(config.with_seed(2)).unwrap().run();
    assert!(a.metrics != b.metrics || a.events != b.events);
}

#[test]
fn test_every_builtin_scenario_runs_clean() {
    for config in builtin_scenarios() {
        let id = config.id.clone();
        let mut sim = NetworkSimulator::new(config.with_duration(30)).unwrap();
        let report = sim.run();
        let m = &report.metrics;

        assert_eq!(
            m.messages_generated,
            m.messages_delivered + m.messages_failed + m.messages_in_flight,
            "{}: messages unaccounted for",
            id
        );
        assert!((0.0..=100.0).contains(&m.delivery_rate), "{}", id);
        assert!((0.0..=100.0).contains(&m.network_reliability), "{}", id);
        assert!(m.online_nodes <= m.total_nodes);
        assert!(sim.links_are_symmetric(), "{}: asymmetric links", id);
        for event in &report.events {
            assert!(event.tick <= 30);
            if let Some(resolved) = event.resolved_at {
                assert!(resolved >= event.tick);
            }
        }
    }
}

#[test]
fn test_stress_produces_failures() {
    let config = find_scenario("network_stress_test").unwrap().with_duration(100);
    let report = NetworkSimulator::new(config).unwrap().run();
    let failures = report
        .events
        .iter()
        .filter(|e| matches!(e.kind, SimulationEventKind::NodeFailure | SimulationEventKind::BatteryDepleted))
        .count();
    assert!(failures > 0);
    assert!(report.metrics.network_reliability <= 100.0);
}

#[test]
fn test_tuning_overrides_node_model() {
    let base = find_scenario("network_stress_test").unwrap().with_duration(100);

    // failed nodes stay down when recovery is tuned away
    let no_recovery = SimulationTuning {
        recovery_chance: 0.0,
        ..SimulationTuning::default()
    };
    let report = NetworkSimulator::new(base.clone().with_tuning(no_recovery)).unwrap().run();
    let failures: Vec<_> = report
        .events
        .iter()
        .filter(|e| e.kind == SimulationEventKind::NodeFailure)
        .collect();
    assert!(!failures.is_empty());
    assert!(failures.iter().all(|e| e.resolved_at.is_none()));

    // zero drain rates leave every battery untouched
    let no_drain = SimulationTuning {
        coordinator_drain: 0.0,
        relay_drain: 0.0,
        bridge_drain: 0.0,
        endpoint_drain: 0.0,
        processing_drain: 0.0,
        ..SimulationTuning::default()
    };
    let drained = NetworkSimulator::new(base.clone()).unwrap().run();
    let untouched = NetworkSimulator::new(base.with_tuning(no_drain)).unwrap().run();
    assert!(drained.metrics.total_battery_consumed > 0.0);
    assert_eq!(untouched.metrics.total_battery_consumed, 0.0);

    println!("✓ Node model follows the configured tuning");
}

#[test]
fn test_invalid_tuning_is_rejected() {
    let tuning = SimulationTuning {
        recovery_chance: 1.5,
        ..SimulationTuning::default()
    };
    assert!(NetworkSimulator::new(static_baseline().with_tuning(tuning)).is_err());
}

#[test]
fn test_every_algorithm_delivers_on_the_baseline() {
    for algorithm in Algorithm::ALL {
        let config = static_baseline().with_duration(60).with_algorithm(algorithm);
        let report = NetworkSimulator::new(config).unwrap().run();
        assert_eq!(report.algorithm, algorithm);
        assert!(
            report.metrics.delivery_rate >= 95.0,
            "{}: {:.1}%",
            algorithm,
            report.metrics.delivery_rate
        );
    }
}

#[test]
fn test_comparison_over_emergency_scenario() {
    let config = find_scenario("emergency_scenario").unwrap().with_duration(60);
    let report = compare_algorithms(&config, &Algorithm::ALL, &MeshConfig::default()).unwrap();
    assert_eq!(report.results.len(), 5);
    assert_eq!(report.scenario, "emergency_scenario");
    let best = report.best().unwrap();
    assert!(report.results.iter().all(|r| r.overall_score <= best.overall_score));

    println!("✓ Best on emergency_scenario: {} ({:.1})", best.name, best.overall_score);
}

#[test]
fn test_unknown_scenario_is_not_found() {
    assert!(find_scenario("meteor_strike").is_err());
}
