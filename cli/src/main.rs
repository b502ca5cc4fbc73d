// meshaid-cli: Mesh simulation and routing comparison CLI
//
// Runs the discrete-tick network simulator over the built-in scenarios,
// ranks routing algorithms side by side and manages the local config file.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use meshaid_core::routing::Algorithm;
use meshaid_core::simulation::{
    builtin_scenarios, compare_algorithms, find_scenario, ComparisonReport, NetworkSimulator,
    SimulationConfig, SimulationEventKind, SimulationReport,
};

#[derive(Parser)]
#[command(name = "meshaid")]
#[command(about = "MeshAid: Emergency Mesh Routing Simulator", long_about = None)]
#[command(version)]
struct Cli {
    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one scenario with one routing algorithm
    Simulate {
        #[arg(short, long)]
        scenario: Option<String>,
        /// reactive|aodv, proactive|olsr, source|dsr, geographic|gpsr, hybrid
        #[arg(short, long)]
        algorithm: Option<String>,
        #[arg(short, long)]
        ticks: Option<u64>,
        #[arg(long)]
        seed: Option<u64>,
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run one scenario under every algorithm and rank them
    Compare {
        #[arg(short, long)]
        scenario: Option<String>,
        #[arg(short, long)]
        ticks: Option<u64>,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long)]
        json: bool,
    },
    /// List the built-in scenarios
    Scenarios,
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
    /// Restore every setting to its default
    Reset,
}

fn init_tracing(verbose: bool, json: bool) -> tracing_appender::non_blocking::WorkerGuard {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(false);
    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(e) = installed {
        eprintln!("Logging unavailable: {}", e);
    }
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_tracing(cli.verbose, cli.log_json);

    match cli.command {
        Commands::Simulate {
            scenario,
            algorithm,
            ticks,
            seed,
            json,
        } => cmd_simulate(scenario, algorithm, ticks, seed, json).await,
        Commands::Compare {
            scenario,
            ticks,
            seed,
            json,
        } => cmd_compare(scenario, ticks, seed, json).await,
        Commands::Scenarios => cmd_scenarios(),
        Commands::Config { action } => cmd_config(action),
    }
}

/// Scenario from the command line or config, with overrides applied.
fn resolve_scenario(
    config: &config::Config,
    scenario: Option<String>,
    ticks: Option<u64>,
    seed: Option<u64>,
) -> Result<SimulationConfig> {
    let id = scenario.unwrap_or_else(|| config.default_scenario.clone());
    let mut sim = find_scenario(&id).with_context(|| {
        format!("Unknown scenario '{}'; see `meshaid scenarios`", id)
    })?;
    if let Some(ticks) = ticks.or(config.default_ticks) {
        sim = sim.with_duration(ticks);
    }
    if let Some(seed) = seed.or(config.default_seed) {
        sim = sim.with_seed(seed);
    }
    sim.validate().context("Invalid scenario parameters")?;
    Ok(sim)
}

async fn cmd_simulate(
    scenario: Option<String>,
    algorithm: Option<String>,
    ticks: Option<u64>,
    seed: Option<u64>,
    json: bool,
) -> Result<()> {
    let config = config::Config::load()?;
    let algorithm: Algorithm = match algorithm {
        Some(name) => name.parse().context("Invalid algorithm")?,
        None => config.default_algorithm,
    };
    let sim_config = resolve_scenario(&config, scenario, ticks, seed)?.with_algorithm(algorithm);
    let mesh = config.mesh.clone();
    tracing::debug!("Simulation config: {:?}", sim_config);

    if !json {
        println!(
            "{} {} with {} ({} ticks, seed {})",
            "Simulating".bold(),
            sim_config.name.bright_cyan(),
            algorithm.to_string().bright_yellow(),
            sim_config.duration_ticks,
            sim_config.seed
        );
        println!();
    }

    let report = tokio::task::spawn_blocking(move || -> Result<SimulationReport> {
        let mut sim = NetworkSimulator::with_mesh_config(sim_config, mesh)?;
        Ok(sim.run())
    })
    .await
    .context("Simulation task panicked")??;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &SimulationReport) {
    let m = &report.metrics;
    println!("{}", "Delivery".bold());
    println!("  {:<24} {}", "Delivery rate", percent(m.delivery_rate));
    println!(
        "  {:<24} {} generated, {} delivered, {} failed, {} in flight",
        "Messages",
        m.messages_generated,
        m.messages_delivered.to_string().green(),
        m.messages_failed.to_string().red(),
        m.messages_in_flight
    );
    println!("  {:<24} {:.2} ticks", "Average latency", m.average_latency);
    println!("  {:<24} {:.2} ticks", "Emergency response", m.emergency_response_time);
    println!("  {:<24} {:.2}", "Average hops", m.average_hops);
    println!("  {:<24} {:.1}", "Routing efficiency", m.routing_efficiency);
    println!();

    println!("{}", "Network".bold());
    println!("  {:<24} {}/{}", "Online nodes", m.online_nodes, m.total_nodes);
    println!("  {:<24} {}", "Reliability", percent(m.network_reliability));
    println!("  {:<24} {:.1}", "Health", m.network_health);
    println!("  {:<24} {:.1}%", "Coverage", m.coverage);
    println!("  {:<24} {}", "Components", m.components);
    println!("  {:<24} {:.2}%", "Node failure rate", m.node_failure_rate);
    println!("  {:<24} {:.2}/min", "Battery consumption", m.battery_consumption);
    println!(
        "  {:<24} {} ({} failed)",
        "Route discoveries", report.route_discoveries, report.failed_discoveries
    );
    println!();

    let count = |pred: fn(&SimulationEventKind) -> bool| {
        report.events.iter().filter(|e| pred(&e.kind)).count()
    };
    println!("{} ({} total)", "Events".bold(), report.events.len());
    println!(
        "  {:<24} {}",
        "Node failures",
        count(|k| *k == SimulationEventKind::NodeFailure)
    );
    println!(
        "  {:<24} {}",
        "Battery depleted",
        count(|k| *k == SimulationEventKind::BatteryDepleted)
    );
    println!(
        "  {:<24} {}",
        "Emergencies",
        count(|k| *k == SimulationEventKind::EmergencyActivated)
    );
    println!(
        "  {:<24} {}",
        "Partitions",
        count(|k| matches!(k, SimulationEventKind::NetworkPartition { .. }))
    );
    println!();
    println!(
        "{}",
        format!("Finished {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S")).dimmed()
    );
}

fn percent(value: f64) -> ColoredString {
    let text = format!("{:.1}%", value);
    if value >= 95.0 {
        text.green()
    } else if value >= 75.0 {
        text.yellow()
    } else {
        text.red()
    }
}

async fn cmd_compare(
    scenario: Option<String>,
    ticks: Option<u64>,
    seed: Option<u64>,
    json: bool,
) -> Result<()> {
    let config = config::Config::load()?;
    let sim_config = resolve_scenario(&config, scenario, ticks, seed)?;
    let mesh = config.mesh.clone();
    tracing::debug!("Comparison config: {:?}", sim_config);

    if !json {
        println!(
            "{} {} across {} algorithms ({} ticks, seed {})",
            "Comparing".bold(),
            sim_config.name.bright_cyan(),
            Algorithm::ALL.len(),
            sim_config.duration_ticks,
            sim_config.seed
        );
        println!();
    }

    let report = tokio::task::spawn_blocking(move || {
        compare_algorithms(&sim_config, &Algorithm::ALL, &mesh)
    })
    .await
    .context("Comparison task panicked")??;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_comparison(&report);
    }
    Ok(())
}

fn print_comparison(report: &ComparisonReport) {
    println!(
        "  {:<4} {:<44} {:>8} {:>9} {:>8} {:>8} {:>8}",
        "#", "Algorithm", "Score", "Delivery", "Latency", "Energy", "Adapt"
    );
    for (rank, result) in report.results.iter().enumerate() {
        let name = if rank == 0 {
            result.name.bright_green().bold()
        } else {
            result.name.normal()
        };
        println!(
            "  {:<4} {:<44} {:>8.1} {:>8.1}% {:>6.0}ms {:>8.1} {:>8.1}",
            rank + 1,
            name,
            result.overall_score,
            result.packet_delivery_ratio,
            result.average_latency,
            result.energy_efficiency,
            result.adaptability
        );
    }
    println!();
    if report.emergency_mode {
        println!("{}", "Emergencies occurred; adaptability weighted up.".yellow());
    }
    if let Some(best) = report.best() {
        println!("{} {}", "Best:".bold(), best.name.bright_green());
    }
}

fn cmd_scenarios() -> Result<()> {
    let scenarios = builtin_scenarios();
    println!("{} ({} total)", "Scenarios".bold(), scenarios.len());
    println!();
    for s in scenarios {
        println!("  {} {}", "•".bright_green(), s.id.bright_cyan());
        println!("    {}", s.description.dimmed());
        println!(
            "    {} nodes, {} ticks, {:.0} msg/min, failure {:.2}%, emergency {:.2}%, mobility {:.1}",
            s.node_count,
            s.duration_ticks,
            s.message_rate,
            s.failure_rate,
            s.emergency_probability,
            s.mobility_factor
        );
    }
    Ok(())
}

fn cmd_config(action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Set { key, value } => {
            let mut config = config::Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), value);
        }
        ConfigAction::Get { key } => {
            let config = config::Config::load()?;
            match config.get(&key) {
                Some(value) => println!("{} = {}", key.bright_cyan(), value),
                None => println!("{} Unknown key: {}", "✗".red(), key),
            }
        }
        ConfigAction::List => {
            let config = config::Config::load()?;
            println!("{}", "Configuration".bold());
            println!();
            for (key, value) in config.list() {
                println!("  {:<22} {}", key.bright_cyan(), value);
            }
            println!();
            println!(
                "{}",
                format!("File: {}", config::Config::config_file()?.display()).dimmed()
            );
        }
        ConfigAction::Reset => {
            config::Config::default().save()?;
            tracing::info!("Configuration reset");
            println!("{} Configuration reset to defaults", "✓".green());
        }
    }
    Ok(())
}
