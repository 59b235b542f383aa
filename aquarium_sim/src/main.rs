//! Shared Aquarium DST Simulator CLI
//!
//! Run deterministic simulation tests with store fault scenarios.

use aquarium_core::SessionConfig;
use aquarium_sim::scenarios::ScenarioId;
use aquarium_sim::{ScenarioResult, ScenarioRunner, SimExport};
use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Shared Aquarium Deterministic Simulation Testing CLI
#[derive(Parser, Debug)]
#[command(name = "aquarium-sim")]
#[command(about = "Run deterministic simulation tests for the shared aquarium", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Number of sessions sharing the tank
    #[arg(short = 'n', long, default_value = "3")]
    sessions: usize,

    /// Size of the starter catalog
    #[arg(short, long, default_value = "12")]
    fish: usize,

    /// Scenario to run (solo_claim, contested_claim, owner_crash, ..., all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Number of consecutive seeds to test (for CI mode)
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Simulation duration in seconds (scenarios enforce their own minimum)
    #[arg(short, long, default_value = "10")]
    duration: f64,

    /// Render rate in Hz
    #[arg(long, default_value = "60")]
    fps: u32,

    /// Session configuration as JSON (bounds, flocking, election, ...)
    #[arg(long)]
    config: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export simulation frames to a JSON file
    #[arg(long)]
    export: Option<String>,
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

fn load_session_config(path: Option<&str>) -> Result<SessionConfig, String> {
    let Some(path) = path else {
        return Ok(SessionConfig::default());
    };
    let json = std::fs::read_to_string(path).map_err(|e| format!("{}: {}", path, e))?;
    SessionConfig::from_json(&json).map_err(|e| format!("{}: {}", path, e))
}

fn report(result: &ScenarioResult) {
    if result.passed {
        info!("✓ {} (seed={}) PASSED", result.scenario.name(), result.seed);
    } else {
        error!(
            "✗ {} (seed={}) FAILED: {}",
            result.scenario.name(),
            result.seed,
            result.failure_reason.as_deref().unwrap_or("unknown")
        );
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    if !args.json {
        info!("Shared Aquarium DST Simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    // Parse scenarios
    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        match args.scenario.parse() {
            Ok(scenario) => vec![scenario],
            Err(e) => {
                eprintln!("Error: {}", e);
                let names: Vec<&str> = ScenarioId::all().iter().map(|s| s.name()).collect();
                eprintln!("Available scenarios: {}, all", names.join(", "));
                std::process::exit(2);
            }
        }
    };

    let session_config = match load_session_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: invalid session config {}", e);
            std::process::exit(2);
        }
    };

    // Determine base seed
    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(42)
    } else {
        args.seed
    };

    let runner_for = |seed: u64| {
        ScenarioRunner::new(seed, args.sessions)
            .with_fish(args.fish)
            .with_fps(args.fps)
            .with_duration(args.duration)
            .with_session_config(session_config.clone())
    };

    // Handle --export mode
    if let Some(export_path) = &args.export {
        if scenarios.len() > 1 {
            eprintln!("Error: --export only supports a single scenario, not 'all'");
            std::process::exit(2);
        }

        let scenario = scenarios[0];
        let mut export = SimExport::new(scenario.name(), base_seed);
        let result = runner_for(base_seed).run_with_export(scenario, &mut export).await;
        report(&result);

        match export.write_to_file(export_path) {
            Ok(()) => info!("Exported {} frames to {}", export.frames.len(), export_path),
            Err(e) => error!("Failed to write export: {:?}", e),
        }

        if !result.passed {
            std::process::exit(1);
        }
        return;
    }

    // Run simulations
    let mut all_results: Vec<ScenarioResult> = Vec::new();
    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);
        let runner = runner_for(seed);

        for scenario in &scenarios {
            let result = runner.run(*scenario).await;
            if !args.json {
                report(&result);
            }
            all_results.push(result);
        }
    }

    // Summary
    let total = all_results.len();
    let failed_count = all_results.iter().filter(|r| !r.passed).count();
    let passed = total - failed_count;

    if args.json {
        let summary = serde_json::json!({
            "total": total,
            "passed": passed,
            "failed": failed_count,
            "results": all_results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "ticks": r.total_ticks,
                    "time_secs": r.final_time_secs,
                    "fish": r.final_fish_count,
                    "failure_reason": r.failure_reason,
                    "metrics": r.metrics,
                })
            }).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{}", json),
            Err(e) => error!("Failed to encode summary: {}", e),
        }
    } else {
        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        if failed_count == 0 {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed_count, total);
            for result in all_results.iter().filter(|r| !r.passed) {
                error!(
                    "  - {} seed={}: {}",
                    result.scenario.name(),
                    result.seed,
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }
    }

    // Exit with proper code for CI
    if failed_count > 0 {
        std::process::exit(1);
    }
}
