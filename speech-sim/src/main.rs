//! Headless driver for the speech core.
//!
//! Loads a scenario (actors plus response rules) and reads commands from
//! stdin. Runs the bundled lobby scenario when none is given:
//!
//! ```bash
//! cargo run -p speech-sim -- --scenario speech-sim/scenarios/lobby.json --seed 7
//! ```
//!
//! Diagnostics go to stderr and are filtered with `RUST_LOG`.

mod console;
mod headless;
mod rulebook;
mod scenario;
mod world;

use anyhow::Context;
use scenario::Scenario;
use speech_core::SpeechConfig;

const BUILTIN_SCENARIO: &str = include_str!("../scenarios/lobby.json");

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,speech_core=info,speech_sim=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let args = headless::parse_args(&args);
    if args.help {
        print_help();
        return Ok(());
    }

    let mut scenario = match &args.scenario {
        Some(path) => Scenario::load(path)?,
        None => Scenario::from_json_str(BUILTIN_SCENARIO).context("built-in scenario")?,
    };
    if let Some(path) = &args.config {
        scenario.config = SpeechConfig::from_file(path).with_context(|| format!("load config {}", path.display()))?;
    }

    headless::run_headless(scenario.build(args.seed))
}

fn print_help() {
    println!("speech-sim - drive a speech scenario from the command line");
    println!();
    println!("USAGE:");
    println!("    speech-sim [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --scenario <path>   Scenario JSON (default: built-in lobby)");
    println!("    --config <path>     Speech settings JSON, replacing the scenario's");
    println!("    --seed <n>          Seed for every random choice");
    println!("    -h, --help          Show this help");
    println!();
    println!("Type #help once running for the command list.");
}
