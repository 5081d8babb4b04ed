//! Golden Test Runner
//!
//! Runs the scripted scenarios against a fresh in-memory ledger each.

use anyhow::Result;
use clap::{Parser, Subcommand};
use warden_golden_tests::{run_all, scenarios};

#[derive(Parser)]
#[command(name = "golden-tests")]
#[command(about = "Warden golden scenario suite")]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all golden scenarios
    Run,
    /// List available test scenarios
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    match args.command {
        Commands::Run => run_tests().await,
        Commands::List => {
            list_scenarios();
            Ok(())
        }
    }
}

async fn run_tests() -> Result<()> {
    println!("Starting Warden Golden Test Suite");
    println!("=================================");

    let mut all_passed = true;
    for (scenario, outcome) in run_all().await? {
        println!("\nRunning scenario: {}", scenario.name);
        println!("   {}", scenario.description);

        match outcome {
            Ok(results) if results.passed() => println!("   PASSED"),
            Ok(results) => {
                println!("   FAILED");
                all_passed = false;
                for result in results.invariant_results.iter().filter(|r| !r.passed) {
                    println!("      Invariant: {:?}", result.invariant);
                    println!("        {:?}", result.error);
                }
            }
            Err(e) => {
                println!("   ERROR: {}", e);
                all_passed = false;
            }
        }
    }

    println!("\n=================================");
    if all_passed {
        println!("All golden tests PASSED");
        Ok(())
    } else {
        println!("Some golden tests FAILED");
        std::process::exit(1);
    }
}

fn list_scenarios() {
    println!("Available Test Scenarios:");
    println!("=========================");

    for (i, scenario) in scenarios::all().iter().enumerate() {
        println!("{}. {}", i + 1, scenario.name);
        println!("   {}", scenario.description);
        println!("   Steps: {}", scenario.steps.len());
        println!("   Invariants: {}", scenario.invariant_checks.len());
        println!();
    }
}
