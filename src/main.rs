use anyhow::{Context, Result};
use log::info;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::env;
use std::fs;
use tailrisk::analysis::RiskAnalysis;
use tailrisk::config::EngineConfig;
use tailrisk::market_data::JsonFileSource;

fn main() -> Result<()> {
    // Initialize logger with default info level if RUST_LOG not set
    if std::env::var("RUST_LOG").is_err() {
        unsafe { std::env::set_var("RUST_LOG", "info"); }
    }
    env_logger::init();
    info!("Starting tail-risk analysis");

    // Get config file from command line argument or use default
    let args: Vec<String> = env::args().collect();
    let config_file = if args.len() > 1 {
        &args[1]
    } else {
        "config.json"
    };

    info!("Loading configuration from: {}", config_file);
    let config = EngineConfig::load_from_file(config_file)?;

    let source = JsonFileSource::new(&config.data_file);
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let report = RiskAnalysis::run_from_source(&config, &source, &mut rng)?;
    report.log_summary();

    if let Some(path) = &config.report_file {
        let json = serde_json::to_string_pretty(&report)?;
        fs::write(path, json).with_context(|| format!("Failed to write report to {}", path))?;
        info!("Report written to {}", path);
    }

    Ok(())
}
