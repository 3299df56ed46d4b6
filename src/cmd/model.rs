//! Forecaster inspection: `ctxwatch model`.

use anyhow::Result;
use console::style;
use std::path::Path;

use super::load_config;

pub fn cmd_model(data_dir: &Path) -> Result<()> {
    use ctxwatch::forecast::UsageForecaster;

    let config = load_config(data_dir)?;
    let forecaster = UsageForecaster::open(data_dir, config.capacity, config.forecast)?;
    let weights = forecaster.weights();

    println!();
    println!("Forecast Model");
    println!("==============");
    println!();
    println!("  complexity   = {:.3}", weights.complexity);
    println!("  tool_results = {:.3}", weights.tool_results);
    println!("  memory_ops   = {:.3}", weights.memory_ops);
    println!("  time_of_day  = {:.3}", weights.time_of_day);
    match weights.fitted_at {
        Some(at) => println!(
            "  fitted       = {} ({} samples)",
            at.format("%Y-%m-%d %H:%M"),
            weights.samples_used
        ),
        None => println!("  fitted       = {}", style("never (defaults)").dim()),
    }
    println!();
    println!("Training samples: {}", forecaster.sample_count());
    match forecaster.accuracy() {
        Some(acc) => println!("Accuracy (5-message horizon): {}", acc),
        None => println!("{}", style("No samples to score yet.").dim()),
    }
    println!();
    Ok(())
}
