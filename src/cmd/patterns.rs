//! Access pattern commands: `ctxwatch patterns`, `predict` and `prune`.

use anyhow::Result;
use console::style;
use std::path::Path;

use ctxwatch::access::AccessTracker;

use super::load_config;

fn open_tracker(data_dir: &Path) -> Result<AccessTracker> {
    let config = load_config(data_dir)?;
    Ok(AccessTracker::open(data_dir, config.access)?)
}

pub fn cmd_patterns(data_dir: &Path, n: usize) -> Result<()> {
    let tracker = open_tracker(data_dir)?;
    let top = tracker.top_patterns(n);

    if top.is_empty() {
        println!("No access patterns recorded yet.");
        return Ok(());
    }

    println!();
    println!(
        "{:<40} {:>8} {:>8} {:<18} {:<16}",
        "Resource", "Score", "Total", "Last accessed", "Last actor"
    );
    println!(
        "{:<40} {:>8} {:>8} {:<18} {:<16}",
        "-".repeat(40),
        "-".repeat(8),
        "-".repeat(8),
        "-".repeat(18),
        "-".repeat(16)
    );
    for ranked in &top {
        let r = &ranked.record;
        println!(
            "{:<40} {:>8.1} {:>8} {:<18} {:<16}",
            r.resource_id,
            ranked.score,
            r.access_count,
            r.last_accessed.format("%Y-%m-%d %H:%M"),
            r.last_actor.as_deref().unwrap_or("-")
        );
    }
    println!();
    Ok(())
}

pub fn cmd_predict(data_dir: &Path, actor: Option<&str>) -> Result<()> {
    let tracker = open_tracker(data_dir)?;
    let predictions = tracker.predict_next(actor.unwrap_or(""));

    if predictions.is_empty() {
        println!("No confident predictions.");
        return Ok(());
    }

    println!();
    for p in &predictions {
        println!("{} {}", style(format!("{:>5.1}", p.score)).cyan(), p.resource_id);
        for reason in &p.reasons {
            println!("      {} {}", style("·").dim(), style(reason).dim());
        }
    }
    println!();
    Ok(())
}

pub fn cmd_prune(data_dir: &Path, days: Option<i64>) -> Result<()> {
    let config = load_config(data_dir)?;
    let days = days.unwrap_or(config.access.retention_days);
    if days < 0 {
        anyhow::bail!("--days must not be negative");
    }
    let tracker = AccessTracker::open(data_dir, config.access)?;
    let removed = tracker.prune(days);
    println!(
        "Pruned {} access record(s) older than {} days ({} remaining).",
        removed,
        days,
        tracker.len()
    );
    Ok(())
}
