//! Statistics summary: `ctxwatch report`.

use anyhow::{Context, Result};
use console::style;
use std::path::Path;

use super::{load_config, parse_bound};

pub fn cmd_report(
    data_dir: &Path,
    since: Option<&str>,
    until: Option<&str>,
    json: bool,
) -> Result<()> {
    use ctxwatch::stats::StatsStore;

    let since = since.map(|s| parse_bound(s, false)).transpose()?;
    let until = until.map(|s| parse_bound(s, true)).transpose()?;
    if let (Some(s), Some(u)) = (since, until)
        && s > u
    {
        anyhow::bail!("--since ({}) is after --until ({})", s, u);
    }

    let config = load_config(data_dir)?;
    let store = StatsStore::open(data_dir, &config.storage)?;
    let report = store.report(since, until);

    if json {
        let text = serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
        println!("{}", text);
        return Ok(());
    }

    println!();
    print!("{}", report);
    if report.clear_count == 0 && report.sessions == 0 {
        println!();
        println!("{}", style("No activity recorded in this range.").dim());
    }
    println!();
    Ok(())
}
