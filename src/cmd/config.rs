//! Configuration view and validation commands: `ctxwatch config`.

use anyhow::Result;
use std::path::Path;

use super::super::ConfigCommands;
use super::load_config;

pub fn cmd_config(data_dir: &Path, command: Option<ConfigCommands>) -> Result<()> {
    use ctxwatch::config::CONFIG_FILE_NAME;

    let config_path = data_dir.join(CONFIG_FILE_NAME);
    let config = load_config(data_dir)?;

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("ctxwatch Configuration");
            println!("======================");
            println!();
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No {} found; using defaults.", CONFIG_FILE_NAME);
            }
            println!();
            print!("{}", config.to_toml_string()?);
            println!();
            println!("Effective thresholds:");
            println!("  warning   = {}", config.capacity.warning_threshold());
            println!("  emergency = {}", config.capacity.emergency_threshold());
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
    }

    Ok(())
}
