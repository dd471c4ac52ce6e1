//! Config Command
//!
//! Manage ReportFlow configuration.
//!
//! Usage:
//!   reportflow config show [-g] [-f json]
//!   reportflow config path
//!   reportflow config init [-g] [--force]

use crate::cli::ui::Output;
use crate::config::ConfigLoader;
use crate::types::Result;

/// Show configuration
pub fn show(global: bool, format: &str) -> Result<()> {
    let as_json = format == "json";

    if global {
        match ConfigLoader::global_config_path() {
            Some(global_path) if global_path.exists() => {
                let config = ConfigLoader::load_from_file(&global_path)?;
                println!("# Global Config: {}\n", global_path.display());
                println!("{}", ConfigLoader::render(&config, as_json)?);
            }
            Some(_) => {
                println!("No global config found.");
                println!("Run 'reportflow config init --global' to create one.");
            }
            None => println!("Cannot determine global config directory."),
        }
    } else {
        // Merged effective config
        ConfigLoader::show_config(as_json)?;
    }
    Ok(())
}

/// Show configuration paths
pub fn path() -> Result<()> {
    ConfigLoader::show_path();
    Ok(())
}

/// Write a default config file
pub fn init(global: bool, force: bool) -> Result<()> {
    let path = if global {
        ConfigLoader::init_global(force)?
    } else {
        ConfigLoader::init_project(force)?
    };

    let scope = if global { "global" } else { "project" };
    Output::new().success(&format!("Initialized {} configuration", scope));
    println!("  Config: {}", path.display());
    Ok(())
}
