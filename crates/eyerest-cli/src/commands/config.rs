use std::path::{Path, PathBuf};

use clap::Subcommand;
use eyerest_core::{ConfigError, Settings};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the settings file location
    Path,
    /// Print the effective settings as JSON
    Show,
    /// Validate the settings file and list every problem
    Check,
    /// Reset settings to defaults
    Reset,
}

fn resolve(file: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
    match file {
        Some(path) => Ok(path),
        None => Settings::path(),
    }
}

fn check(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        println!("no settings file at {}, defaults apply", path.display());
        return Ok(());
    }
    match Settings::load_from(path) {
        Ok(_) => {
            println!("ok");
            Ok(())
        }
        Err(ConfigError::Invalid(errors)) => {
            for error in &errors {
                eprintln!("  {error}");
            }
            Err(format!("{} invalid setting(s) in {}", errors.len(), path.display()).into())
        }
        Err(e) => Err(e.into()),
    }
}

pub fn run(action: ConfigAction, file: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let path = resolve(file)?;
    match action {
        ConfigAction::Path => {
            println!("{}", path.display());
        }
        ConfigAction::Show => {
            let settings = Settings::load_from(&path)?;
            let json = serde_json::to_string_pretty(&settings.to_file())?;
            println!("{json}");
        }
        ConfigAction::Check => check(&path)?,
        ConfigAction::Reset => {
            Settings::default().save_to(&path)?;
            println!("settings reset to defaults");
        }
    }
    Ok(())
}
