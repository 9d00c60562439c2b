use anyhow::Result;

use crate::cli::output::OutputOptions;
use crate::core::config::{config_dir, Config};

pub fn init(_opts: &OutputOptions) -> Result<()> {
    let dir = config_dir();
    let path = Config::default().save_to(&dir)?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}

pub fn get(field: Option<String>, opts: &OutputOptions) -> Result<()> {
    let config = Config::load()?;

    match field {
        Some(field) => match config.get_field(&field) {
            Some(value) => {
                println!("{}", value);
                Ok(())
            }
            None => anyhow::bail!("Unknown config field: '{}'", field),
        },
        None => {
            if opts.is_json() {
                opts.print_json(&config)?;
            } else {
                println!("interval                = {}", config.interval);
                println!("warn_threshold          = {}", config.warn_threshold);
                println!("alert_threshold         = {}", config.alert_threshold);
                println!("output_format           = {}", config.output_format);
                println!("history_retention_days  = {}", config.history_retention_days);
                println!(
                    "default_key             = {}",
                    config.default_key.as_deref().unwrap_or("(unset)")
                );
            }
            Ok(())
        }
    }
}

pub fn set(field: &str, value: &str, _opts: &OutputOptions) -> Result<()> {
    let dir = config_dir();
    let mut config = Config::load_from(&dir)?;
    config.set_field(field, value)?;

    let issues = config.validate();
    if !issues.is_empty() {
        anyhow::bail!("Refusing to save invalid config: {}", issues.join("; "));
    }

    config.save_to(&dir)?;
    println!("Set {} = {}", field, value);
    Ok(())
}

pub fn reset(_opts: &OutputOptions) -> Result<()> {
    let dir = config_dir();
    Config::default().save_to(&dir)?;
    println!("Config reset to defaults");
    Ok(())
}

pub fn check(_opts: &OutputOptions) -> Result<()> {
    let config = Config::load()?;
    let issues = config.validate();
    if issues.is_empty() {
        println!("Config OK");
        Ok(())
    } else {
        for issue in &issues {
            eprintln!("  - {}", issue);
        }
        anyhow::bail!("{} config issue(s) found", issues.len());
    }
}
