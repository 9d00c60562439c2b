use anyhow::Result;

use crate::cli::output::OutputOptions;
use crate::cli::renderer;
use crate::core::monitor::{Monitor, StatusOptions};

pub fn add(name: &str, key: &str, _opts: &OutputOptions) -> Result<()> {
    let monitor = Monitor::open_default()?;
    monitor.keys().add(name, key)?;
    println!("Stored API key '{}'", name);
    Ok(())
}

pub fn remove(name: &str, _opts: &OutputOptions) -> Result<()> {
    let monitor = Monitor::open_default()?;
    if monitor.keys().remove(name)? {
        println!("Removed API key '{}'", name);
    } else {
        anyhow::bail!("No API key named '{}'", name);
    }
    Ok(())
}

pub fn list(opts: &OutputOptions) -> Result<()> {
    let monitor = Monitor::open_default()?;
    let infos = monitor.keys().list()?;
    if opts.is_json() {
        opts.print_json(&infos)?;
    } else {
        println!("{}", renderer::render_keys(&infos));
    }
    Ok(())
}

/// Probe a stored key (or the resolved default) against the live API.
pub async fn test(name: Option<String>, opts: &OutputOptions) -> Result<()> {
    let monitor = Monitor::open_default()?;
    let api_key = monitor.resolve_api_key(&StatusOptions {
        api_key: None,
        key_name: name,
        refresh: false,
    })?;

    let report = monitor.test_api_key(&api_key).await;
    if opts.is_json() {
        opts.print_json(&report)?;
    } else {
        println!("{}", renderer::render_key_test(&report, opts.use_color));
    }
    if !report.valid {
        std::process::exit(1);
    }
    Ok(())
}
