use anyhow::Result;
use serde_json::json;

use crate::cli::output::OutputOptions;
use crate::cli::renderer;
use crate::core::error::MonitorError;
use crate::core::monitor::{Monitor, StatusOptions};

/// Print a JSON error object in json mode so scripted consumers always get
/// valid JSON on stdout, then exit non-zero.
fn fail(err: MonitorError, opts: &OutputOptions) -> Result<()> {
    if opts.is_json() {
        opts.print_json(&json!({ "error": err.to_string() }))?;
        std::process::exit(1);
    }
    Err(err.into())
}

pub async fn status(key_name: Option<String>, refresh: bool, opts: &OutputOptions) -> Result<()> {
    let monitor = Monitor::open_default()?;
    let status_opts = StatusOptions {
        api_key: None,
        key_name,
        refresh,
    };

    match monitor.get_status(&status_opts).await {
        Ok(snapshot) => {
            if opts.is_json() {
                opts.print_json(&snapshot)?;
            } else {
                println!("{}", renderer::render_status(&snapshot, opts.use_color));
            }
            Ok(())
        }
        Err(e) => fail(e, opts),
    }
}

pub async fn limits(key_name: Option<String>, opts: &OutputOptions) -> Result<()> {
    let monitor = Monitor::open_default()?;
    let status_opts = StatusOptions {
        api_key: None,
        key_name,
        refresh: false,
    };

    match monitor.get_limits(&status_opts).await {
        Ok(report) => {
            if opts.is_json() {
                opts.print_json(&report)?;
            } else {
                println!("{}", renderer::render_limits(&report, opts.use_color));
            }
            Ok(())
        }
        Err(e) => fail(e, opts),
    }
}
