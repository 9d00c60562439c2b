use anyhow::Result;

use crate::cli::output::OutputOptions;
use crate::cli::renderer;
use crate::core::monitor::{Monitor, StatusOptions};

/// Count one request against today's local quota.
pub fn record(key_name: Option<String>, model: Option<String>, opts: &OutputOptions) -> Result<()> {
    let monitor = Monitor::open_default()?;
    let status_opts = StatusOptions {
        api_key: None,
        key_name,
        refresh: false,
    };
    let model = model.unwrap_or_else(|| "unknown".to_string());
    let key_total = monitor.record_request(&status_opts, &model)?;

    let today = monitor.today_details();
    if opts.is_json() {
        opts.print_json(&today)?;
    } else {
        println!(
            "Recorded request for {} ({} today on this key, {} overall)",
            model, key_total, today.total_requests
        );
    }
    Ok(())
}

pub fn stats(days: u32, opts: &OutputOptions) -> Result<()> {
    let monitor = Monitor::open_default()?;
    let stats = monitor.request_stats(days);
    let today = monitor.today_details();

    if opts.is_json() {
        opts.print_json(&serde_json::json!({ "window": stats, "today": today }))?;
    } else {
        println!("{}", renderer::render_request_stats(&stats));
        if today.total_requests > 0 {
            println!();
            println!("{}", renderer::render_today(&today));
        }
    }
    Ok(())
}
