use anyhow::Result;

use crate::cli::output::OutputOptions;
use crate::cli::renderer;
use crate::core::models::records::{AlertQuery, ClearOptions, HistoryQuery};
use crate::core::monitor::Monitor;

/// Resolve a named key to its raw value for per-key filtering.
fn resolve_filter_key(monitor: &Monitor, name: Option<&str>) -> Result<Option<String>> {
    match name {
        Some(name) => Ok(Some(monitor.keys().get(name)?.key)),
        None => Ok(None),
    }
}

pub fn show(
    days: u32,
    limit: Option<usize>,
    key_name: Option<String>,
    opts: &OutputOptions,
) -> Result<()> {
    let monitor = Monitor::open_default()?;
    let records = monitor.get_history(&HistoryQuery {
        since_days: days,
        api_key: resolve_filter_key(&monitor, key_name.as_deref())?,
        limit,
    });

    if opts.is_json() {
        opts.print_json(&records)?;
    } else {
        println!("{}", renderer::render_history(&records, opts.use_color));
    }
    Ok(())
}

pub fn alerts(days: u32, key_name: Option<String>, opts: &OutputOptions) -> Result<()> {
    let monitor = Monitor::open_default()?;
    let records = monitor.get_alerts(&AlertQuery {
        since_days: days,
        api_key: resolve_filter_key(&monitor, key_name.as_deref())?,
        alert_type: None,
        limit: None,
    });

    if opts.is_json() {
        opts.print_json(&records)?;
    } else {
        println!("{}", renderer::render_alerts(&records, opts.use_color));
    }
    Ok(())
}

pub fn clear(
    older_than_days: Option<u32>,
    key_name: Option<String>,
    opts: &OutputOptions,
) -> Result<()> {
    let monitor = Monitor::open_default()?;
    let deleted = monitor.clear_history(&ClearOptions {
        older_than_days,
        api_key: resolve_filter_key(&monitor, key_name.as_deref())?,
    });

    if opts.is_json() {
        opts.print_json(&serde_json::json!({ "deleted": deleted }))?;
    } else {
        println!("Deleted {} records", deleted);
    }
    Ok(())
}

pub fn stats(days: u32, key_name: Option<String>, opts: &OutputOptions) -> Result<()> {
    let monitor = Monitor::open_default()?;
    let filter_key = resolve_filter_key(&monitor, key_name.as_deref())?;
    let stats = monitor.statistics(days, filter_key.as_deref());

    if opts.is_json() {
        opts.print_json(&stats)?;
    } else {
        println!("{}", renderer::render_statistics(&stats));
    }
    Ok(())
}
