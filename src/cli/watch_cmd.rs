use anyhow::Result;
use chrono::Local;
use colored::{control, Colorize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::cli::output::OutputOptions;
use crate::core::models::snapshot::{HealthStatus, StatusSnapshot};
use crate::core::monitor::{Monitor, MonitorOptions, StatusOptions};
use crate::core::watch::{WatchEvents, MAX_CONSECUTIVE_ERRORS};

fn status_line(snapshot: &StatusSnapshot) -> String {
    let (icon, text) = match snapshot.health.status {
        HealthStatus::Healthy => ("✓", "Healthy"),
        HealthStatus::Warning => ("⚠", "Warning"),
        HealthStatus::Critical => ("✗", "Critical"),
        HealthStatus::Unknown => ("?", "Unknown"),
    };

    let rate = match snapshot.rate_limit.used {
        Some(used) => format!("{}/{}", used, snapshot.rate_limit.limit),
        None => format!("~/{}", snapshot.rate_limit.limit),
    };

    let daily = match snapshot.daily_limit.limit {
        Some(limit) => {
            let used = snapshot
                .daily_limit
                .local_tracked
                .as_ref()
                .map(|q| q.used.to_string())
                .unwrap_or_else(|| "?".to_string());
            format!("{}/{}", used, limit)
        }
        None => "∞".to_string(),
    };

    format!(
        "[{}] {} {} - Rate: {} ({}%) | Daily: {} | Used: ${:.2} | Left: ${:.2}",
        Local::now().format("%H:%M:%S"),
        icon,
        text,
        rate,
        snapshot.health.percentage,
        daily,
        snapshot.usage.credits_used,
        snapshot.usage.remaining_credits,
    )
}

pub async fn run(
    key_name: Option<String>,
    interval: Option<u64>,
    warn_threshold: Option<u8>,
    alert_threshold: Option<u8>,
    opts: &OutputOptions,
) -> Result<()> {
    let monitor = Monitor::open_default()?;
    control::set_override(opts.use_color);

    let config = monitor.config();
    let effective_interval = interval.unwrap_or(config.interval);
    let effective_warn = warn_threshold.unwrap_or(config.warn_threshold);
    let effective_alert = alert_threshold.unwrap_or(config.alert_threshold);

    let json_mode = opts.is_json();
    if !json_mode {
        println!("{}", "OpenRouter usage monitor".blue().bold());
        println!("{}", format!("  interval         {}s", effective_interval).dimmed());
        println!("{}", format!("  warn threshold   {}%", effective_warn).dimmed());
        println!("{}", format!("  alert threshold  {}%", effective_alert).dimmed());
        println!("{}", "  press Ctrl+C to stop".dimmed());
        println!("{}", "─".repeat(60));
    }

    let fatal = Arc::new(AtomicBool::new(false));
    let fatal_flag = Arc::clone(&fatal);

    let events = WatchEvents {
        on_status: Box::new(move |snapshot| {
            if json_mode {
                if let Ok(line) = serde_json::to_string(snapshot) {
                    println!("{}", line);
                }
            } else {
                let line = status_line(snapshot);
                let colored_line = match snapshot.health.status {
                    HealthStatus::Healthy => line.green(),
                    HealthStatus::Warning => line.yellow(),
                    HealthStatus::Critical => line.red(),
                    HealthStatus::Unknown => line.dimmed(),
                };
                println!("{}", colored_line);
            }
        }),
        on_warning: Box::new(move |_, usage| {
            if !json_mode {
                eprintln!(
                    "{}",
                    format!(
                        "⚠ [{}] usage reached warning level ({}%)",
                        Local::now().format("%H:%M:%S"),
                        usage
                    )
                    .yellow()
                );
            }
        }),
        on_alert: Box::new(move |_, usage| {
            eprintln!(
                "{}",
                format!(
                    "🚨 [{}] usage reached alert level ({}%)",
                    Local::now().format("%H:%M:%S"),
                    usage
                )
                .red()
                .bold()
            );
        }),
        on_error: Box::new(move |err, count| {
            let hint = if err.is_retryable() {
                "will retry"
            } else {
                "check your key"
            };
            eprintln!(
                "{}",
                format!(
                    "✗ [{}] check failed ({}/{}): {} ({})",
                    Local::now().format("%H:%M:%S"),
                    count,
                    MAX_CONSECUTIVE_ERRORS,
                    err,
                    hint
                )
                .red()
            );
        }),
        on_fatal: Box::new(move |count| {
            fatal_flag.store(true, Ordering::SeqCst);
            eprintln!(
                "{}",
                format!("🚨 {} consecutive failures; stopping monitor", count)
                    .red()
                    .bold()
            );
        }),
    };

    let controller = monitor.start_monitoring(MonitorOptions {
        status: StatusOptions {
            api_key: None,
            key_name,
            refresh: false,
        },
        interval: Some(effective_interval),
        warn_threshold: Some(effective_warn),
        alert_threshold: Some(effective_alert),
        events,
    })?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            if !json_mode {
                eprintln!("\n{}", "shutting down...".yellow());
            }
            controller.stop();
        }
        _ = controller.done() => {}
    }
    controller.join().await;

    if fatal.load(Ordering::SeqCst) {
        anyhow::bail!(
            "monitoring stopped after {} consecutive failures",
            MAX_CONSECUTIVE_ERRORS
        );
    }
    Ok(())
}
