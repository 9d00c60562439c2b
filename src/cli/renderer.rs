use colored::{control, ColoredString, Colorize};

use crate::core::formatter::{format_reset_countdown, format_usage_bar, format_usd};
use crate::core::fetcher::KeyTestReport;
use crate::core::keys::KeyInfo;
use crate::core::models::records::{AlertRecord, HistoryRecord, HistoryStatistics};
use crate::core::models::snapshot::{HealthStatus, StatusSnapshot};
use crate::core::monitor::{LimitsReport, RiskLevel};
use crate::core::tracker::{RequestStats, TodayStats};

const BAR_WIDTH: usize = 12;

fn health_icon(status: HealthStatus) -> &'static str {
    match status {
        HealthStatus::Healthy => "✓",
        HealthStatus::Warning => "⚠",
        HealthStatus::Critical => "✗",
        HealthStatus::Unknown => "?",
    }
}

fn health_colored(status: HealthStatus, text: &str) -> ColoredString {
    match status {
        HealthStatus::Healthy => text.green(),
        HealthStatus::Warning => text.yellow(),
        HealthStatus::Critical => text.red(),
        HealthStatus::Unknown => text.dimmed(),
    }
}

fn rate_line(snapshot: &StatusSnapshot) -> String {
    match (snapshot.rate_limit.used, snapshot.rate_limit.remaining) {
        (Some(used), Some(_)) => {
            let percent = if snapshot.rate_limit.limit > 0 {
                f64::from(used) / f64::from(snapshot.rate_limit.limit) * 100.0
            } else {
                0.0
            };
            format!(
                "{}/{} ({}%) {}",
                used,
                snapshot.rate_limit.limit,
                percent.round() as u64,
                format_usage_bar(percent, BAR_WIDTH)
            )
        }
        _ => format!(
            "~/{} per {} (no live counters)",
            snapshot.rate_limit.limit, snapshot.rate_limit.interval
        ),
    }
}

fn daily_line(snapshot: &StatusSnapshot) -> String {
    match snapshot.daily_limit.limit {
        Some(limit) => match &snapshot.daily_limit.local_tracked {
            Some(quota) => {
                let percent = f64::from(quota.percentage);
                format!(
                    "{}/{} tracked locally ({}%) {}",
                    quota.used,
                    limit,
                    quota.percentage,
                    format_usage_bar(percent, BAR_WIDTH)
                )
            }
            None => format!("?/{} (run `ormon record` to track locally)", limit),
        },
        None => "∞ (no daily limit)".to_string(),
    }
}

/// Render a full status block as a colored (or plain) string.
pub fn render_status(snapshot: &StatusSnapshot, use_color: bool) -> String {
    control::set_override(use_color);

    let mut lines: Vec<String> = Vec::new();
    lines.push(format!(
        " {} {}",
        "OpenRouter".bold(),
        snapshot.api_key_masked.dimmed()
    ));
    lines.push(format!("  {:<9} {}", "Tier", snapshot.tier.name));
    lines.push(format!(
        "  {:<9} used {} | left {}",
        "Credits",
        format_usd(snapshot.usage.credits_used),
        format_usd(snapshot.usage.remaining_credits)
    ));
    lines.push(format!("  {:<9} {}", "", snapshot.usage.note.dimmed()));

    lines.push(format!("  {:<9} {}", "Rate", rate_line(snapshot)));
    lines.push(format!(
        "  {:<9} {}",
        "",
        format_reset_countdown(&snapshot.rate_limit.reset_at).dimmed()
    ));

    lines.push(format!("  {:<9} {}", "Daily", daily_line(snapshot)));
    lines.push(format!(
        "  {:<9} {}",
        "",
        format!(
            "{} · {}",
            snapshot.daily_limit.note,
            format_reset_countdown(&snapshot.daily_limit.reset_at)
        )
        .dimmed()
    ));

    if let Some(limit) = snapshot.monthly_limit.limit {
        lines.push(format!(
            "  {:<9} {} of {} · {}",
            "Monthly",
            format_usd(snapshot.monthly_limit.used),
            format_usd(limit),
            format_reset_countdown(&snapshot.monthly_limit.reset_at)
        ));
    }

    let health_text = format!(
        "{} {} - {}",
        health_icon(snapshot.health.status),
        snapshot.health.status,
        snapshot.health.message
    );
    lines.push(format!(
        "  {:<9} {}",
        "Health",
        health_colored(snapshot.health.status, &health_text)
    ));

    lines.join("\n")
}

pub fn render_limits(report: &LimitsReport, use_color: bool) -> String {
    control::set_override(use_color);

    let mut text = render_status(&report.snapshot, use_color);
    text.push('\n');
    let risk = match report.analysis.risk_level {
        RiskLevel::Low => "low".green(),
        RiskLevel::High => "high".red().bold(),
    };
    text.push_str(&format!("  {:<9} {}", "Risk", risk));
    for recommendation in &report.analysis.recommendations {
        text.push_str(&format!("\n  {:<9} {}", "", recommendation.yellow()));
    }
    text
}

/// One line per monitoring cycle, newest first.
pub fn render_history(records: &[HistoryRecord], use_color: bool) -> String {
    control::set_override(use_color);

    if records.is_empty() {
        return "No history recorded yet.".to_string();
    }

    let mut lines = vec![format!(
        " {:<20} {:<9} {:>5} {:>12} {:>12} {:<6}",
        "Timestamp", "Health", "%", "Rate", "Daily", "Tier"
    )
    .bold()
    .to_string()];

    for record in records {
        let rate = match record.rate_used {
            Some(used) => format!("{}/{}", used, record.rate_limit),
            None => format!("~/{}", record.rate_limit),
        };
        let daily = match (record.daily_used, record.daily_limit) {
            (Some(used), Some(limit)) => format!("{}/{}", used, limit),
            (None, Some(limit)) => format!("?/{}", limit),
            _ => "∞".to_string(),
        };
        let line = format!(
            " {:<20} {:<9} {:>4}% {:>12} {:>12} {:<6}",
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            record.health_status.to_string(),
            record.health_percentage,
            rate,
            daily,
            record.tier.to_string(),
        );
        lines.push(health_colored(record.health_status, &line).to_string());
    }

    lines.join("\n")
}

pub fn render_alerts(records: &[AlertRecord], use_color: bool) -> String {
    control::set_override(use_color);

    if records.is_empty() {
        return "No alerts recorded.".to_string();
    }

    let mut lines = Vec::new();
    for record in records {
        let label = match record.alert_type {
            crate::core::models::records::AlertType::Alert => "ALERT".red().bold(),
            crate::core::models::records::AlertType::Warning => "WARN ".yellow(),
        };
        lines.push(format!(
            " {} {} {} (threshold {}%, actual {}%)",
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            label,
            record.message,
            record.threshold_value,
            record.actual_value
        ));
    }
    lines.join("\n")
}

pub fn render_statistics(stats: &HistoryStatistics) -> String {
    format!(
        " Records      {}\n Avg credits  {}\n Max credits  {}\n Avg health   {:.0}%\n Warnings     {}\n Alerts       {}",
        stats.total_records,
        format_usd(stats.avg_credits_used),
        format_usd(stats.max_credits_used),
        stats.avg_health_percentage,
        stats.warning_count,
        stats.alert_count
    )
}

pub fn render_keys(infos: &[KeyInfo]) -> String {
    if infos.is_empty() {
        return "No API keys stored. Add one with `ormon keys add <name> <key>`.".to_string();
    }

    let mut lines = vec![format!(" {:<16} {:<24} {:<24}", "Name", "Created", "Last used")];
    for info in infos {
        lines.push(format!(
            " {:<16} {:<24} {:<24}",
            info.name,
            info.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            info.last_used
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "never".to_string()),
        ));
    }
    lines.join("\n")
}

pub fn render_key_test(report: &KeyTestReport, use_color: bool) -> String {
    control::set_override(use_color);

    if report.valid {
        let mut text = format!("{}", "✓ API key is valid".green());
        if let Some(snapshot) = &report.snapshot {
            text.push('\n');
            text.push_str(&render_status(snapshot, use_color));
        }
        text
    } else {
        format!(
            "{}\n  {}",
            "✗ API key is invalid".red(),
            report.error.as_deref().unwrap_or("unknown error")
        )
    }
}

pub fn render_request_stats(stats: &RequestStats) -> String {
    let mut lines = vec![format!(
        " {} requests over the last {} days (avg {}/day)",
        stats.total_requests, stats.total_days, stats.average_per_day
    )];
    for (date, count) in stats.daily_breakdown.iter().rev() {
        lines.push(format!("  {}  {}", date, count));
    }
    lines.join("\n")
}

pub fn render_today(stats: &TodayStats) -> String {
    let mut lines = vec![format!(
        " {} requests today ({})",
        stats.total_requests, stats.date
    )];
    let mut models: Vec<_> = stats.models.iter().collect();
    models.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
    for (model, count) in models {
        lines.push(format!("  {:<40} {}", model, count));
    }
    lines.join("\n")
}
