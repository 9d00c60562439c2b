use chrono::{DateTime, Utc};

/// Returns "[███░░░░░░░░░]" where █ marks the used portion.
/// Width is the number of block characters inside the brackets.
pub fn format_usage_bar(used_percent: f64, width: usize) -> String {
    let used_percent = used_percent.clamp(0.0, 100.0);
    let used_blocks = ((used_percent / 100.0) * width as f64).round() as usize;
    let remaining_blocks = width.saturating_sub(used_blocks);

    let used: String = "█".repeat(used_blocks);
    let free: String = "░".repeat(remaining_blocks);
    format!("[{}{}]", used, free)
}

/// Returns "resets in Xh Ym" relative to now, degrading to minutes or days
/// as appropriate. Past instants render as "resets now".
pub fn format_reset_countdown(resets_at: &DateTime<Utc>) -> String {
    let total_seconds = (*resets_at - Utc::now()).num_seconds();
    if total_seconds <= 0 {
        return "resets now".to_string();
    }
    if total_seconds < 60 {
        return format!("resets in {}s", total_seconds);
    }

    let total_minutes = total_seconds / 60;
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;

    if hours >= 24 {
        let days = hours / 24;
        let rest = hours % 24;
        if rest == 0 {
            format!("resets in {}d", days)
        } else {
            format!("resets in {}d {}h", days, rest)
        }
    } else if hours > 0 {
        format!("resets in {}h {}m", hours, minutes)
    } else {
        format!("resets in {}m", total_minutes)
    }
}

/// Returns "$3.50" with two decimals.
pub fn format_usd(amount: f64) -> String {
    format!("${:.2}", amount)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn usage_bar_fills_used_portion() {
        assert_eq!(format_usage_bar(0.0, 12), "[░░░░░░░░░░░░]");
        assert_eq!(format_usage_bar(100.0, 12), "[████████████]");
        assert_eq!(format_usage_bar(50.0, 12), "[██████░░░░░░]");
        assert_eq!(format_usage_bar(150.0, 12), "[████████████]");
    }

    #[test]
    fn countdown_past_is_now() {
        let past = Utc::now() - Duration::seconds(5);
        assert_eq!(format_reset_countdown(&past), "resets now");
    }

    #[test]
    fn countdown_seconds() {
        let soon = Utc::now() + Duration::seconds(30);
        let text = format_reset_countdown(&soon);
        assert!(text.starts_with("resets in "));
        assert!(text.ends_with('s'));
    }

    #[test]
    fn countdown_hours_and_minutes() {
        let later = Utc::now() + Duration::minutes(135);
        let text = format_reset_countdown(&later);
        assert!(text.contains('h'));
        assert!(text.contains('m'));
    }

    #[test]
    fn countdown_days() {
        let later = Utc::now() + Duration::hours(26);
        assert!(format_reset_countdown(&later).contains('d'));
    }

    #[test]
    fn usd_two_decimals() {
        assert_eq!(format_usd(3.5), "$3.50");
        assert_eq!(format_usd(0.0), "$0.00");
        assert_eq!(format_usd(11.456), "$11.46");
    }
}
