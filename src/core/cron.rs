//! Crontab entry for the scheduled backup
//!
//! Only plain schedules are accepted: five fields, each `*` or a number in
//! the field's range. Anything else falls back to the default schedule.

use tracing::warn;

use crate::core::config::Config;
use crate::utils::DEFAULT_CRON_SCHEDULE;

/// (name, min, max) for minute, hour, day of month, month, day of week
const FIELDS: [(&str, u32, u32); 5] = [
    ("minute", 0, 59),
    ("hour", 0, 23),
    ("day", 1, 31),
    ("month", 1, 12),
    ("weekday", 0, 6),
];

/// `<schedule> <command>\n`
pub fn generate_crontab(config: &Config) -> String {
    let command = config.cron_command.trim();

    let schedule = match config.cron_schedule.as_deref().map(|s| strip_quotes(s.trim())) {
        Some(schedule) if validate_schedule(schedule) => schedule,
        Some(schedule) => {
            warn!("Invalid CRON_SCHEDULE '{}', using {}", schedule, DEFAULT_CRON_SCHEDULE);
            DEFAULT_CRON_SCHEDULE
        }
        None => DEFAULT_CRON_SCHEDULE,
    };

    format!("{} {}\n", schedule, command)
}

pub fn validate_schedule(schedule: &str) -> bool {
    let parts: Vec<&str> = schedule.split_whitespace().collect();
    if parts.len() != FIELDS.len() {
        return false;
    }

    parts
        .iter()
        .zip(FIELDS.iter())
        .all(|(value, (_, min, max))| validate_field(value, *min, *max))
}

fn validate_field(value: &str, min: u32, max: u32) -> bool {
    if value == "*" {
        return true;
    }
    if !value.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    value
        .parse::<u32>()
        .map(|n| (min..=max).contains(&n))
        .unwrap_or(false)
}

/// Strip one enclosing single or double quote on either end
pub fn strip_quotes(value: &str) -> &str {
    let value = value.strip_prefix(['"', '\'']).unwrap_or(value);
    value.strip_suffix(['"', '\'']).unwrap_or(value)
}
