//! Time parsing utilities for SLURM values.

use std::time::Duration;

/// Parse a duration as printed by sacct/squeue.
///
/// Supports:
/// - D-HH:MM:SS
/// - HH:MM:SS
/// - MM:SS
/// - Seconds as integer
///
/// Fractional seconds ("01:30:00.123") are truncated.
/// Returns None for "UNLIMITED", "INVALID" or empty strings.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() || s == "UNLIMITED" || s == "INVALID" || s == "-" {
        return None;
    }
    let s = s.split('.').next().unwrap_or(s);

    let (days, time_part) = match s.split_once('-') {
        Some((d, rest)) => (d.parse::<u64>().ok()?, rest),
        None => (0, s),
    };

    let time_parts = time_part
        .split(':')
        .map(|p| p.parse::<u64>().ok())
        .collect::<Option<Vec<u64>>>()?;

    let seconds = match time_parts.as_slice() {
        [h, m, s] => h * 3600 + m * 60 + s,
        [m, s] => m * 60 + s,
        [s] => *s,
        _ => return None,
    };

    Some(Duration::from_secs(days * 86400 + seconds))
}

/// Like `parse_duration` but returns seconds as u64.
pub fn parse_duration_secs(s: &str) -> Option<u64> {
    parse_duration(s).map(|d| d.as_secs())
}

/// Parse a `--time` value with sbatch semantics.
///
/// Accepted forms: "minutes", "minutes:seconds", "hours:minutes:seconds",
/// "days-hours", "days-hours:minutes" and "days-hours:minutes:seconds".
/// A bare number means minutes, unlike sacct output.
pub fn parse_time_limit(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let parse_parts = |part: &str| {
        part.split(':')
            .map(|p| p.parse::<u64>().ok())
            .collect::<Option<Vec<u64>>>()
    };

    let seconds = match s.split_once('-') {
        Some((days, rest)) => {
            let days = days.parse::<u64>().ok()?;
            let hms = match parse_parts(rest)?.as_slice() {
                [h] => h * 3600,
                [h, m] => h * 3600 + m * 60,
                [h, m, s] => h * 3600 + m * 60 + s,
                _ => return None,
            };
            days * 86400 + hms
        }
        None => match parse_parts(s)?.as_slice() {
            [m] => m * 60,
            [m, s] => m * 60 + s,
            [h, m, s] => h * 3600 + m * 60 + s,
            _ => return None,
        },
    };

    if seconds == 0 {
        return None;
    }
    Some(Duration::from_secs(seconds))
}

/// Parse exit code from SLURM format (exit_code:signal).
///
/// Returns the exit code portion, defaulting to 0 if parsing fails.
pub fn parse_exit_code(s: &str) -> i32 {
    s.split(':')
        .next()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

/// Format seconds as human-readable duration (e.g., "1d 02:30:00", "01:30:00", "05:30").
pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let mins = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours >= 24 {
        format!("{}d {:02}:{:02}:{:02}", hours / 24, hours % 24, mins, secs)
    } else if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, mins, secs)
    } else {
        format!("{:02}:{:02}", mins, secs)
    }
}

/// Format seconds as SLURM duration format (D-HH:MM:SS).
pub fn format_duration_slurm(seconds: u64) -> String {
    let days = seconds / 86400;
    let hours = (seconds % 86400) / 3600;
    let mins = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if days > 0 {
        format!("{}-{:02}:{:02}:{:02}", days, hours, mins, secs)
    } else {
        format!("{:02}:{:02}:{:02}", hours, mins, secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("1:00:00"), Some(Duration::from_secs(3600)));
        assert_eq!(
            parse_duration("1-00:00:00"),
            Some(Duration::from_secs(86400))
        );
        assert_eq!(parse_duration("30:00"), Some(Duration::from_secs(1800)));
        assert_eq!(parse_duration("3600"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("00:01:02.345"), Some(Duration::from_secs(62)));
        assert!(parse_duration("UNLIMITED").is_none());
        assert!(parse_duration("-").is_none());
        assert!(parse_duration("1:xx").is_none());
    }

    #[test]
    fn test_parse_time_limit() {
        assert_eq!(parse_time_limit("60"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_time_limit("90:30"), Some(Duration::from_secs(5430)));
        assert_eq!(
            parse_time_limit("24:00:00"),
            Some(Duration::from_secs(86400))
        );
        assert_eq!(parse_time_limit("2-12"), Some(Duration::from_secs(216000)));
        assert_eq!(
            parse_time_limit("1-01:30"),
            Some(Duration::from_secs(91800))
        );
        assert_eq!(
            parse_time_limit("1-00:00:10"),
            Some(Duration::from_secs(86410))
        );
        assert!(parse_time_limit("0").is_none());
        assert!(parse_time_limit("").is_none());
        assert!(parse_time_limit("forever").is_none());
    }

    #[test]
    fn test_parse_exit_code() {
        assert_eq!(parse_exit_code("0:0"), 0);
        assert_eq!(parse_exit_code("1:0"), 1);
        assert_eq!(parse_exit_code("137:9"), 137);
        assert_eq!(parse_exit_code(""), 0);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(330), "05:30");
        assert_eq!(format_duration(5400), "01:30:00");
        assert_eq!(format_duration(86400 + 9000), "1d 02:30:00");
    }

    #[test]
    fn test_format_duration_slurm() {
        assert_eq!(format_duration_slurm(3600), "01:00:00");
        assert_eq!(format_duration_slurm(86400 + 61), "1-00:01:01");
    }
}
