// src/config/duration.rs

//! Duration strings: `500ms`, `30s`, `5m`, `2h`.

use chrono::TimeDelta;

/// Parse a duration string with a single unit suffix.
pub fn parse_duration(s: &str) -> Result<TimeDelta, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: i64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    let delta = match unit.as_str() {
        "ms" => TimeDelta::try_milliseconds(value),
        "s" => TimeDelta::try_seconds(value),
        "m" => TimeDelta::try_minutes(value),
        "h" => TimeDelta::try_hours(value),
        "d" => TimeDelta::try_days(value),
        _ => {
            return Err(format!(
                "unsupported duration unit '{}'; expected ms, s, m, h or d",
                unit
            ));
        }
    };
    delta.ok_or_else(|| format!("duration '{}' is out of range", s))
}

/// Inverse of [`parse_duration`] for display, using the largest exact unit.
pub fn format_duration(d: TimeDelta) -> String {
    let ms = d.num_milliseconds();
    if ms == 0 {
        return "0s".to_string();
    }
    if ms % 1000 != 0 {
        return format!("{ms}ms");
    }
    let secs = ms / 1000;
    for (unit, size) in [("d", 86_400), ("h", 3_600), ("m", 60)] {
        if secs % size == 0 {
            return format!("{}{unit}", secs / size);
        }
    }
    format!("{secs}s")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_unit() {
        assert_eq!(parse_duration("500ms").unwrap(), TimeDelta::milliseconds(500));
        assert_eq!(parse_duration("30s").unwrap(), TimeDelta::seconds(30));
        assert_eq!(parse_duration(" 5m ").unwrap(), TimeDelta::minutes(5));
        assert_eq!(parse_duration("2h").unwrap(), TimeDelta::hours(2));
        assert_eq!(parse_duration("7d").unwrap(), TimeDelta::days(7));
    }

    #[test]
    fn rejects_malformed() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("30").is_err());
        assert!(parse_duration("m5").is_err());
        assert!(parse_duration("3 weeks").is_err());
    }

    #[test]
    fn formats_with_largest_unit() {
        assert_eq!(format_duration(TimeDelta::minutes(90)), "90m");
        assert_eq!(format_duration(TimeDelta::hours(2)), "2h");
        assert_eq!(format_duration(TimeDelta::milliseconds(1500)), "1500ms");
        assert_eq!(format_duration(TimeDelta::seconds(45)), "45s");
    }
}
