use std::path::{Path, PathBuf};
use std::time::Duration;

use super::types::ParsedSchedule;

/// Schedule files larger than this are rejected outright rather than
/// parsed, to bound memory use against a malformed or hostile file.
const MAX_SCHEDULE_FILE_BYTES: u64 = 5 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ScheduleParseError {
    #[error("schedule file '{0}' not found")]
    NotFound(PathBuf),
    #[error("schedule file '{0}' is {1} bytes, exceeding the 5 MiB cap")]
    FileTooLarge(PathBuf, u64),
    #[error("schedule file '{0}' uses a non-default YAML tag ('{1}'), which is not permitted")]
    UnsafeTag(PathBuf, String),
    #[error("schedule file '{0}' is not valid YAML: {1}")]
    InvalidYaml(PathBuf, serde_yaml::Error),
    #[error("malformed directive in '{0}': {1}")]
    MalformedDirective(PathBuf, String),
}

/// Discover `{channel_number}.yml` under `schedules_dir`, read it,
/// reject unsafe YAML tags, and deserialize it into a `ParsedSchedule`.
pub fn load_schedule_file(
    schedules_dir: &Path,
    channel_number: &str,
) -> Result<ParsedSchedule, ScheduleParseError> {
    let path = schedules_dir.join(format!("{channel_number}.yml"));
    if !path.exists() {
        return Err(ScheduleParseError::NotFound(path));
    }

    let metadata =
        std::fs::metadata(&path).map_err(|_| ScheduleParseError::NotFound(path.clone()))?;
    if metadata.len() > MAX_SCHEDULE_FILE_BYTES {
        return Err(ScheduleParseError::FileTooLarge(path, metadata.len()));
    }

    let raw = std::fs::read_to_string(&path).map_err(|_| ScheduleParseError::NotFound(path.clone()))?;
    parse_schedule_str(&raw, &path)
}

/// Parse an in-memory YAML document. Split out from `load_schedule_file`
/// so tests can exercise the parser without touching the filesystem.
pub fn parse_schedule_str(raw: &str, path: &Path) -> Result<ParsedSchedule, ScheduleParseError> {
    if let Some(tag) = find_unsafe_tag(raw) {
        return Err(ScheduleParseError::UnsafeTag(path.to_path_buf(), tag));
    }

    serde_yaml::from_str(raw).map_err(|e| ScheduleParseError::InvalidYaml(path.to_path_buf(), e))
}

/// `serde_yaml` only natively supports the handful of core YAML tags
/// (`!!str`, `!!int`, ...); anything else is either a custom tag or an
/// explicit node tag (`!<...>`), neither of which this format allows.
/// `serde_yaml` doesn't expose a "reject custom tags" knob, so this
/// scans the raw text for the telltale syntax before handing it to the
/// deserializer.
fn find_unsafe_tag(raw: &str) -> Option<String> {
    const ALLOWED: &[&str] = &["!!str", "!!int", "!!float", "!!bool", "!!null", "!!seq", "!!map"];

    for line in raw.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with('#') {
            continue;
        }
        for token in trimmed.split_whitespace() {
            if (token.starts_with("!!") || token.starts_with("!<")) && !ALLOWED.contains(&token) {
                return Some(token.to_string());
            }
            if token.starts_with('!') && !token.starts_with("!!") && !token.starts_with("!<") && token.len() > 1 {
                return Some(token.to_string());
            }
        }
    }
    None
}

/// Parse a duration expressed in one of the four grammars the schedule
/// format accepts: `HH:MM:SS`, `MM:SS`, a bare seconds count with an
/// `s` suffix (`90s`), or an ISO-8601-ish `PT` duration (`PT1H30M`).
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();

    if let Some(rest) = raw.strip_prefix("PT").or_else(|| raw.strip_prefix("pt")) {
        return parse_iso_duration(rest);
    }

    if let Some(digits) = raw.strip_suffix('s').or_else(|| raw.strip_suffix('S')) {
        let secs: f64 = digits
            .parse()
            .map_err(|_| format!("invalid seconds duration '{raw}'"))?;
        return Ok(Duration::from_secs_f64(secs));
    }

    let parts: Vec<&str> = raw.split(':').collect();
    match parts.as_slice() {
        [h, m, s] => {
            let h: u64 = h.parse().map_err(|_| format!("invalid hours in '{raw}'"))?;
            let m: u64 = m.parse().map_err(|_| format!("invalid minutes in '{raw}'"))?;
            let s: f64 = s.parse().map_err(|_| format!("invalid seconds in '{raw}'"))?;
            Ok(Duration::from_secs(h * 3600 + m * 60) + Duration::from_secs_f64(s.fract()) + Duration::from_secs(s.trunc() as u64))
        }
        [m, s] => {
            let m: u64 = m.parse().map_err(|_| format!("invalid minutes in '{raw}'"))?;
            let s: f64 = s.parse().map_err(|_| format!("invalid seconds in '{raw}'"))?;
            Ok(Duration::from_secs(m * 60 + s.trunc() as u64) + Duration::from_secs_f64(s.fract()))
        }
        _ => Err(format!("unrecognized duration grammar '{raw}'")),
    }
}

fn parse_iso_duration(rest: &str) -> Result<Duration, String> {
    let mut total = Duration::ZERO;
    let mut number = String::new();

    for ch in rest.chars() {
        if ch.is_ascii_digit() || ch == '.' {
            number.push(ch);
            continue;
        }
        let value: f64 = number
            .parse()
            .map_err(|_| format!("invalid ISO-8601 duration 'PT{rest}'"))?;
        number.clear();
        let unit_secs = match ch {
            'H' | 'h' => 3600.0,
            'M' | 'm' => 60.0,
            'S' | 's' => 1.0,
            other => return Err(format!("unknown ISO-8601 duration unit '{other}' in 'PT{rest}'")),
        };
        total += Duration::from_secs_f64(value * unit_secs);
    }

    if !number.is_empty() {
        return Err(format!("trailing number with no unit in 'PT{rest}'"));
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hh_mm_ss() {
        assert_eq!(parse_duration("01:30:00").unwrap(), Duration::from_secs(5400));
    }

    #[test]
    fn parses_mm_ss() {
        assert_eq!(parse_duration("05:30").unwrap(), Duration::from_secs(330));
    }

    #[test]
    fn parses_seconds_suffix() {
        assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
    }

    #[test]
    fn parses_iso8601_duration() {
        assert_eq!(parse_duration("PT1H30M").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("PT45S").unwrap(), Duration::from_secs(45));
    }

    #[test]
    fn rejects_garbage_duration() {
        assert!(parse_duration("banana").is_err());
    }

    #[test]
    fn rejects_custom_yaml_tag() {
        let raw = "name: test\nplayout:\n  - !Evil foo\n";
        let err = parse_schedule_str(raw, Path::new("1.yml")).unwrap_err();
        assert!(matches!(err, ScheduleParseError::UnsafeTag(_, _)));
    }

    #[test]
    fn file_too_large_is_rejected_before_parse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1.yml");
        std::fs::write(&path, vec![b'a'; (MAX_SCHEDULE_FILE_BYTES + 1) as usize]).unwrap();
        let err = load_schedule_file(dir.path(), "1").unwrap_err();
        assert!(matches!(err, ScheduleParseError::FileTooLarge(_, _)));
    }
}
