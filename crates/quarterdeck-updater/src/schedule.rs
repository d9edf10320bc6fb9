use chrono::{DateTime, Timelike, Utc};

/// Resolve a symbolic update-check cadence into a concrete cron expression.
///
/// Returns `None` when checking is disabled (`"@never"` or empty).
/// `"@default"` becomes an every-4-hours expression whose minute and hour
/// offset are derived from `now`, so a population of apps configured with
/// `"@default"` spreads its checks across the window instead of firing in
/// one synchronized burst. Any other value is passed through verbatim —
/// a malformed expression surfaces as a parse error when the schedule is
/// installed, never silently here.
pub fn resolve_spec(spec: &str, now: DateTime<Utc>) -> Option<String> {
    match spec.trim() {
        "" | "@never" => None,
        "@default" => {
            let m = now.minute();
            let h = now.hour() % 4;
            Some(format!("{m} {h}/4 * * *"))
        }
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn never_and_empty_are_disabled() {
        let now = Utc::now();
        assert_eq!(resolve_spec("@never", now), None);
        assert_eq!(resolve_spec("", now), None);
        assert_eq!(resolve_spec("   ", now), None);
    }

    #[test]
    fn default_derives_offset_from_wall_clock() {
        let now = Utc.with_ymd_and_hms(2023, 4, 7, 14, 37, 12).unwrap();
        // 14 % 4 == 2
        assert_eq!(resolve_spec("@default", now), Some("37 2/4 * * *".to_string()));
    }

    #[test]
    fn default_is_deterministic_within_a_minute() {
        let a = Utc.with_ymd_and_hms(2023, 4, 7, 9, 15, 3).unwrap();
        let b = Utc.with_ymd_and_hms(2023, 4, 7, 9, 15, 58).unwrap();
        assert_eq!(resolve_spec("@default", a), resolve_spec("@default", b));
    }

    #[test]
    fn explicit_expressions_pass_through_verbatim() {
        let now = Utc::now();
        assert_eq!(
            resolve_spec("0 */1 * * *", now),
            Some("0 */1 * * *".to_string())
        );
        // Malformed expressions are not validated here.
        assert_eq!(
            resolve_spec("not a cron line", now),
            Some("not a cron line".to_string())
        );
    }

    #[test]
    fn default_parses_and_fires_every_four_hours() {
        let now = Utc.with_ymd_and_hms(2023, 4, 7, 14, 37, 12).unwrap();
        let spec = resolve_spec("@default", now).unwrap();
        let cron = croner::Cron::new(&spec).parse().unwrap();

        let first = cron.find_next_occurrence(&now, false).unwrap();
        let second = cron.find_next_occurrence(&first, false).unwrap();
        assert_eq!((second - first).num_hours(), 4);
    }
}
