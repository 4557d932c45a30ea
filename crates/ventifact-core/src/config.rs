use std::env;

use anyhow::{bail, Context, Result};
use chrono::Duration;

/// Runtime configuration, read from the environment.
#[derive(Clone, Debug)]
pub struct Config {
    /// SQLite database path.
    pub database_url: String,
    /// How long merged PRs are retained.
    pub merged_pr_lifetime: Duration,
    /// How long test runs (and everything hanging off them) are retained.
    pub test_run_lifetime: Duration,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "ventifact.db".to_string(),
            merged_pr_lifetime: Duration::days(90),
            test_run_lifetime: Duration::days(90),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        if let Ok(v) = env::var("DATABASE_URL") {
            cfg.database_url = v;
        }
        if let Ok(v) = env::var("MERGED_PR_LIFETIME") {
            cfg.merged_pr_lifetime =
                parse_iso8601_duration(&v).context("MERGED_PR_LIFETIME")?;
        }
        if let Ok(v) = env::var("TEST_RUN_LIFETIME") {
            cfg.test_run_lifetime = parse_iso8601_duration(&v).context("TEST_RUN_LIFETIME")?;
        }
        if let Ok(v) = env::var("VENTIFACT_LOG") {
            cfg.log_level = v;
        }
        Ok(cfg)
    }
}

/// Parses an ISO-8601 duration literal such as `P90D` or `P1DT12H`.
///
/// Calendar units approximate: a year counts as 365 days and a month as 30,
/// which is plenty for retention windows. Fractional components are not
/// accepted.
pub fn parse_iso8601_duration(input: &str) -> Result<Duration> {
    let body = input
        .strip_prefix('P')
        .with_context(|| format!("duration {input:?} does not start with 'P'"))?;

    let mut total = Duration::zero();
    let mut in_time = false;
    let mut digits = String::new();
    let mut components = 0usize;

    for ch in body.chars() {
        match ch {
            'T' if !in_time && digits.is_empty() => in_time = true,
            '0'..='9' => digits.push(ch),
            unit => {
                if digits.is_empty() {
                    bail!("duration {input:?}: no number before '{unit}'");
                }
                let value: i64 = digits
                    .parse()
                    .with_context(|| format!("duration {input:?}: bad number {digits:?}"))?;
                digits.clear();
                let span = match (in_time, unit) {
                    (false, 'Y') => days(input, value, 365)?,
                    (false, 'M') => days(input, value, 30)?,
                    (false, 'W') => days(input, value, 7)?,
                    (false, 'D') => days(input, value, 1)?,
                    (true, 'H') => Duration::try_hours(value)
                        .with_context(|| format!("duration {input:?} overflows"))?,
                    (true, 'M') => Duration::try_minutes(value)
                        .with_context(|| format!("duration {input:?} overflows"))?,
                    (true, 'S') => Duration::try_seconds(value)
                        .with_context(|| format!("duration {input:?} overflows"))?,
                    _ => bail!("duration {input:?}: unexpected unit '{unit}'"),
                };
                total = total + span;
                components += 1;
            }
        }
    }

    if !digits.is_empty() {
        bail!("duration {input:?}: trailing digits without a unit");
    }
    if components == 0 {
        bail!("duration {input:?} has no components");
    }
    Ok(total)
}

fn days(input: &str, value: i64, per_unit: i64) -> Result<Duration> {
    let n = value
        .checked_mul(per_unit)
        .with_context(|| format!("duration {input:?} overflows"))?;
    Duration::try_days(n).with_context(|| format!("duration {input:?} overflows"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_day_spans() {
        assert_eq!(parse_iso8601_duration("P90D").unwrap(), Duration::days(90));
        assert_eq!(parse_iso8601_duration("P2W").unwrap(), Duration::days(14));
    }

    #[test]
    fn parses_calendar_approximations() {
        assert_eq!(parse_iso8601_duration("P3M").unwrap(), Duration::days(90));
        assert_eq!(parse_iso8601_duration("P1Y").unwrap(), Duration::days(365));
    }

    #[test]
    fn parses_mixed_date_and_time() {
        assert_eq!(
            parse_iso8601_duration("P1DT12H30M5S").unwrap(),
            Duration::days(1) + Duration::hours(12) + Duration::minutes(30) + Duration::seconds(5)
        );
        assert_eq!(parse_iso8601_duration("PT45S").unwrap(), Duration::seconds(45));
    }

    #[test]
    fn month_means_days_before_t_and_minutes_after() {
        assert_eq!(parse_iso8601_duration("P1M").unwrap(), Duration::days(30));
        assert_eq!(parse_iso8601_duration("PT1M").unwrap(), Duration::minutes(1));
    }

    #[test]
    fn rejects_malformed_literals() {
        assert!(parse_iso8601_duration("90D").is_err());
        assert!(parse_iso8601_duration("P").is_err());
        assert!(parse_iso8601_duration("PT").is_err());
        assert!(parse_iso8601_duration("P90").is_err());
        assert!(parse_iso8601_duration("PD").is_err());
        assert!(parse_iso8601_duration("P1H").is_err());
        assert!(parse_iso8601_duration("PT0.5S").is_err());
    }
}
