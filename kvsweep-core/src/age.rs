//! Age classification.
//!
//! Age is whole days since the path's `updated_time`, floored.  A path is old
//! when its age is strictly greater than the threshold, so an update 23 hours
//! ago is 0 days old and survives a threshold of 0.

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::info;

use crate::{KvSession, Result, SweepError};

const UPDATED_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Parse a metadata timestamp such as `2021-03-09T21:07:09.406443746Z`.
///
/// Fractional seconds and the trailing `Z` are dropped; the remainder is read
/// as a naive UTC date-time.
pub fn parse_updated_time(raw: &str) -> Result<DateTime<Utc>> {
    let whole_seconds = raw.split('.').next().unwrap_or(raw);
    let trimmed = whole_seconds.trim_end_matches('Z');
    NaiveDateTime::parse_from_str(trimmed, UPDATED_TIME_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| SweepError::InvalidTimestamp {
            value: raw.to_string(),
            reason: e.to_string(),
        })
}

/// Whole days between `updated` and `now`, rounded toward negative infinity.
pub fn age_in_days(updated: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let elapsed = now - updated;
    let days = elapsed.num_days();
    // num_days truncates toward zero; a clock-skewed future timestamp still
    // has to floor.
    if elapsed < chrono::TimeDelta::days(days) {
        days - 1
    } else {
        days
    }
}

/// Read `path`'s metadata and decide whether it is older than `max_age_days`.
pub async fn is_old(
    session: &dyn KvSession,
    mount: &str,
    path: &str,
    max_age_days: u32,
    now: DateTime<Utc>,
) -> Result<bool> {
    let metadata = session.read_secret_metadata(mount, path).await?;
    let updated = parse_updated_time(&metadata.updated_time)?;
    let days = age_in_days(updated, now);

    if days > i64::from(max_age_days) {
        info!(mount, path, days, "on mount {mount}, path {path} is {days} days old");
        return Ok(true);
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, TimeZone};

    use super::*;
    use crate::memory::MemoryStore;
    use crate::{Connector, SecretData};

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn parses_vault_nanosecond_timestamps() {
        let t = parse_updated_time("2021-03-09T21:07:09.406443746Z").unwrap();
        assert_eq!(t, at(2021, 3, 9, 21, 7, 9));
    }

    #[test]
    fn parses_timestamps_without_fraction() {
        assert_eq!(
            parse_updated_time("2021-03-09T21:07:09Z").unwrap(),
            at(2021, 3, 9, 21, 7, 9)
        );
        assert_eq!(
            parse_updated_time("2021-03-09T21:07:09").unwrap(),
            at(2021, 3, 9, 21, 7, 9)
        );
    }

    #[test]
    fn rejects_garbage_timestamps() {
        let err = parse_updated_time("last tuesday").unwrap_err();
        assert!(matches!(err, SweepError::InvalidTimestamp { .. }));
        assert!(parse_updated_time("").is_err());
    }

    #[test]
    fn age_floors_to_whole_days() {
        let now = at(2024, 5, 10, 12, 0, 0);
        assert_eq!(age_in_days(now - TimeDelta::hours(23), now), 0);
        assert_eq!(age_in_days(now - TimeDelta::hours(25), now), 1);
        assert_eq!(age_in_days(now - TimeDelta::hours(47), now), 1);
        assert_eq!(age_in_days(now, now), 0);
    }

    #[test]
    fn future_timestamps_floor_below_zero() {
        let now = at(2024, 5, 10, 12, 0, 0);
        assert_eq!(age_in_days(now + TimeDelta::hours(1), now), -1);
        assert_eq!(age_in_days(now + TimeDelta::days(1), now), -1);
        assert_eq!(age_in_days(now + TimeDelta::hours(25), now), -2);
    }

    async fn classify(updated: DateTime<Utc>, now: DateTime<Utc>, max_age_days: u32) -> bool {
        let store = MemoryStore::new();
        store.insert("kv", "host1/db", SecretData::from_pairs([("user", "a")]), updated);
        let session = store.login().await.unwrap();
        is_old(session.as_ref(), "kv", "host1/db", max_age_days, now)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn threshold_boundary_is_strict() {
        let now = at(2024, 5, 10, 12, 0, 0);
        let just_over_five = now - TimeDelta::days(5) - TimeDelta::seconds(5);
        assert!(!classify(just_over_five, now, 5).await);

        let six_days = now - TimeDelta::days(6);
        assert!(classify(six_days, now, 5).await);
    }

    #[tokio::test]
    async fn zero_threshold_needs_a_full_day() {
        let now = at(2024, 5, 10, 12, 0, 0);
        assert!(!classify(now - TimeDelta::hours(23), now, 0).await);
        assert!(classify(now - TimeDelta::hours(25), now, 0).await);
    }

    #[tokio::test]
    async fn missing_path_is_not_found() {
        let store = MemoryStore::new();
        let session = store.login().await.unwrap();
        let err = is_old(session.as_ref(), "kv", "gone", 1, Utc::now())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
