use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

use crate::error::{Error, Result};

/// Consecutive half-second slots each producer owns within a rotation.
pub const SLOTS_PER_WINDOW: usize = 12;

/// Width of one block slot in milliseconds.
pub const SLOT_MS: i64 = 500;

/// Snapshot cadence: ten full 21-producer rotations, ~21 minutes of chain time.
pub const SNAPSHOT_INTERVAL_SLOTS: i64 = 21 * 12 * 10;

/// Unix seconds of 2000-01-01T00:00:00Z, the origin of the slot grid.
const EPOCH_UNIX_SECS: i64 = 946_684_800;

/// Index of the half-second slot containing `t`.
pub fn timestamp_to_slot(t: DateTime<Utc>) -> i64 {
    (t.timestamp_millis() - EPOCH_UNIX_SECS * 1_000).div_euclid(SLOT_MS)
}

/// The producer who owes the slot containing `t` under `schedule`, and the
/// position of that slot within the producer's window.
pub fn producer_for_timestamp<'a>(t: DateTime<Utc>, schedule: &'a [String]) -> (&'a str, usize) {
    let slot = timestamp_to_slot(t);
    let window = SLOTS_PER_WINDOW as i64;
    let rotation = schedule.len() as i64 * window;
    let index = slot.rem_euclid(rotation) / window;
    (&schedule[index as usize], slot_position(t))
}

/// `slot mod 12` — needs no schedule.
pub fn slot_position(t: DateTime<Utc>) -> usize {
    timestamp_to_slot(t).rem_euclid(SLOTS_PER_WINDOW as i64) as usize
}

/// Parse the node's naive-UTC ISO-8601 timestamps ("2018-06-09T11:56:30.500",
/// with or without a trailing Z; bare dates are midnight).
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let trimmed = raw.strip_suffix('Z').unwrap_or(raw);
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| {
            NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").map(|date| date.and_time(NaiveTime::MIN))
        })
        .map(|naive| naive.and_utc())
        .map_err(|source| Error::Timestamp {
            value: raw.to_owned(),
            source,
        })
}
