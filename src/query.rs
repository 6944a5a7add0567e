use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};

use crate::error::{Error, Result};
use crate::metrics::BlockSummary;
use crate::store::{snapshot_key, Store};

/// Default window width: one snapshot interval, 21 minutes.
pub const DEFAULT_STEP_SECS: i64 = 1260;

/// The cumulative delta across `[from, to]`.
///
/// Bounds snap forward to the nearest snapshot; a missing bound means the
/// first (respectively last) snapshot in the store. The result is minified —
/// action classes with no observations inside the window are gone.
pub fn fetch_single(
    store: &Store,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) -> Result<BlockSummary> {
    let (_, lower) = bound_snapshot(store, from, Store::first_snapshot)?;
    let (_, upper) = bound_snapshot(store, to, Store::last_snapshot)?;
    let mut delta = &upper - &lower;
    delta.minify();
    Ok(delta)
}

/// Consecutive per-window deltas across `[from, to]`, one entry per `step`.
///
/// Starting from the snapshot at/after `from` (or the first), repeatedly
/// seeks the snapshot at/after `previous + step` and emits the difference
/// under the newer snapshot's key, until the store runs out or a snapshot
/// past `to` is reached. Entries are deltas, never cumulative values.
pub fn fetch_by_time_range(
    store: &Store,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    step: Duration,
) -> Result<BTreeMap<String, BlockSummary>> {
    if step <= Duration::zero() {
        return Err(Error::InvalidStep);
    }

    let (mut previous_at, mut previous) = bound_snapshot(store, from, Store::first_snapshot)?;
    let mut windows = BTreeMap::new();
    while let Some((at, snapshot)) = store.snapshot_at_or_after(previous_at + step)? {
        if to.is_some_and(|end| at > end) {
            break;
        }
        let mut delta = &snapshot - &previous;
        delta.minify();
        windows.insert(snapshot_key(at), delta);
        previous_at = at;
        previous = snapshot;
    }
    Ok(windows)
}

fn bound_snapshot(
    store: &Store,
    bound: Option<DateTime<Utc>>,
    default: impl Fn(&Store) -> Result<Option<(DateTime<Utc>, BlockSummary)>>,
) -> Result<(DateTime<Utc>, BlockSummary)> {
    match bound {
        Some(at) => store
            .snapshot_at_or_after(at)?
            .ok_or_else(|| Error::OutOfRange(snapshot_key(at))),
        None => default(store)?.ok_or(Error::EmptyStore),
    }
}
