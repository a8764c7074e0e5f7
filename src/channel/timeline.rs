//! Pure playout-timeline math (§9 "Continuous playout timeline").
//!
//! Position is never a mutable counter the advancer increments; it is
//! recomputed from `(playout_start_time, items, now)` every time it's
//! needed. The advancer and the EPG generator (C8) both call through
//! here so they can never disagree about what's "live" right now.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::schedule::PlayoutItem;

/// `current_index`: the item live at `now`.
/// `elapsed_in_item`: how far into that item playback would be.
/// `item_absolute_start`: the wall-clock instant that item began,
/// accounting for however many full cycles have elapsed since
/// `playout_start_time`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimelinePosition {
    pub current_index: usize,
    pub elapsed_in_item: Duration,
    pub item_absolute_start: DateTime<Utc>,
}

/// P2: `item_index(now) = argmax_i Σ_{j<i} duration_j ≤ (now − start) mod Σ_k duration_k`.
pub fn position_at(
    items: &[PlayoutItem],
    playout_start_time: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<TimelinePosition> {
    if items.is_empty() {
        return None;
    }

    let total_cycle: Duration = items.iter().map(|i| i.duration).sum();
    if total_cycle.is_zero() {
        return None;
    }

    let elapsed = (now - playout_start_time).to_std().unwrap_or(Duration::ZERO);
    let cycle_count = duration_div(elapsed, total_cycle);
    let cycle_pos = elapsed - total_cycle * cycle_count as u32;

    let mut acc = Duration::ZERO;
    for (index, item) in items.iter().enumerate() {
        let item_end = acc + item.duration;
        if cycle_pos < item_end {
            let item_absolute_start = playout_start_time
                + chrono::Duration::from_std(total_cycle * cycle_count as u32).unwrap_or_default()
                + chrono::Duration::from_std(acc).unwrap_or_default();
            return Some(TimelinePosition {
                current_index: index,
                elapsed_in_item: cycle_pos - acc,
                item_absolute_start,
            });
        }
        acc = item_end;
    }

    // Floating point / duration rounding landed exactly on a cycle
    // boundary; treat as the first item of a fresh cycle.
    Some(TimelinePosition {
        current_index: 0,
        elapsed_in_item: Duration::ZERO,
        item_absolute_start: playout_start_time
            + chrono::Duration::from_std(total_cycle * (cycle_count as u32 + 1)).unwrap_or_default(),
    })
}

/// How many whole cycles of `total` fit inside `elapsed`, saturating at
/// `u64::MAX` rather than panicking on a pathologically old
/// `playout_start_time`.
fn duration_div(elapsed: Duration, total: Duration) -> u64 {
    let elapsed_ns = elapsed.as_nanos();
    let total_ns = total.as_nanos().max(1);
    (elapsed_ns / total_ns).min(u64::MAX as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::PlayoutItemKind;

    fn item(secs: u64) -> PlayoutItem {
        PlayoutItem {
            media_item_id: Some(1),
            source_url: Some("https://example.com/x".to_string()),
            title: "x".to_string(),
            duration: Duration::from_secs(secs),
            kind: PlayoutItemKind::Content,
            filler_kind: None,
        }
    }

    #[test]
    fn continuous_resume_scenario_from_spec() {
        // Channel 80 scenario: 4 items of 1800s, restart 2.5 cycles in.
        let items = vec![item(1800), item(1800), item(1800), item(1800)];
        let start = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let now = DateTime::parse_from_rfc3339("2024-01-01T02:30:00Z")
            .unwrap()
            .with_timezone(&Utc);

        // 9000s elapsed mod the 7200s cycle lands exactly on the
        // item0/item1 boundary: item1 is current with zero elapsed
        // into it, per P2's `Σ_{j<i} duration_j ≤ cycle_pos` formula.
        let pos = position_at(&items, start, now).unwrap();
        assert_eq!(pos.current_index, 1);
        assert_eq!(pos.elapsed_in_item, Duration::from_secs(0));
    }

    #[test]
    fn wraps_across_multiple_cycles() {
        let items = vec![item(60), item(60)];
        let start = Utc::now() - chrono::Duration::seconds(60 * 2 * 100 + 30);
        let now = Utc::now();
        let pos = position_at(&items, start, now).unwrap();
        assert_eq!(pos.current_index, 0);
    }

    #[test]
    fn empty_schedule_has_no_position() {
        assert!(position_at(&[], Utc::now(), Utc::now()).is_none());
    }
}
