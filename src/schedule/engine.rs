use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::time::Duration;

use chrono::{DateTime, Datelike, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::types::{ParsedSchedule, PlayoutItem, PlayoutItemKind, SequenceOp};

/// Kept for callers that want a typed reason a particular op produced
/// nothing; the engine itself never propagates these out of `expand` —
/// every unresolved reference degrades to an empty emission for that op
/// plus one log line, not a failed expansion.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleEngineError {
    #[error("content key '{0}' is not declared in this schedule")]
    UnknownContent(String),
    #[error("named sequence '{0}' is not declared in this schedule")]
    UnknownSequence(String),
    #[error("sequence '{0}' references itself, directly or indirectly")]
    CyclicSequence(String),
    #[error("malformed skipItems count '{0}'")]
    BadSkipCount(String),
    #[error("malformed time-of-day value '{0}'")]
    BadTimeOfDay(String),
}

/// Content resolved ahead of time, one entry per item declared under a
/// content key. The engine treats these as opaque, already-ordered
/// candidates; it never talks to the database itself.
pub type ContentLibrary = HashMap<String, Vec<PlayoutItem>>;

/// Derive the per-(channel, day) shuffle seed:
/// `hash(channel_number, day_of_year, sequence_key)`. Using the same
/// inputs on every call makes `shuffleSequence` resolve identically
/// within a day and change the following day.
pub fn derive_seed(channel_number: &str, at: DateTime<Utc>, sequence_key: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    channel_number.hash(&mut hasher);
    at.ordinal().hash(&mut hasher);
    at.year().hash(&mut hasher);
    sequence_key.hash(&mut hasher);
    hasher.finish()
}

struct Expander<'a> {
    parsed: &'a ParsedSchedule,
    library: &'a ContentLibrary,
    seed: u64,
    max_items: usize,
    base_time: DateTime<Utc>,
    cursors: HashMap<String, usize>,
    elapsed: Duration,
    out: Vec<PlayoutItem>,
    pre_roll: Option<String>,
    mid_roll: Option<String>,
    post_roll: Option<String>,
    warned: HashSet<String>,
}

/// Expand a parsed schedule into a flat playout timeline. Pure: calling
/// this twice with the same arguments produces the same output, which
/// is what lets the broadcaster recompute "what should be playing at
/// time T" without keeping a running counter anywhere.
///
/// Never fails: an unresolved content/sequence reference, a malformed
/// duration, or a cyclic sequence reference logs one warning for that
/// key and produces an empty emission for the op that referenced it.
pub fn expand(
    parsed: &ParsedSchedule,
    library: &ContentLibrary,
    seed: u64,
    base_time: DateTime<Utc>,
    max_items: usize,
) -> Vec<PlayoutItem> {
    let mut expander = Expander {
        parsed,
        library,
        seed,
        max_items,
        base_time,
        cursors: HashMap::new(),
        elapsed: Duration::ZERO,
        out: Vec::new(),
        pre_roll: None,
        mid_roll: None,
        post_roll: None,
        warned: HashSet::new(),
    };
    expander.run(&parsed.playout, &mut Vec::new());
    let mut out = expander.out;

    // §4.3 step 7: repeat the base expansion until max_items is met.
    if parsed.repeat && !out.is_empty() && out.len() < max_items {
        let base = out.clone();
        let mut cycle = base.iter().cycle();
        while out.len() < max_items {
            out.push(cycle.next().expect("base is non-empty").clone());
        }
    }

    out
}

impl<'a> Expander<'a> {
    fn run(&mut self, ops: &[SequenceOp], seq_stack: &mut Vec<String>) {
        for op in ops {
            if self.out.len() >= self.max_items {
                return;
            }
            self.apply(op, seq_stack);
        }
    }

    /// Log a warning for `key` at most once per expansion.
    fn warn_once(&mut self, key: &str, reason: &str) {
        if self.warned.insert(key.to_string()) {
            tracing::warn!(schedule_key = key, reason, "schedule engine: unresolved reference, skipping op");
        }
    }

    fn apply(&mut self, op: &SequenceOp, seq_stack: &mut Vec<String>) {
        match op {
            SequenceOp::Reference { content } => {
                if let Some(item) = self.next_from(content) {
                    self.emit(vec![item]);
                }
            }
            SequenceOp::All { content } => {
                let Some(items) = self.resolve_content(content) else {
                    return;
                };
                let items = items.to_vec();
                self.emit(items);
            }
            SequenceOp::DurationFill { content, duration, filler_kind, discard_attempts } => {
                let Ok(target) = super::parser::parse_duration(duration) else {
                    self.warn_once(duration, "malformed durationFill duration");
                    return;
                };
                let Some(items) = self.resolve_content(content) else {
                    return;
                };
                let items = items.to_vec();
                if items.is_empty() {
                    return;
                }
                let budget = self.max_items.saturating_sub(self.out.len());
                let mut emitted = greedy_fill(&items, target, *discard_attempts, budget);
                if let Some(kind) = filler_kind {
                    for item in &mut emitted {
                        item.filler_kind = Some(kind.clone());
                    }
                }
                self.emit(emitted);
            }
            SequenceOp::Sequence { name } => {
                if seq_stack.iter().any(|s| s == name) {
                    self.warn_once(name, "cyclic sequence reference");
                    return;
                }
                let Some(ops) = self.parsed.sequences.get(name).cloned() else {
                    self.warn_once(name, "unknown sequence");
                    return;
                };
                seq_stack.push(name.clone());
                self.run(&ops, seq_stack);
                seq_stack.pop();
            }
            SequenceOp::ShuffleSequence { name } => {
                if seq_stack.iter().any(|s| s == name) {
                    self.warn_once(name, "cyclic sequence reference");
                    return;
                }
                let Some(ops) = self.parsed.sequences.get(name).cloned() else {
                    self.warn_once(name, "unknown sequence");
                    return;
                };
                // Expand the named sequence in isolation, then shuffle
                // the resulting items deterministically; a nested
                // shuffle never mutates the outer cursor state until
                // after the shuffle is computed.
                let mut inner = Expander {
                    parsed: self.parsed,
                    library: self.library,
                    seed: self.seed,
                    max_items: self.max_items,
                    base_time: self.base_time,
                    cursors: self.cursors.clone(),
                    elapsed: self.elapsed,
                    out: Vec::new(),
                    pre_roll: None,
                    mid_roll: None,
                    post_roll: None,
                    warned: std::mem::take(&mut self.warned),
                };
                seq_stack.push(name.clone());
                inner.run(&ops, seq_stack);
                seq_stack.pop();
                self.cursors = inner.cursors;
                self.warned = inner.warned;

                let mut items = inner.out;
                let mut rng = StdRng::seed_from_u64(self.seed ^ seed_from_name(name));
                items.shuffle(&mut rng);
                self.emit(items);
            }
            SequenceOp::SkipItems { content, count } => {
                let Some(n) = self.resolve_skip_count(content, count) else {
                    return;
                };
                let cursor = self.cursors.entry(content.clone()).or_insert(0);
                *cursor += n;
            }
            SequenceOp::PadToNext { minutes, content, fallback } => {
                let now = self.base_time + chrono::Duration::from_std(self.elapsed).unwrap_or_default();
                let Some(target) = next_minute_boundary(now, *minutes) else {
                    self.warn_once(&minutes.to_string(), "malformed padToNext minute multiple");
                    return;
                };
                self.pad_until_instant_with_fallback(target, content.as_deref(), fallback.as_deref());
            }
            SequenceOp::PadUntil { until, content } => {
                let now = self.base_time + chrono::Duration::from_std(self.elapsed).unwrap_or_default();
                let Some(target) = time_of_day_on(now, until) else {
                    self.warn_once(until, "malformed padUntil time-of-day");
                    return;
                };
                self.pad_until_instant(target, content.as_deref());
            }
            SequenceOp::WaitUntil { until, tomorrow, rewind_on_reset } => {
                let now = self.base_time + chrono::Duration::from_std(self.elapsed).unwrap_or_default();
                let Some(naive) = parse_time_of_day(until) else {
                    self.warn_once(until, "malformed waitUntil time-of-day");
                    return;
                };
                let mut target = now.date_naive().and_time(naive).and_utc();
                if *tomorrow {
                    target += chrono::Duration::days(1);
                } else if target <= now {
                    if *rewind_on_reset {
                        // Today's occurrence already passed; stay put
                        // rather than waiting a full day to catch up.
                        return;
                    }
                    target += chrono::Duration::days(1);
                }
                if target > now {
                    self.elapsed += (target - now).to_std().unwrap_or_default();
                }
            }
            SequenceOp::PreRoll { on, sequence } => {
                self.pre_roll = if *on { sequence.clone() } else { None };
            }
            SequenceOp::MidRoll { on, sequence } => {
                self.mid_roll = if *on { sequence.clone() } else { None };
            }
            SequenceOp::PostRoll { on, sequence } => {
                self.post_roll = if *on { sequence.clone() } else { None };
            }
        }
    }

    /// Emit a batch of items produced by one content op, splicing in
    /// the active roll slots in a fixed order: pre-roll before every
    /// item, mid-roll once after the first item of a multi-item
    /// emission, post-roll once after the whole emission.
    fn emit(&mut self, items: Vec<PlayoutItem>) {
        let is_multi = items.len() > 1;
        for (i, item) in items.into_iter().enumerate() {
            if self.out.len() >= self.max_items {
                return;
            }
            if let Some(key) = self.pre_roll.clone() {
                if let Some(mut roll) = self.next_from(&key) {
                    roll.kind = PlayoutItemKind::PreRoll;
                    self.push(roll);
                }
            }
            self.push(item);
            if i == 0 && is_multi {
                if let Some(key) = self.mid_roll.clone() {
                    if let Some(mut roll) = self.next_from(&key) {
                        roll.kind = PlayoutItemKind::MidRoll;
                        self.push(roll);
                    }
                }
            }
        }
        if let Some(key) = self.post_roll.clone() {
            if let Some(mut roll) = self.next_from(&key) {
                roll.kind = PlayoutItemKind::PostRoll;
                self.push(roll);
            }
        }
    }

    fn push(&mut self, item: PlayoutItem) {
        self.elapsed += item.duration;
        self.out.push(item);
    }

    fn resolve_content(&mut self, key: &str) -> Option<&[PlayoutItem]> {
        if self.library.contains_key(key) {
            self.library.get(key).map(|v| v.as_slice())
        } else {
            self.warn_once(key, "unknown content key");
            None
        }
    }

    fn next_from(&mut self, key: &str) -> Option<PlayoutItem> {
        let items = self.resolve_content(key)?;
        if items.is_empty() {
            self.warn_once(key, "content key has no items");
            return None;
        }
        let cursor = self.cursors.entry(key.to_string()).or_insert(0);
        let item = items[*cursor % items.len()].clone();
        *cursor += 1;
        Some(item)
    }

    fn resolve_skip_count(&mut self, content: &str, grammar: &str) -> Option<usize> {
        let len = self.resolve_content(content)?.len();
        let grammar = grammar.trim();
        if grammar.eq_ignore_ascii_case("random") {
            let mut rng = StdRng::seed_from_u64(self.seed ^ seed_from_name(content));
            return Some(rng.gen_range(0..len.max(1)));
        }
        if let Some(rest) = grammar.strip_prefix("count/") {
            let Ok(divisor) = rest.parse::<usize>() else {
                self.warn_once(grammar, "malformed skipItems expression");
                return None;
            };
            if divisor == 0 {
                self.warn_once(grammar, "skipItems divisor is zero");
                return None;
            }
            return Some(len / divisor);
        }
        if grammar.eq_ignore_ascii_case("count") {
            return Some(len);
        }
        match grammar.parse::<usize>() {
            Ok(n) => Some(n),
            Err(_) => {
                self.warn_once(grammar, "malformed skipItems expression");
                None
            }
        }
    }

    fn pad_until_instant(&mut self, target: DateTime<Utc>, content: Option<&str>) {
        self.pad_until_instant_with_fallback(target, content, None);
    }

    /// Fill the gap up to `target` with a duration-fill over `content`;
    /// if `content` is unresolvable or empty, fall back to `fallback`;
    /// if that's unresolvable too, emit a placeholder spanning the gap
    /// (§4.3 `padToNext`/`padUntil`, property P4: sum within 10% of the
    /// gap).
    fn pad_until_instant_with_fallback(
        &mut self,
        target: DateTime<Utc>,
        content: Option<&str>,
        fallback: Option<&str>,
    ) {
        let now = self.base_time + chrono::Duration::from_std(self.elapsed).unwrap_or_default();
        if target <= now {
            return;
        }
        let gap = (target - now).to_std().unwrap_or_default();

        for key in content.into_iter().chain(fallback) {
            let Some(items) = self.resolve_content(key) else {
                continue;
            };
            let items = items.to_vec();
            if items.is_empty() {
                continue;
            }
            let start_idx = self.cursors.get(key).copied().unwrap_or(0);
            let budget = self.max_items.saturating_sub(self.out.len());
            let (emitted, next_idx) = fill_with_cursor(&items, gap, 0, budget, start_idx);
            self.cursors.insert(key.to_string(), next_idx);
            for item in emitted {
                self.push(item);
            }
            return;
        }

        self.push(placeholder(gap));
    }
}

/// Greedily accumulate items (cycling from the front) until their summed
/// duration is at least `target`, tolerating up to 10% overshoot. An item
/// that would push the running total past that tolerance is discarded (up
/// to `discard_attempts` times) and the next one tried instead; once
/// `discard_attempts` is exhausted, the next item is accepted anyway
/// rather than stalling forever (§4.3 `duration_fill`).
fn greedy_fill(items: &[PlayoutItem], target: Duration, discard_attempts: u32, budget: usize) -> Vec<PlayoutItem> {
    fill_with_cursor(items, target, discard_attempts, budget, 0).0
}

fn fill_with_cursor(
    items: &[PlayoutItem],
    target: Duration,
    discard_attempts: u32,
    budget: usize,
    start_idx: usize,
) -> (Vec<PlayoutItem>, usize) {
    if items.is_empty() || target.is_zero() {
        return (Vec::new(), start_idx);
    }

    let max_total = target.mul_f64(1.1);
    let mut filled = Duration::ZERO;
    let mut idx = start_idx;
    let mut discards_left = discard_attempts;
    let mut emitted = Vec::new();

    while filled < target && emitted.len() < budget {
        let item = items[idx % items.len()].clone();
        idx += 1;
        if filled + item.duration > max_total && discards_left > 0 {
            discards_left -= 1;
            continue;
        }
        filled += item.duration;
        emitted.push(item);
    }

    (emitted, idx)
}

fn placeholder(duration: Duration) -> PlayoutItem {
    PlayoutItem {
        media_item_id: None,
        source_url: None,
        title: "Off Air".to_string(),
        duration,
        kind: PlayoutItemKind::Placeholder,
        filler_kind: None,
    }
}

fn seed_from_name(name: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    hasher.finish()
}

/// Next wall-clock instant strictly after `now` whose minute-of-day is a
/// multiple of `minutes` (§4.3 `padToNext(M)`: "next wall-clock boundary
/// at minute-multiple M from current_time"). `minutes` of 60 lands on the
/// top of the hour, 1440 on midnight.
fn next_minute_boundary(now: DateTime<Utc>, minutes: u32) -> Option<DateTime<Utc>> {
    if minutes == 0 {
        return None;
    }
    let minutes = minutes as i64;
    let midnight = now.date_naive().and_hms_opt(0, 0, 0)?.and_utc();
    let minute_of_day = (now - midnight).num_seconds().div_euclid(60);
    let next_multiple = (minute_of_day / minutes + 1) * minutes;
    Some(midnight + chrono::Duration::minutes(next_multiple))
}

/// Parse a `HH:MM` or `HH:MM:SS` time-of-day value.
fn parse_time_of_day(time: &str) -> Option<chrono::NaiveTime> {
    use chrono::NaiveTime;
    NaiveTime::parse_from_str(time, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(time, "%H:%M"))
        .ok()
}

/// `time` is `HH:MM` or `HH:MM:SS`; returns that time-of-day on `now`'s
/// date, rolling to the next day if it has already passed.
fn time_of_day_on(now: DateTime<Utc>, time: &str) -> Option<DateTime<Utc>> {
    let naive = parse_time_of_day(time)?;
    let candidate = now.date_naive().and_time(naive).and_utc();
    if candidate <= now {
        Some(candidate + chrono::Duration::days(1))
    } else {
        Some(candidate)
    }
}

use rand::Rng;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn item(id: i32, secs: u64) -> PlayoutItem {
        PlayoutItem {
            media_item_id: Some(id),
            source_url: Some(format!("https://example.com/{id}")),
            title: format!("Item {id}"),
            duration: Duration::from_secs(secs),
            kind: PlayoutItemKind::Content,
            filler_kind: None,
        }
    }

    fn schedule(playout: Vec<SequenceOp>) -> ParsedSchedule {
        ParsedSchedule {
            name: "test".to_string(),
            description: None,
            content: HashMap::new(),
            sequences: HashMap::new(),
            playout,
            repeat: false,
        }
    }

    #[test]
    fn all_expands_every_item_in_order() {
        let parsed = schedule(vec![SequenceOp::All { content: "movies".to_string() }]);
        let mut library = ContentLibrary::new();
        library.insert("movies".to_string(), vec![item(1, 60), item(2, 90)]);

        let result = expand(&parsed, &library, 1, Utc::now(), 100);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].media_item_id, Some(1));
        assert_eq!(result[1].media_item_id, Some(2));
    }

    #[test]
    fn reference_cycles_through_content_on_repeat_use() {
        let parsed = schedule(vec![
            SequenceOp::Reference { content: "ads".to_string() },
            SequenceOp::Reference { content: "ads".to_string() },
            SequenceOp::Reference { content: "ads".to_string() },
        ]);
        let mut library = ContentLibrary::new();
        library.insert("ads".to_string(), vec![item(1, 30), item(2, 30)]);

        let result = expand(&parsed, &library, 1, Utc::now(), 100);
        let ids: Vec<_> = result.iter().map(|i| i.media_item_id).collect();
        assert_eq!(ids, vec![Some(1), Some(2), Some(1)]);
    }

    #[test]
    fn shuffle_is_deterministic_for_same_seed() {
        let parsed = schedule(vec![SequenceOp::ShuffleSequence { name: "block".to_string() }]);
        let mut sequences = HashMap::new();
        sequences.insert(
            "block".to_string(),
            vec![
                SequenceOp::Reference { content: "movies".to_string() },
                SequenceOp::Reference { content: "movies".to_string() },
            ],
        );
        let mut parsed = parsed;
        parsed.sequences = sequences;
        let mut library = ContentLibrary::new();
        library.insert("movies".to_string(), vec![item(1, 60), item(2, 60), item(3, 60)]);

        let a = expand(&parsed, &library, 42, Utc::now(), 100);
        let b = expand(&parsed, &library, 42, Utc::now(), 100);
        assert_eq!(
            a.iter().map(|i| i.media_item_id).collect::<Vec<_>>(),
            b.iter().map(|i| i.media_item_id).collect::<Vec<_>>()
        );
    }

    #[test]
    fn duration_fill_covers_target_with_whole_items() {
        let parsed = schedule(vec![SequenceOp::DurationFill {
            content: "loop".to_string(),
            duration: "90s".to_string(),
            filler_kind: None,
            discard_attempts: 0,
        }]);
        let mut library = ContentLibrary::new();
        library.insert("loop".to_string(), vec![item(1, 30)]);

        let result = expand(&parsed, &library, 1, Utc::now(), 100);
        let total: Duration = result.iter().map(|i| i.duration).sum();
        assert_eq!(total, Duration::from_secs(90));
        assert_eq!(result.len(), 3);
    }

    #[test]
    fn duration_fill_discards_items_that_would_overflow_before_giving_up() {
        // Scenario 3 shape (spec §8): greedily pick items summing to
        // >= target within 10% overshoot, discarding up to
        // `discard_attempts` items that would overflow before accepting
        // one anyway.
        let parsed = schedule(vec![SequenceOp::DurationFill {
            content: "breaks".to_string(),
            duration: "100s".to_string(),
            filler_kind: Some("Commercial".to_string()),
            discard_attempts: 1,
        }]);
        let mut library = ContentLibrary::new();
        library.insert(
            "breaks".to_string(),
            vec![item(1, 80), item(2, 50), item(3, 20)],
        );

        let result = expand(&parsed, &library, 1, Utc::now(), 100);
        let total: Duration = result.iter().map(|i| i.duration).sum();
        // Without discarding the 50s item, 80+50=130 would overshoot the
        // 110s tolerance; discarding it in favor of the 20s item lands
        // exactly on target.
        assert_eq!(total, Duration::from_secs(100));
        let ids: Vec<_> = result.iter().map(|i| i.media_item_id).collect();
        assert_eq!(ids, vec![Some(1), Some(3)]);
        assert_eq!(result[0].filler_kind.as_deref(), Some("Commercial"));
    }

    #[test]
    fn pad_until_fills_gap_within_ten_percent_tolerance() {
        // Spec §8 scenario 3: padUntil "03:00" from 02:47:30 (750s gap),
        // breaks collection [60, 90, 120, 45].
        let parsed = schedule(vec![SequenceOp::PadUntil {
            until: "03:00".to_string(),
            content: Some("breaks".to_string()),
        }]);
        let mut library = ContentLibrary::new();
        library.insert(
            "breaks".to_string(),
            vec![item(1, 60), item(2, 90), item(3, 120), item(4, 45)],
        );

        let base = DateTime::parse_from_rfc3339("2024-01-01T02:47:30Z")
            .unwrap()
            .with_timezone(&Utc);
        let result = expand(&parsed, &library, 1, base, 100);
        let total: Duration = result.iter().map(|i| i.duration).sum();
        assert!(total >= Duration::from_secs(750) && total <= Duration::from_secs(825));
    }

    #[test]
    fn pad_to_next_rounds_up_to_the_next_minute_multiple() {
        let base = DateTime::parse_from_rfc3339("2024-01-01T02:17:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let next = next_minute_boundary(base, 30).unwrap();
        let expected = DateTime::parse_from_rfc3339("2024-01-01T02:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(next, expected);
    }

    #[test]
    fn wait_until_advances_cursor_without_emitting_anything() {
        let parsed = schedule(vec![
            SequenceOp::WaitUntil {
                until: "03:00".to_string(),
                tomorrow: false,
                rewind_on_reset: false,
            },
            SequenceOp::Reference { content: "movies".to_string() },
        ]);
        let mut library = ContentLibrary::new();
        library.insert("movies".to_string(), vec![item(1, 60)]);

        let base = DateTime::parse_from_rfc3339("2024-01-01T02:47:30Z")
            .unwrap()
            .with_timezone(&Utc);
        let result = expand(&parsed, &library, 1, base, 100);
        // Only the referenced item is emitted; waitUntil never pushes a
        // placeholder even though it spans a 12:30 gap.
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].media_item_id, Some(1));
    }

    #[test]
    fn wait_until_tomorrow_rolls_over_even_if_time_has_not_passed_today() {
        let parsed = schedule(vec![
            SequenceOp::WaitUntil {
                until: "03:00".to_string(),
                tomorrow: true,
                rewind_on_reset: false,
            },
            SequenceOp::Reference { content: "movies".to_string() },
        ]);
        let mut library = ContentLibrary::new();
        library.insert("movies".to_string(), vec![item(1, 60)]);

        // 02:00, before 03:00 would naturally occur today; `tomorrow`
        // forces the wait to span into the next day regardless, and no
        // placeholder is emitted for the gap either way.
        let base = DateTime::parse_from_rfc3339("2024-01-01T02:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let result = expand(&parsed, &library, 1, base, 100);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].media_item_id, Some(1));
    }

    #[test]
    fn wait_until_rewind_on_reset_keeps_today_instead_of_rolling_to_tomorrow() {
        let parsed = schedule(vec![
            SequenceOp::WaitUntil {
                until: "02:00".to_string(),
                tomorrow: false,
                rewind_on_reset: true,
            },
            SequenceOp::Reference { content: "movies".to_string() },
        ]);
        let mut library = ContentLibrary::new();
        library.insert("movies".to_string(), vec![item(1, 60)]);

        // 02:47:30 is already past 02:00 today; without rewindOnReset this
        // would roll to 02:00 tomorrow. With it, the wait is a no-op and
        // the next item plays immediately.
        let base = DateTime::parse_from_rfc3339("2024-01-01T02:47:30Z")
            .unwrap()
            .with_timezone(&Utc);
        let result = expand(&parsed, &library, 1, base, 100);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].media_item_id, Some(1));
    }

    #[test]
    fn skip_items_advances_cursor_without_emitting() {
        let parsed = schedule(vec![
            SequenceOp::SkipItems { content: "movies".to_string(), count: "1".to_string() },
            SequenceOp::Reference { content: "movies".to_string() },
        ]);
        let mut library = ContentLibrary::new();
        library.insert("movies".to_string(), vec![item(1, 60), item(2, 60)]);

        let result = expand(&parsed, &library, 1, Utc::now(), 100);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].media_item_id, Some(2));
    }

    #[test]
    fn unknown_content_key_degrades_to_empty_emission_not_a_failed_expansion() {
        let parsed = schedule(vec![
            SequenceOp::Reference { content: "missing".to_string() },
            SequenceOp::Reference { content: "present".to_string() },
        ]);
        let mut library = ContentLibrary::new();
        library.insert("present".to_string(), vec![item(1, 60)]);

        let result = expand(&parsed, &library, 1, Utc::now(), 100);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].media_item_id, Some(1));
    }

    #[test]
    fn repeat_flag_loops_base_expansion_to_requested_length() {
        let mut parsed = schedule(vec![SequenceOp::All { content: "movies".to_string() }]);
        parsed.repeat = true;
        let mut library = ContentLibrary::new();
        library.insert("movies".to_string(), vec![item(1, 60), item(2, 60)]);

        let result = expand(&parsed, &library, 1, Utc::now(), 5);
        assert_eq!(result.len(), 5);
        let ids: Vec<_> = result.iter().map(|i| i.media_item_id).collect();
        assert_eq!(ids, vec![Some(1), Some(2), Some(1), Some(2), Some(1)]);
    }

    #[test]
    fn pre_roll_toggle_splices_before_every_item_while_on() {
        let parsed = schedule(vec![
            SequenceOp::PreRoll { on: true, sequence: Some("bumper".to_string()) },
            SequenceOp::All { content: "movies".to_string() },
            SequenceOp::PreRoll { on: false, sequence: None },
            SequenceOp::Reference { content: "movies".to_string() },
        ]);
        let mut library = ContentLibrary::new();
        library.insert("movies".to_string(), vec![item(1, 60), item(2, 60)]);
        library.insert("bumper".to_string(), vec![item(9, 5)]);

        let result = expand(&parsed, &library, 1, Utc::now(), 100);
        // bumper, item1, bumper, item2, item1 (pre-roll off for the trailing reference)
        let ids: Vec<_> = result.iter().map(|i| i.media_item_id).collect();
        assert_eq!(ids, vec![Some(9), Some(1), Some(9), Some(2), Some(1)]);
        assert_eq!(result[0].kind, PlayoutItemKind::PreRoll);
    }

    #[test]
    fn mid_roll_only_fires_once_for_a_multi_item_emission() {
        let parsed = schedule(vec![
            SequenceOp::MidRoll { on: true, sequence: Some("bumper".to_string()) },
            SequenceOp::All { content: "movies".to_string() },
        ]);
        let mut library = ContentLibrary::new();
        library.insert("movies".to_string(), vec![item(1, 60), item(2, 60), item(3, 60)]);
        library.insert("bumper".to_string(), vec![item(9, 5)]);

        let result = expand(&parsed, &library, 1, Utc::now(), 100);
        let ids: Vec<_> = result.iter().map(|i| i.media_item_id).collect();
        // item1, bumper, item2, item3 — bumper only after the first item.
        assert_eq!(ids, vec![Some(1), Some(9), Some(2), Some(3)]);
    }

    #[test]
    fn post_roll_fires_once_after_the_whole_emission() {
        let parsed = schedule(vec![
            SequenceOp::PostRoll { on: true, sequence: Some("bumper".to_string()) },
            SequenceOp::All { content: "movies".to_string() },
        ]);
        let mut library = ContentLibrary::new();
        library.insert("movies".to_string(), vec![item(1, 60), item(2, 60)]);
        library.insert("bumper".to_string(), vec![item(9, 5)]);

        let result = expand(&parsed, &library, 1, Utc::now(), 100);
        let ids: Vec<_> = result.iter().map(|i| i.media_item_id).collect();
        assert_eq!(ids, vec![Some(1), Some(2), Some(9)]);
        assert_eq!(result.last().unwrap().kind, PlayoutItemKind::PostRoll);
    }
}
