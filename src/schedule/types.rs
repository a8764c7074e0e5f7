use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

/// The YAML document for one channel's `schedules/{number}.yml` file,
/// after `serde_yaml` deserialization but before expansion into a flat
/// playout timeline.
#[derive(Debug, Clone, Deserialize)]
pub struct ParsedSchedule {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub content: HashMap<String, ContentRef>,
    #[serde(default)]
    pub sequences: HashMap<String, Vec<SequenceOp>>,
    pub playout: Vec<SequenceOp>,
    /// When the base expansion of `playout` is shorter than the caller's
    /// requested item count, loop it until that count is met (§4.3 step
    /// 7, property P7). The schedule format nests this under `playout`
    /// alongside ops; this crate hoists it to a top-level flag since
    /// `playout` is otherwise strictly a `SequenceOp` list.
    #[serde(default)]
    pub repeat: bool,
}

/// A named piece of content: either a single media item (by URL or DB
/// id) or a collection to be expanded as a unit.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ContentRef {
    Url(String),
    Detailed {
        url: Option<String>,
        #[serde(default)]
        collection: Option<String>,
        #[serde(default)]
        media_item_id: Option<i32>,
        /// Playback order within the mapped collection: `chronological`
        /// (insertion order, the default) or `shuffle` (seeded
        /// per-channel, per-day permutation; see `derive_seed`).
        #[serde(default)]
        order: Option<ContentOrder>,
    },
}

impl ContentRef {
    pub fn collection_name(&self) -> Option<&str> {
        match self {
            ContentRef::Url(_) => None,
            ContentRef::Detailed { collection, .. } => collection.as_deref(),
        }
    }

    pub fn order(&self) -> ContentOrder {
        match self {
            ContentRef::Url(_) => ContentOrder::Chronological,
            ContentRef::Detailed { order, .. } => order.unwrap_or(ContentOrder::Chronological),
        }
    }
}

fn default_pad_minutes() -> u32 {
    60
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentOrder {
    Chronological,
    Shuffle,
}

/// One entry in a `playout:` or named `sequences:` list. `rename_all`
/// mirrors the lower_camel spelling the schedule YAML format uses
/// (`padToNext`, `skipItems`, ...).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SequenceOp {
    /// Play a named content/sequence entry once.
    Reference { content: String },
    /// Play every item under a content key, in file order.
    All { content: String },
    /// Repeat a content key until `duration` of real runtime has been
    /// greedily filled (sum within 10% overshoot of `duration`), optionally
    /// discarding up to `discard_attempts` items that would overflow
    /// before giving up and accepting the overshoot.
    DurationFill {
        content: String,
        duration: String,
        #[serde(default)]
        filler_kind: Option<String>,
        #[serde(default)]
        discard_attempts: u32,
    },
    /// Expand a previously-declared named sequence inline.
    Sequence { name: String },
    /// Insert filler/padding content until the next clock-aligned
    /// boundary: the next wall-clock instant whose minutes-of-day is a
    /// multiple of `minutes` (default 60, i.e. top of the hour).
    PadToNext {
        #[serde(default = "default_pad_minutes")]
        minutes: u32,
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        fallback: Option<String>,
    },
    /// Insert filler content until a fixed wall-clock time.
    PadUntil { until: String, content: Option<String> },
    /// Advance the timeline cursor (without emitting any item) until a
    /// fixed wall-clock time. `tomorrow` forces the target to next
    /// day's occurrence even if today's hasn't passed yet; `rewindOnReset`
    /// keeps today's occurrence rather than rolling over to tomorrow when
    /// it has already passed (used when a schedule resumes mid-day after
    /// a reset and shouldn't wait a full day to catch up).
    WaitUntil {
        until: String,
        #[serde(default)]
        tomorrow: bool,
        #[serde(default)]
        rewind_on_reset: bool,
    },
    /// Skip N items (or all, or a random count) of a content key
    /// without playing them, per the `skipItems` grammar in the
    /// schedule format: an integer, `"count"`, `"count/N"`, or
    /// `"random"`.
    SkipItems { content: String, count: String },
    /// Shuffle a named sequence's expansion deterministically, seeded
    /// by (channel_number, day_of_year, sequence_key).
    ShuffleSequence { name: String },
    /// Toggle the pre-roll slot: while on, `sequence`'s expansion is
    /// spliced in before every subsequently emitted content item.
    #[serde(rename = "pre_roll")]
    PreRoll { on: bool, #[serde(default)] sequence: Option<String> },
    /// Toggle the mid-roll slot: while on, `sequence`'s expansion is
    /// spliced in after the first emitted item of each multi-item
    /// emission that follows.
    #[serde(rename = "mid_roll")]
    MidRoll { on: bool, #[serde(default)] sequence: Option<String> },
    /// Toggle the post-roll slot: while on, `sequence`'s expansion is
    /// appended after each subsequent emission.
    #[serde(rename = "post_roll")]
    PostRoll { on: bool, #[serde(default)] sequence: Option<String> },
}

/// A single slot in the fully expanded playout timeline: one media
/// item (or filler sentinel) with its runtime duration.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayoutItem {
    pub media_item_id: Option<i32>,
    pub source_url: Option<String>,
    pub title: String,
    pub duration: Duration,
    pub kind: PlayoutItemKind,
    /// Semantic tag carried for EPG categorization only (e.g.
    /// "Commercial", "PSA"); never affects playout behavior.
    pub filler_kind: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayoutItemKind {
    Content,
    PreRoll,
    MidRoll,
    PostRoll,
    /// Filler inserted to pad out to a boundary/time; carries no real
    /// media and must be skipped uniformly by the broadcaster, per the
    /// "skip, continue" resolution for placeholder items.
    Placeholder,
}

impl PlayoutItem {
    pub fn is_skippable_filler(&self) -> bool {
        matches!(self.kind, PlayoutItemKind::Placeholder) || self.duration < Duration::from_secs(5)
    }
}
