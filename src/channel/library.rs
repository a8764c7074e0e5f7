//! Resolves the content/collection indirection in a `ParsedSchedule`
//! (or a DB-defined schedule's rows) into the `ContentLibrary` the
//! schedule engine walks, and into a flat playout list when no YAML
//! schedule is present at all (§4.3 step 1 / §4.2 "Missing file is a
//! recoverable condition").

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::db::models::MediaItem;
use crate::db::schema::{collection_items, collections, media_items, schedule_items};
use crate::db::{ChannelPlaybackPosition, DbPooledConnection};
use crate::schedule::{derive_seed, ContentOrder, ContentRef, ParsedSchedule, PlayoutItem, PlayoutItemKind};

#[derive(Debug, thiserror::Error)]
pub enum LibraryError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
}

fn to_playout_item(item: &MediaItem) -> PlayoutItem {
    PlayoutItem {
        media_item_id: item.id,
        source_url: Some(item.url.clone()),
        title: item.title.clone(),
        duration: item
            .duration()
            .unwrap_or(Duration::from_secs(1800)),
        kind: PlayoutItemKind::Content,
        filler_kind: None,
    }
}

fn collection_items_by_name(
    conn: &mut DbPooledConnection,
    name: &str,
) -> Result<Vec<MediaItem>, LibraryError> {
    let collection_id: Option<i32> = collections::table
        .filter(collections::name.eq(name))
        .select(collections::id)
        .first::<Option<i32>>(conn)
        .optional()?
        .flatten();

    let Some(collection_id) = collection_id else {
        return Ok(Vec::new());
    };

    let items = collection_items::table
        .filter(collection_items::collection_id.eq(collection_id))
        .inner_join(media_items::table)
        .order(collection_items::position.asc())
        .select(MediaItem::as_select())
        .load::<MediaItem>(conn)?;
    Ok(items)
}

/// Build the `ContentLibrary` the schedule engine consumes: one ordered
/// vector of `PlayoutItem` per content key declared in `content:`.
/// Shuffle order is a seeded permutation, re-derived identically for
/// every call within the same (channel, day, key) per §4.3's tie-break
/// rule, so callers never need to cache it themselves.
pub fn build_content_library(
    conn: &mut DbPooledConnection,
    parsed: &ParsedSchedule,
    channel_number: &str,
    at: DateTime<Utc>,
) -> Result<HashMap<String, Vec<PlayoutItem>>, LibraryError> {
    let mut library = HashMap::new();

    for (key, content_ref) in &parsed.content {
        let mut items = match content_ref {
            ContentRef::Url(url) => vec![PlayoutItem {
                media_item_id: None,
                source_url: Some(url.clone()),
                title: key.clone(),
                duration: Duration::from_secs(1800),
                kind: PlayoutItemKind::Content,
                filler_kind: None,
            }],
            ContentRef::Detailed { url: Some(url), .. } => vec![PlayoutItem {
                media_item_id: None,
                source_url: Some(url.clone()),
                title: key.clone(),
                duration: Duration::from_secs(1800),
                kind: PlayoutItemKind::Content,
                filler_kind: None,
            }],
            ContentRef::Detailed {
                collection: Some(name),
                ..
            } => collection_items_by_name(conn, name)?
                .iter()
                .map(to_playout_item)
                .collect(),
            _ => {
                tracing::warn!(content_key = %key, "content entry has neither url nor collection");
                Vec::new()
            }
        };

        if content_ref.order() == ContentOrder::Shuffle && items.len() > 1 {
            let seed = derive_seed(channel_number, at, key);
            let mut rng = StdRng::seed_from_u64(seed);
            items.shuffle(&mut rng);
        }

        library.insert(key.clone(), items);
    }

    Ok(library)
}

/// DB-defined fallback schedule (`schedules.is_yaml_source = 0`, or no
/// YAML file discoverable at all): a flat ordered read of
/// `schedule_items`, supporting the two target types a minimal linear
/// rotation needs. Richer `ScheduleItem` target types (playlist, show,
/// season, artist, multi, smart) are DB-CRUD concerns outside this
/// engine's scope (§1) and are skipped with a warning rather than
/// failing the whole channel.
pub fn build_db_fallback_items(
    conn: &mut DbPooledConnection,
    schedule_id: i32,
) -> Result<Vec<PlayoutItem>, LibraryError> {
    use crate::db::models::ScheduleItemRow;

    let rows = schedule_items::table
        .filter(schedule_items::schedule_id.eq(schedule_id))
        .order(schedule_items::position.asc())
        .select(ScheduleItemRow::as_select())
        .load::<ScheduleItemRow>(conn)?;

    let mut out = Vec::new();
    for row in rows {
        match row.target_type.as_str() {
            "media" => {
                if let Some(id) = row.target_id {
                    if let Some(item) = media_items::table
                        .filter(media_items::id.eq(id))
                        .select(MediaItem::as_select())
                        .first::<MediaItem>(conn)
                        .optional()?
                    {
                        let mut playout = to_playout_item(&item);
                        if let Some(title) = &row.custom_title {
                            playout.title = title.clone();
                        }
                        out.push(playout);
                    }
                }
            }
            "collection" => {
                if let Some(id) = row.target_id {
                    let name: Option<String> = collections::table
                        .filter(collections::id.eq(id))
                        .select(collections::name)
                        .first(conn)
                        .optional()?;
                    if let Some(name) = name {
                        out.extend(collection_items_by_name(conn, &name)?.iter().map(to_playout_item));
                    }
                }
            }
            other => {
                tracing::warn!(target_type = other, "unsupported DB schedule item target type, skipping");
            }
        }
    }
    Ok(out)
}

/// Total runtime of a playout list, with a 1800s fallback per item whose
/// duration is otherwise unknown (already applied at construction time
/// above, so this is a plain sum).
pub fn total_cycle_duration(items: &[PlayoutItem]) -> Duration {
    items.iter().map(|i| i.duration).sum()
}

/// Load (or lazily create) the persisted playout anchor for a channel.
/// Per §9's "first-start instant, then persist" resolution of the
/// ambiguous source behavior: the very first call for a channel anchors
/// `playout_start_time` at `now` and persists it; every subsequent call
/// returns the same anchor until the channel is deleted.
pub fn load_or_init_position(
    conn: &mut DbPooledConnection,
    channel_id: i32,
    now: DateTime<Utc>,
) -> Result<ChannelPlaybackPosition, diesel::result::Error> {
    use crate::db::schema::channel_playback_positions::dsl;

    if let Some(existing) = dsl::channel_playback_positions
        .filter(dsl::channel_id.eq(channel_id))
        .select(ChannelPlaybackPosition::as_select())
        .first::<ChannelPlaybackPosition>(conn)
        .optional()?
    {
        return Ok(existing);
    }

    let fresh = ChannelPlaybackPosition::new(channel_id, now);
    diesel::insert_into(dsl::channel_playback_positions)
        .values(&fresh)
        .execute(conn)?;
    Ok(fresh)
}

/// Persist `{playout_start_time, last_item_index, last_position_update}`.
/// Called every 5 items / 30 minutes by the continuous advancer, and
/// after every item by the on-demand advancer (§4.5).
pub fn persist_position(
    conn: &mut DbPooledConnection,
    channel_id: i32,
    playout_start_time: DateTime<Utc>,
    last_item_index: i32,
    last_item_media_id: Option<i32>,
    total_items_watched: i32,
) -> Result<(), diesel::result::Error> {
    use crate::db::schema::channel_playback_positions::dsl;

    let row = ChannelPlaybackPosition {
        channel_id,
        playout_start_time: playout_start_time.to_rfc3339(),
        last_item_index,
        last_item_media_id,
        last_position_update: Utc::now().to_rfc3339(),
        total_items_watched,
    };

    diesel::insert_into(dsl::channel_playback_positions)
        .values(&row)
        .on_conflict(dsl::channel_id)
        .do_update()
        .set(&row)
        .execute(conn)?;
    Ok(())
}
