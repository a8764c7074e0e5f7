use diesel::prelude::*;
use std::str::FromStr;

use crate::db::schema::{
    channel_playback_positions, channels, collection_items, collections, ffmpeg_profiles,
    media_items, schedule_items, schedules,
};

/// Playout mode for a channel. Stored as text (legacy rows may hold any
/// case, e.g. "continuous" or "CONTINUOUS") and normalized through
/// `FromStr`/`Display` at every read boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayoutMode {
    #[default]
    Continuous,
    OnDemand,
}

impl FromStr for PlayoutMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CONTINUOUS" => Ok(Self::Continuous),
            "ON_DEMAND" | "ONDEMAND" | "ON-DEMAND" => Ok(Self::OnDemand),
            other => Err(format!("unrecognized playout_mode '{other}'")),
        }
    }
}

impl std::fmt::Display for PlayoutMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Continuous => "CONTINUOUS",
            Self::OnDemand => "ON_DEMAND",
        };
        f.write_str(s)
    }
}

impl PlayoutMode {
    /// Legacy rows sometimes hold an unrecognized raw string; normalize
    /// permissively rather than failing the whole channel load.
    pub fn normalize(raw: &str) -> Self {
        Self::from_str(raw).unwrap_or_default()
    }
}

/// Source kind for a MediaItem, detected by C1 from the URL and persisted
/// here for fast dispatch without re-parsing the URL on every resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaSourceKind {
    Youtube,
    ArchiveOrg,
    Pbs,
    Plex,
}

impl FromStr for MediaSourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "YOUTUBE" => Ok(Self::Youtube),
            "ARCHIVE_ORG" | "ARCHIVEORG" => Ok(Self::ArchiveOrg),
            "PBS" => Ok(Self::Pbs),
            "PLEX" => Ok(Self::Plex),
            other => Err(format!("unrecognized media source '{other}'")),
        }
    }
}

impl std::fmt::Display for MediaSourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Youtube => "YOUTUBE",
            Self::ArchiveOrg => "ARCHIVE_ORG",
            Self::Pbs => "PBS",
            Self::Plex => "PLEX",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionType {
    Manual,
    Smart,
    Multi,
}

impl FromStr for CollectionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "MANUAL" => Ok(Self::Manual),
            "SMART" => Ok(Self::Smart),
            "MULTI" => Ok(Self::Multi),
            other => Err(format!("unrecognized collection type '{other}'")),
        }
    }
}

impl std::fmt::Display for CollectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Manual => "MANUAL",
            Self::Smart => "SMART",
            Self::Multi => "MULTI",
        };
        f.write_str(s)
    }
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = channels)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Channel {
    pub id: Option<i32>,
    pub number: String,
    pub name: String,
    pub group_name: Option<String>,
    pub enabled: i32,
    pub logo_path: Option<String>,
    pub playout_mode: String,
    pub ffmpeg_profile_id: Option<i32>,
    pub hwaccel_hint: Option<String>,
    pub audio_language: Option<String>,
    pub subtitle_language: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Channel {
    pub fn is_enabled(&self) -> bool {
        self.enabled != 0
    }

    pub fn playout_mode(&self) -> PlayoutMode {
        PlayoutMode::normalize(&self.playout_mode)
    }
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = channels)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct NewChannel {
    pub number: String,
    pub name: String,
    pub group_name: Option<String>,
    pub enabled: i32,
    pub logo_path: Option<String>,
    pub playout_mode: String,
    pub ffmpeg_profile_id: Option<i32>,
    pub hwaccel_hint: Option<String>,
    pub audio_language: Option<String>,
    pub subtitle_language: Option<String>,
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = media_items)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct MediaItem {
    pub id: Option<i32>,
    pub source: String,
    pub source_native_id: String,
    pub url: String,
    pub title: String,
    pub description: Option<String>,
    pub duration_secs: Option<i32>,
    pub thumbnail: Option<String>,
    pub uploader: Option<String>,
    pub upload_date: Option<String>,
    pub metadata_json: Option<String>,
    pub created_at: String,
}

impl MediaItem {
    pub fn source_kind(&self) -> Result<MediaSourceKind, String> {
        MediaSourceKind::from_str(&self.source)
    }

    pub fn duration(&self) -> Option<std::time::Duration> {
        self.duration_secs
            .filter(|d| *d >= 0)
            .map(|d| std::time::Duration::from_secs(d as u64))
    }
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = media_items)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct NewMediaItem {
    pub source: String,
    pub source_native_id: String,
    pub url: String,
    pub title: String,
    pub description: Option<String>,
    pub duration_secs: Option<i32>,
    pub thumbnail: Option<String>,
    pub uploader: Option<String>,
    pub upload_date: Option<String>,
    pub metadata_json: Option<String>,
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = collections)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Collection {
    pub id: Option<i32>,
    pub name: String,
    pub collection_type: String,
    pub smart_query: Option<String>,
    pub created_at: String,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = collections)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct NewCollection {
    pub name: String,
    pub collection_type: String,
    pub smart_query: Option<String>,
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = collection_items)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct CollectionItem {
    pub id: Option<i32>,
    pub collection_id: i32,
    pub media_item_id: i32,
    pub position: i32,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = collection_items)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct NewCollectionItem {
    pub collection_id: i32,
    pub media_item_id: i32,
    pub position: i32,
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schedules)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Schedule {
    pub id: Option<i32>,
    pub channel_id: i32,
    pub is_yaml_source: i32,
    pub yaml_path: Option<String>,
    pub keep_multi_part_together: i32,
    pub treat_collections_as_shows: i32,
    pub shuffle: i32,
    pub random_start: i32,
    pub repeat: i32,
    pub created_at: String,
    pub updated_at: String,
}

impl Schedule {
    pub fn is_yaml_authoritative(&self) -> bool {
        self.is_yaml_source != 0
    }
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schedule_items)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ScheduleItemRow {
    pub id: Option<i32>,
    pub schedule_id: i32,
    pub position: i32,
    pub start_type: String,
    pub target_type: String,
    pub target_id: Option<i32>,
    pub playback_order: String,
    pub playout_mode: String,
    pub fill_with_group_mode: Option<String>,
    pub tail_mode: Option<String>,
    pub guide_mode: Option<String>,
    pub custom_title: Option<String>,
    pub filler_kind: Option<String>,
    pub override_id: Option<i32>,
}

/// Per-channel singleton persisted playback position (§3 ChannelPlaybackPosition).
#[derive(Queryable, Selectable, Identifiable, Insertable, AsChangeset, Debug, Clone)]
#[diesel(table_name = channel_playback_positions)]
#[diesel(primary_key(channel_id))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ChannelPlaybackPosition {
    pub channel_id: i32,
    pub playout_start_time: String,
    pub last_item_index: i32,
    pub last_item_media_id: Option<i32>,
    pub last_position_update: String,
    pub total_items_watched: i32,
}

impl ChannelPlaybackPosition {
    pub fn new(channel_id: i32, playout_start_time: chrono::DateTime<chrono::Utc>) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            channel_id,
            playout_start_time: playout_start_time.to_rfc3339(),
            last_item_index: 0,
            last_item_media_id: None,
            last_position_update: now,
            total_items_watched: 0,
        }
    }

    pub fn playout_start_time(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::parse_from_rfc3339(&self.playout_start_time)
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .unwrap_or_else(|_| chrono::Utc::now())
    }

    /// `last_item_index` clamped into `[0, len)`; out-of-range persisted
    /// values (e.g. after a shorter schedule was loaded) fall back to 0
    /// per §3's invariant rather than panicking or erroring.
    pub fn clamped_index(&self, len: usize) -> usize {
        if len == 0 {
            0
        } else {
            (self.last_item_index.max(0) as usize) % len
        }
    }
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = ffmpeg_profiles)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct FfmpegProfile {
    pub id: Option<i32>,
    pub name: String,
    pub video_encoder: Option<String>,
    pub video_bitrate_kbps: Option<i32>,
    pub audio_encoder: Option<String>,
    pub audio_bitrate_kbps: Option<i32>,
    pub resolution_width: Option<i32>,
    pub resolution_height: Option<i32>,
    pub watermark_path: Option<String>,
    pub extra_flags: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn playout_mode_normalizes_legacy_casing() {
        assert_eq!(PlayoutMode::normalize("continuous"), PlayoutMode::Continuous);
        assert_eq!(PlayoutMode::normalize("ON_DEMAND"), PlayoutMode::OnDemand);
        assert_eq!(PlayoutMode::normalize("on-demand"), PlayoutMode::OnDemand);
        assert_eq!(PlayoutMode::normalize("garbage"), PlayoutMode::Continuous);
    }

    #[test]
    fn clamped_index_wraps_when_schedule_shrank() {
        let pos = ChannelPlaybackPosition::new(1, chrono::Utc::now());
        let pos = ChannelPlaybackPosition {
            last_item_index: 50,
            ..pos
        };
        assert_eq!(pos.clamped_index(10), 0);
        assert_eq!(pos.clamped_index(0), 0);
    }
}
