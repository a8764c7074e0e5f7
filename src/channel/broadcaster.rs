//! Channel Broadcaster (C5, spec §4.5): one per enabled channel. Owns
//! the playout timeline, advances through engine-produced items, feeds
//! each through the transcoder, and fans chunks out to every attached
//! client.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::StreamExt;
use tokio::sync::{mpsc, Mutex, RwLock, Semaphore};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::Config;
use crate::db::models::{Channel, PlayoutMode};
use crate::db::DbPool;
use crate::schedule::{self, ParsedSchedule, PlayoutItem};
use crate::source::SourceResolver;
use crate::transcoder::{self, TranscodeRequest};

use super::library;
use super::prewarm::PreWarmBuffer;
use super::timeline;

const CLIENT_QUEUE_CAPACITY: usize = 50;
const PERSIST_EVERY_ITEMS: u32 = 5;
const PERSIST_EVERY: Duration = Duration::from_secs(30 * 60);
const ON_DEMAND_FIRST_CHUNK_TIMEOUT: Duration = Duration::from_secs(30);
const ON_DEMAND_FAILURE_THRESHOLD: u32 = 10;
const ADVANCER_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Channel "80" requires an `.mp4` path on every emitted item; an item
/// that fails the filter is skipped and playout continues with the next
/// one, uniformly, rather than stalling the advancer.
const MP4_ONLY_CHANNEL: &str = "80";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcasterState {
    Idle,
    Starting,
    Running,
    Stopping,
}

/// A newly-attached client's first bytes: whatever was sitting in the
/// pre-warm buffer for the currently-live item (possibly empty), after
/// which the caller should fall through to the live per-client queue.
pub struct ClientSubscription {
    pub id: Uuid,
    pub prewarm_chunks: Vec<Bytes>,
    pub receiver: mpsc::Receiver<Bytes>,
}

/// One broadcaster per enabled channel, shared behind an `Arc` between
/// the manager, the HTTP handlers, and its own advancer task.
pub struct ChannelBroadcaster {
    pub channel_id: i32,
    pub channel_number: String,
    pub playout_mode: PlayoutMode,
    state: RwLock<BroadcasterState>,
    clients: DashMap<Uuid, mpsc::Sender<Bytes>>,
    prewarm: Mutex<Option<Arc<PreWarmBuffer>>>,
    live_index: AtomicUsize,
    playout_start: RwLock<Option<DateTime<Utc>>>,
    client_count: AtomicI32,
    advancer: Mutex<Option<JoinHandle<()>>>,
    prewarmer: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
    pool: DbPool,
    config: Arc<Config>,
    resolver: Arc<SourceResolver>,
    /// Caps the number of FFmpeg child processes this channel may have
    /// running at once (live playout + pre-warm), per
    /// `config.playout.max_concurrent_ffmpeg` (§5 "scarce resource cap").
    ffmpeg_semaphore: Arc<Semaphore>,
}

#[derive(Debug, thiserror::Error)]
pub enum BroadcasterError {
    #[error("schedule produced no playout items for channel {0}")]
    SchedulerEmpty(String),
    #[error("ffmpeg is not available: {0}")]
    FfmpegNotFound(String),
}

impl ChannelBroadcaster {
    pub fn new(
        channel: &Channel,
        pool: DbPool,
        config: Arc<Config>,
        resolver: Arc<SourceResolver>,
        ffmpeg_semaphore: Arc<Semaphore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            channel_id: channel.id.unwrap_or_default(),
            channel_number: channel.number.clone(),
            playout_mode: channel.playout_mode(),
            state: RwLock::new(BroadcasterState::Idle),
            clients: DashMap::new(),
            prewarm: Mutex::new(None),
            live_index: AtomicUsize::new(0),
            playout_start: RwLock::new(None),
            client_count: AtomicI32::new(0),
            advancer: Mutex::new(None),
            prewarmer: Mutex::new(None),
            running: AtomicBool::new(false),
            pool,
            config,
            resolver,
            ffmpeg_semaphore,
        })
    }

    pub async fn state(&self) -> BroadcasterState {
        *self.state.read().await
    }

    pub fn client_count(&self) -> i32 {
        self.client_count.load(Ordering::Relaxed)
    }

    pub fn live_index(&self) -> usize {
        self.live_index.load(Ordering::Relaxed)
    }

    pub async fn playout_start_time(&self) -> Option<DateTime<Utc>> {
        *self.playout_start.read().await
    }

    /// Load the items this channel is currently scheduled to play,
    /// without mutating any broadcaster state. Used by C8 (EPG) so its
    /// walk uses exactly the same items the advancer will use.
    pub fn load_items(
        pool: &DbPool,
        config: &Config,
        channel: &Channel,
        now: DateTime<Utc>,
    ) -> Vec<PlayoutItem> {
        let Ok(mut conn) = pool.get() else {
            return Vec::new();
        };

        match schedule::load_schedule_file(&config.schedule.schedules_dir, &channel.number) {
            Ok(parsed) => expand_yaml(&mut conn, &parsed, &channel.number, config, now),
            Err(_) => load_db_fallback(&mut conn, channel),
        }
    }

    /// Start the broadcaster: CONTINUOUS channels get one shared
    /// advancer task started here; ON_DEMAND channels just flip to
    /// Running and create per-client advancers lazily on attach.
    pub async fn start(self: &Arc<Self>) -> Result<(), BroadcasterError> {
        {
            let mut state = self.state.write().await;
            if *state == BroadcasterState::Running || *state == BroadcasterState::Starting {
                return Ok(());
            }
            *state = BroadcasterState::Starting;
        }

        if let Err(e) = transcoder::check_ffmpeg_available(&self.config.ffmpeg).await {
            *self.state.write().await = BroadcasterState::Idle;
            return Err(BroadcasterError::FfmpegNotFound(e.to_string()));
        }

        self.running.store(true, Ordering::SeqCst);

        if self.playout_mode == PlayoutMode::Continuous {
            let channel = self.load_channel_row().await;
            let Some(channel) = channel else {
                *self.state.write().await = BroadcasterState::Idle;
                return Err(BroadcasterError::SchedulerEmpty(self.channel_number.clone()));
            };

            let items = Self::load_items(&self.pool, &self.config, &channel, Utc::now());
            if items.is_empty() {
                tracing::warn!(channel = %self.channel_number, "schedule empty, broadcaster will not start");
                *self.state.write().await = BroadcasterState::Idle;
                return Err(BroadcasterError::SchedulerEmpty(self.channel_number.clone()));
            }

            let mut conn = self
                .pool
                .get()
                .map_err(|e| BroadcasterError::FfmpegNotFound(e.to_string()))?;
            let position = library::load_or_init_position(&mut conn, self.channel_id, Utc::now())
                .unwrap_or_else(|_| crate::db::ChannelPlaybackPosition::new(self.channel_id, Utc::now()));
            *self.playout_start.write().await = Some(position.playout_start_time());

            let this = Arc::clone(self);
            let handle = tokio::spawn(async move { this.run_continuous(items).await });
            *self.advancer.lock().await = Some(handle);
        }

        *self.state.write().await = BroadcasterState::Running;
        Ok(())
    }

    /// Stop the broadcaster. Timeline anchor (`playout_start_time`) is
    /// preserved across stop/start so restarts resume mid-stream.
    pub async fn stop(self: &Arc<Self>) {
        *self.state.write().await = BroadcasterState::Stopping;
        self.running.store(false, Ordering::SeqCst);

        if let Some(prewarmer) = self.prewarmer.lock().await.take() {
            prewarmer.abort();
        }

        if let Some(handle) = self.advancer.lock().await.take() {
            if tokio::time::timeout(ADVANCER_JOIN_TIMEOUT, handle).await.is_err() {
                tracing::warn!(channel = %self.channel_number, "advancer did not join within timeout, already aborted by drop");
            }
        }

        self.clients.clear();
        self.client_count.store(0, Ordering::SeqCst);
        *self.state.write().await = BroadcasterState::Idle;
    }

    /// Register a new client queue and, if the live item has a
    /// pre-warm buffer still holding chunks, drain it for this client
    /// as a head start.
    pub async fn subscribe(&self) -> ClientSubscription {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(CLIENT_QUEUE_CAPACITY);
        self.clients.insert(id, tx);
        self.client_count.fetch_add(1, Ordering::SeqCst);

        let prewarm_chunks = match self.prewarm.lock().await.as_ref() {
            Some(buf) => buf.drain(),
            None => Vec::new(),
        };

        ClientSubscription {
            id,
            prewarm_chunks,
            receiver: rx,
        }
    }

    pub fn unsubscribe(&self, id: Uuid) {
        if self.clients.remove(&id).is_some() {
            self.client_count.fetch_sub(1, Ordering::SeqCst);
        }
    }

    async fn load_channel_row(&self) -> Option<Channel> {
        use crate::db::schema::channels::dsl;
        use diesel::prelude::*;

        let mut conn = self.pool.get().ok()?;
        dsl::channels
            .filter(dsl::id.eq(self.channel_id))
            .select(Channel::as_select())
            .first::<Channel>(&mut conn)
            .optional()
            .ok()
            .flatten()
    }

    async fn run_continuous(self: Arc<Self>, items: Vec<PlayoutItem>) {
        let total_cycle = library::total_cycle_duration(&items);
        if total_cycle.is_zero() {
            tracing::warn!(channel = %self.channel_number, "zero-duration schedule, aborting advancer");
            return;
        }

        let playout_start = self.playout_start_time().await.unwrap_or_else(Utc::now);
        let mut index = timeline::position_at(&items, playout_start, Utc::now())
            .map(|p| p.current_index)
            .unwrap_or(0);

        let mut items_since_persist = 0u32;
        let mut last_persist = Instant::now();

        while self.running.load(Ordering::SeqCst) {
            let idx = index % items.len();
            self.live_index.store(idx, Ordering::SeqCst);
            let item = items[idx].clone();

            if item.is_skippable_filler() || fails_mp4_only_filter(&self.channel_number, &item) {
                index += 1;
                continue;
            }

            self.spawn_prewarm_for_next(&items, idx).await;

            if let Err(e) = self.stream_item(&item).await {
                tracing::error!(channel = %self.channel_number, item = %item.title, error = %e, "item failed, advancing");
            }

            index += 1;
            items_since_persist += 1;
            if items_since_persist >= PERSIST_EVERY_ITEMS || last_persist.elapsed() >= PERSIST_EVERY {
                self.persist(playout_start, idx, item.media_item_id, index as i32).await;
                items_since_persist = 0;
                last_persist = Instant::now();
            }

            if !self.running.load(Ordering::SeqCst) {
                break;
            }
        }

        if let Some(prewarmer) = self.prewarmer.lock().await.take() {
            prewarmer.abort();
        }
    }

    async fn spawn_prewarm_for_next(&self, items: &[PlayoutItem], current_idx: usize) {
        if let Some(old) = self.prewarmer.lock().await.take() {
            old.abort();
        }

        let next = items[(current_idx + 1) % items.len()].clone();
        if next.is_skippable_filler() {
            *self.prewarm.lock().await = None;
            return;
        }

        let buffer = Arc::new(PreWarmBuffer::new());
        *self.prewarm.lock().await = Some(buffer.clone());

        let config = self.config.clone();
        let resolver = self.resolver.clone();
        let channel_number = self.channel_number.clone();
        let semaphore = self.ffmpeg_semaphore.clone();
        let handle = tokio::spawn(async move {
            let Some(url) = next.source_url.clone() else {
                return;
            };
            let Ok(resolved) = resolver.resolve_with_hint(&url, Some(&channel_number), &config).await else {
                return;
            };
            // Bound concurrent FFmpeg child processes (config.playout.max_concurrent_ffmpeg)
            // across both the live path and pre-warming; a pre-warm that can't get a
            // permit simply skips this item's head start rather than blocking the advancer.
            let Ok(_permit) = semaphore.try_acquire_owned() else {
                tracing::trace!(channel = %channel_number, "prewarm skipped, ffmpeg concurrency cap reached");
                return;
            };
            let probe = transcoder::probe(&config.ffmpeg, &resolved.stream_url).await;
            let req = TranscodeRequest {
                resolved: &resolved,
                source_kind_hint: resolved.probe_hint.as_deref(),
                video_encoder_override: None,
                audio_encoder_override: None,
                resolution: None,
                probe: probe.as_ref(),
            };
            let Ok(mut process) = transcoder::start_stream(&config.ffmpeg, &req).await else {
                return;
            };
            while let Some(Ok(chunk)) = process.next().await {
                if !buffer.push(chunk) {
                    break;
                }
            }
            tracing::trace!(channel = %channel_number, "prewarm complete for next item");
        });
        *self.prewarmer.lock().await = Some(handle);
    }

    async fn stream_item(&self, item: &PlayoutItem) -> Result<(), String> {
        let Some(url) = item.source_url.as_deref() else {
            return Err("item has no source url".to_string());
        };

        let resolved = self
            .resolver
            .resolve_with_hint(url, Some(&self.channel_number), &self.config)
            .await
            .map_err(|e| e.to_string())?;

        // Block for a permit rather than skipping: this is the live
        // playout path and there is no fallback item to play instead.
        let _permit = self
            .ffmpeg_semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| e.to_string())?;
        let probe = transcoder::probe(&self.config.ffmpeg, &resolved.stream_url).await;
        let req = TranscodeRequest {
            resolved: &resolved,
            source_kind_hint: resolved.probe_hint.as_deref(),
            video_encoder_override: None,
            audio_encoder_override: None,
            resolution: None,
            probe: probe.as_ref(),
        };

        let mut process = transcoder::start_stream(&self.config.ffmpeg, &req)
            .await
            .map_err(|e| e.to_string())?;

        let chunk_timeout = transcoder::subsequent_chunk_timeout();
        loop {
            if !self.running.load(Ordering::SeqCst) {
                return Ok(());
            }
            match tokio::time::timeout(chunk_timeout, process.next()).await {
                Ok(Some(Ok(chunk))) => self.fan_out(chunk),
                Ok(Some(Err(e))) => return Err(e.to_string()),
                Ok(None) => {
                    return match process.fatal_stderr() {
                        Some(line) => Err(format!("fatal demux error: {line}")),
                        None => Ok(()),
                    };
                }
                Err(_) => {
                    if process.is_finished() {
                        return Ok(());
                    }
                    // Linear stream stalling briefly is not fatal; keep waiting.
                    continue;
                }
            }
        }
    }

    fn fan_out(&self, chunk: Bytes) {
        let mut dead = Vec::new();
        for entry in self.clients.iter() {
            if entry.value().try_send(chunk.clone()).is_err() {
                dead.push(*entry.key());
            }
        }
        for id in dead {
            self.unsubscribe_sync(id);
        }
    }

    fn unsubscribe_sync(&self, id: Uuid) {
        if self.clients.remove(&id).is_some() {
            self.client_count.fetch_sub(1, Ordering::SeqCst);
        }
    }

    async fn persist(
        &self,
        playout_start: DateTime<Utc>,
        index: usize,
        media_id: Option<i32>,
        total_watched: i32,
    ) {
        let Ok(mut conn) = self.pool.get() else {
            tracing::warn!(channel = %self.channel_number, "persistence failed: no db connection");
            return;
        };
        if let Err(e) = library::persist_position(
            &mut conn,
            self.channel_id,
            playout_start,
            index as i32,
            media_id,
            total_watched,
        ) {
            tracing::warn!(channel = %self.channel_number, error = %e, "persistence failed, continuing in-memory");
        }
    }

    /// ON_DEMAND mode (§4.5): each client gets an independent advancer
    /// bound to its own response. First pass resumes from the
    /// persisted index; later cycles restart from 0.
    pub async fn serve_on_demand(self: Arc<Self>) -> mpsc::Receiver<Bytes> {
        let (tx, rx) = mpsc::channel(CLIENT_QUEUE_CAPACITY);
        tokio::spawn(async move {
            let Some(channel) = self.load_channel_row().await else {
                return;
            };
            let items = Self::load_items(&self.pool, &self.config, &channel, Utc::now());
            if items.is_empty() {
                return;
            }

            let mut conn = match self.pool.get() {
                Ok(c) => c,
                Err(_) => return,
            };
            let position = library::load_or_init_position(&mut conn, self.channel_id, Utc::now())
                .unwrap_or_else(|_| crate::db::ChannelPlaybackPosition::new(self.channel_id, Utc::now()));
            drop(conn);

            let mut index = position.clamped_index(items.len());
            let mut consecutive_failures = 0u32;
            let mut first_pass = true;

            loop {
                if tx.is_closed() {
                    return;
                }
                let idx = index % items.len();
                let item = &items[idx];

                if !item.is_skippable_filler() {
                    match tokio::time::timeout(
                        ON_DEMAND_FIRST_CHUNK_TIMEOUT,
                        self.stream_item_to(&tx, item),
                    )
                    .await
                    {
                        Ok(Ok(())) => consecutive_failures = 0,
                        _ => {
                            consecutive_failures += 1;
                            if consecutive_failures > ON_DEMAND_FAILURE_THRESHOLD {
                                tracing::error!(
                                    channel = %self.channel_number,
                                    "more than 10 consecutive on-demand item failures, continuing anyway"
                                );
                            }
                        }
                    }
                }

                index += 1;
                if first_pass && idx == items.len() - 1 {
                    first_pass = false;
                }
                let next_persisted = if first_pass { index } else { index % items.len() };
                if let Ok(mut conn) = self.pool.get() {
                    let _ = library::persist_position(
                        &mut conn,
                        self.channel_id,
                        position.playout_start_time(),
                        (next_persisted % items.len()) as i32,
                        item.media_item_id,
                        0,
                    );
                }
                if !first_pass {
                    index %= items.len();
                }
            }
        });
        rx
    }

    async fn stream_item_to(&self, tx: &mpsc::Sender<Bytes>, item: &PlayoutItem) -> Result<(), String> {
        let Some(url) = item.source_url.as_deref() else {
            return Err("item has no source url".to_string());
        };
        let resolved = self
            .resolver
            .resolve_with_hint(url, Some(&self.channel_number), &self.config)
            .await
            .map_err(|e| e.to_string())?;
        let _permit = self
            .ffmpeg_semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| e.to_string())?;
        let probe = transcoder::probe(&self.config.ffmpeg, &resolved.stream_url).await;
        let req = TranscodeRequest {
            resolved: &resolved,
            source_kind_hint: resolved.probe_hint.as_deref(),
            video_encoder_override: None,
            audio_encoder_override: None,
            resolution: None,
            probe: probe.as_ref(),
        };
        let mut process = transcoder::start_stream(&self.config.ffmpeg, &req).await.map_err(|e| e.to_string())?;
        while let Some(chunk) = process.next().await {
            let chunk = chunk.map_err(|e| e.to_string())?;
            if tx.send(chunk).await.is_err() {
                return Ok(());
            }
        }
        if let Some(line) = process.fatal_stderr() {
            return Err(format!("fatal demux error: {line}"));
        }
        Ok(())
    }
}

fn fails_mp4_only_filter(channel_number: &str, item: &PlayoutItem) -> bool {
    if channel_number != MP4_ONLY_CHANNEL {
        return false;
    }
    !item
        .source_url
        .as_deref()
        .unwrap_or_default()
        .to_ascii_lowercase()
        .contains(".mp4")
}

fn expand_yaml(
    conn: &mut crate::db::DbPooledConnection,
    parsed: &ParsedSchedule,
    channel_number: &str,
    config: &Config,
    now: DateTime<Utc>,
) -> Vec<PlayoutItem> {
    let library = match library::build_content_library(conn, parsed, channel_number, now) {
        Ok(lib) => lib,
        Err(e) => {
            tracing::warn!(channel = %channel_number, error = %e, "failed to build content library");
            HashMap::new()
        }
    };
    let seed = schedule::derive_seed(channel_number, now, "main");
    schedule::expand(parsed, &library, seed, now, config.playout.max_items)
}

fn load_db_fallback(conn: &mut crate::db::DbPooledConnection, channel: &Channel) -> Vec<PlayoutItem> {
    use crate::db::schema::schedules::dsl;
    use diesel::prelude::*;

    let schedule_id: Option<i32> = dsl::schedules
        .filter(dsl::channel_id.eq(channel.id.unwrap_or_default()))
        .select(dsl::id)
        .first::<Option<i32>>(conn)
        .optional()
        .ok()
        .flatten()
        .flatten();

    let Some(schedule_id) = schedule_id else {
        tracing::warn!(channel = %channel.number, "no YAML schedule and no DB schedule row; channel has no content");
        return Vec::new();
    };

    library::build_db_fallback_items(conn, schedule_id).unwrap_or_else(|e| {
        tracing::warn!(channel = %channel.number, error = %e, "DB fallback schedule load failed");
        Vec::new()
    })
}
