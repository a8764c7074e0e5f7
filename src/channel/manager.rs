//! Channel Manager (C6, spec §4.6): lifecycle owner for all
//! broadcasters. Tolerates legacy DB rows that store `playout_mode` as
//! a raw string by normalizing through `Channel::playout_mode()`.

use std::sync::Arc;

use dashmap::DashMap;
use diesel::prelude::*;
use tokio::sync::Semaphore;

use crate::config::Config;
use crate::db::models::{Channel, PlayoutMode};
use crate::db::DbPool;
use crate::source::SourceResolver;

use super::broadcaster::{BroadcasterError, ChannelBroadcaster};

/// Owns `channel_number -> broadcaster`. CONTINUOUS channels are
/// started eagerly by `start_all_channels`; ON_DEMAND broadcasters are
/// created lazily the first time a client requests that channel.
pub struct ChannelManager {
    broadcasters: DashMap<String, Arc<ChannelBroadcaster>>,
    pool: DbPool,
    config: Arc<Config>,
    resolver: Arc<SourceResolver>,
    /// Process-wide cap on concurrent FFmpeg child processes, shared by
    /// every broadcaster this manager owns (§5 "scarce resource cap").
    ffmpeg_semaphore: Arc<Semaphore>,
}

impl ChannelManager {
    pub fn new(pool: DbPool, config: Arc<Config>) -> Arc<Self> {
        let ffmpeg_semaphore = Arc::new(Semaphore::new(config.playout.max_concurrent_ffmpeg.max(1)));
        Arc::new(Self {
            broadcasters: DashMap::new(),
            pool,
            config,
            resolver: Arc::new(SourceResolver::new()),
            ffmpeg_semaphore,
        })
    }

    fn enabled_channels(&self) -> Vec<Channel> {
        use crate::db::schema::channels::dsl;
        let Ok(mut conn) = self.pool.get() else {
            return Vec::new();
        };
        dsl::channels
            .filter(dsl::enabled.ne(0))
            .select(Channel::as_select())
            .load::<Channel>(&mut conn)
            .unwrap_or_default()
    }

    fn channel_by_number(&self, number: &str) -> Option<Channel> {
        use crate::db::schema::channels::dsl;
        let mut conn = self.pool.get().ok()?;
        dsl::channels
            .filter(dsl::number.eq(number))
            .select(Channel::as_select())
            .first::<Channel>(&mut conn)
            .optional()
            .ok()
            .flatten()
    }

    fn get_or_create(&self, channel: &Channel) -> Arc<ChannelBroadcaster> {
        self.broadcasters
            .entry(channel.number.clone())
            .or_insert_with(|| {
                ChannelBroadcaster::new(
                    channel,
                    self.pool.clone(),
                    self.config.clone(),
                    self.resolver.clone(),
                    self.ffmpeg_semaphore.clone(),
                )
            })
            .clone()
    }

    /// Fire-and-forget per channel: one channel's start failure must
    /// never block another's (§5 "Startup may not stall").
    pub async fn start_all_channels(self: &Arc<Self>) {
        for channel in self.enabled_channels() {
            if channel.playout_mode() != PlayoutMode::Continuous {
                continue;
            }
            let broadcaster = self.get_or_create(&channel);
            let this = Arc::clone(self);
            tokio::spawn(async move {
                if let Err(e) = broadcaster.start().await {
                    tracing::error!(channel = %channel.number, error = %e, "channel failed to start");
                }
                let _ = this;
            });
        }
    }

    /// Ensure a broadcaster exists and is running for `number`,
    /// creating/starting it on demand if necessary (covers both a
    /// not-yet-started CONTINUOUS channel and an ON_DEMAND channel's
    /// first client).
    pub async fn get_channel(self: &Arc<Self>, number: &str) -> Option<Arc<ChannelBroadcaster>> {
        let channel = self.channel_by_number(number)?;
        if !channel.is_enabled() {
            return None;
        }
        let broadcaster = self.get_or_create(&channel);
        if broadcaster.state().await == super::broadcaster::BroadcasterState::Idle {
            if let Err(e) = broadcaster.start().await {
                tracing::error!(channel = %number, error = %e, "on-demand channel start failed");
                if matches!(e, BroadcasterError::SchedulerEmpty(_)) {
                    // Still return the broadcaster: EPG and lineup
                    // listing should work even with an empty schedule.
                    return Some(broadcaster);
                }
                return None;
            }
        }
        Some(broadcaster)
    }

    pub fn lookup(&self, number: &str) -> Option<Arc<ChannelBroadcaster>> {
        self.broadcasters.get(number).map(|e| e.clone())
    }

    pub async fn stop_all(&self) {
        let handles: Vec<_> = self
            .broadcasters
            .iter()
            .map(|e| e.value().clone())
            .collect();
        let stops = handles.iter().map(|b| b.stop());
        futures::future::join_all(stops).await;
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// The process-wide FFmpeg concurrency cap, for callers (e.g. the
    /// per-media proxy endpoint) that spawn a transcode outside any
    /// broadcaster's own playout loop.
    pub fn ffmpeg_semaphore(&self) -> &Arc<Semaphore> {
        &self.ffmpeg_semaphore
    }
}
