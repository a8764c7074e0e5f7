//! Live stream and HLS endpoints (§4.7): attach an HTTP client to a
//! `ChannelBroadcaster`'s chunk fan-out.

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use diesel::prelude::*;
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt as _;

use crate::db::models::PlayoutMode;
use crate::db::models::MediaItem;
use crate::source::SourceResolver;
use crate::transcoder::{self, TranscodeProcess, TranscodeRequest};

use super::state::AppState;

/// Wraps a transcode process so its FFmpeg concurrency permit is held
/// for exactly as long as the stream body is (dropped once the client
/// disconnects or the process finishes, whichever comes first).
struct PermitGuardedProcess {
    process: TranscodeProcess,
    _permit: tokio::sync::OwnedSemaphorePermit,
}

impl futures_util::Stream for PermitGuardedProcess {
    type Item = <TranscodeProcess as futures_util::Stream>::Item;

    fn poll_next(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        let this = self.get_mut();
        std::pin::Pin::new(&mut this.process).poll_next(cx)
    }
}

#[derive(Deserialize)]
pub struct StreamQuery {
    access_token: Option<String>,
}

/// `video/mp2t` streaming response shared by `/hdhomerun/auto/v{n}` and
/// `/iptv/channel/{n}.ts`. Client disconnect simply drops the stream;
/// it is never logged as an error (§7 "Client disconnect").
pub async fn stream_channel(
    State(state): State<AppState>,
    Path(number): Path<String>,
    Query(query): Query<StreamQuery>,
) -> Response {
    if !state.check_access_token(query.access_token.as_deref()) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let Some(broadcaster) = state.manager().get_channel(&number).await else {
        return StatusCode::NOT_FOUND.into_response();
    };

    // ON_DEMAND channels have no shared advancer to subscribe to: each
    // client drives its own independent playout walk (§4.5 "On-demand
    // mode"), so the response body is fed straight from a freshly
    // spawned per-client advancer rather than the broadcaster's
    // client-queue fan-out.
    let body = if broadcaster.playout_mode == PlayoutMode::OnDemand {
        let receiver = broadcaster.serve_on_demand().await;
        Body::from_stream(ReceiverStream::new(receiver).map(Ok::<_, std::io::Error>))
    } else {
        let subscription = broadcaster.subscribe().await;
        let id = subscription.id;

        let prewarm =
            tokio_stream::iter(subscription.prewarm_chunks.into_iter().map(Ok::<_, std::io::Error>));
        let live = ReceiverStream::new(subscription.receiver).map(Ok::<_, std::io::Error>);
        let combined = prewarm.chain(live);

        Body::from_stream(DisconnectGuard {
            inner: combined,
            broadcaster,
            id,
        })
    };

    Response::builder()
        .header(header::CONTENT_TYPE, "video/mp2t")
        .header(header::CACHE_CONTROL, "no-cache,no-store,must-revalidate,private")
        .header("X-Accel-Buffering", "no")
        .header(header::CONNECTION, "keep-alive")
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Wraps the client's chunk stream so that, once it (or the HTTP layer)
/// drops it — including on client disconnect — the broadcaster's
/// client table is cleaned up without any error-level log.
struct DisconnectGuard<S> {
    inner: S,
    broadcaster: std::sync::Arc<crate::channel::ChannelBroadcaster>,
    id: uuid::Uuid,
}

impl<S> futures_util::Stream for DisconnectGuard<S>
where
    S: futures_util::Stream + Unpin,
{
    type Item = S::Item;

    fn poll_next(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        let this = self.get_mut();
        std::pin::Pin::new(&mut this.inner).poll_next(cx)
    }
}

impl<S> Drop for DisconnectGuard<S> {
    fn drop(&mut self) {
        self.broadcaster.unsubscribe(self.id);
    }
}

/// Event-style HLS playlist: segments are `/iptv/stream/{media_id}`
/// URLs starting at the currently-live item, never closed with
/// `#EXT-X-ENDLIST` while the channel behaves as live (§4.7).
pub async fn hls_playlist(
    State(state): State<AppState>,
    Path(number): Path<String>,
    Query(query): Query<StreamQuery>,
) -> Response {
    if !state.check_access_token(query.access_token.as_deref()) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let Some(broadcaster) = state.manager().get_channel(&number).await else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let now = chrono::Utc::now();
    let channel = match load_channel(state.pool(), &number) {
        Some(c) => c,
        None => return StatusCode::NOT_FOUND.into_response(),
    };
    let items = crate::channel::ChannelBroadcaster::load_items(state.pool(), state.config(), &channel, now);
    if items.is_empty() {
        return StatusCode::NOT_FOUND.into_response();
    }

    let live_index = broadcaster.live_index().min(items.len() - 1);
    let sequence = broadcaster.live_index();

    let mut body = String::new();
    body.push_str("#EXTM3U\n");
    body.push_str("#EXT-X-VERSION:3\n");
    body.push_str("#EXT-X-PLAYLIST-TYPE:EVENT\n");
    body.push_str("#EXT-X-TARGETDURATION:10\n");
    body.push_str(&format!("#EXT-X-MEDIA-SEQUENCE:{sequence}\n"));

    for offset in 0..items.len() {
        let idx = (live_index + offset) % items.len();
        let item = &items[idx];
        if let Some(media_id) = item.media_item_id {
            let secs = item.duration.as_secs_f64();
            body.push_str(&format!("#EXTINF:{secs:.3},\n"));
            body.push_str(&format!("/iptv/stream/{media_id}\n"));
        }
    }

    ([(header::CONTENT_TYPE, "application/vnd.apple.mpegurl")], body).into_response()
}

/// Per-media proxy endpoint used by the HLS playlist's segment URLs
/// (§6 "optional per-media proxy").
pub async fn stream_media(
    State(state): State<AppState>,
    Path(media_id): Path<i32>,
    Query(query): Query<StreamQuery>,
) -> Response {
    if !state.check_access_token(query.access_token.as_deref()) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let Some(media) = load_media_item(state.pool(), media_id) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let resolver = SourceResolver::new();
    let Ok(resolved) = resolver.resolve(&media.url, state.config()).await else {
        return StatusCode::BAD_GATEWAY.into_response();
    };

    let Ok(permit) = state.manager().ffmpeg_semaphore().clone().acquire_owned().await else {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };
    let probe = transcoder::probe(&state.config().ffmpeg, &resolved.stream_url).await;
    let req = TranscodeRequest {
        resolved: &resolved,
        source_kind_hint: resolved.probe_hint.as_deref(),
        video_encoder_override: None,
        audio_encoder_override: None,
        resolution: None,
        probe: probe.as_ref(),
    };

    let Ok(process) = transcoder::start_stream(&state.config().ffmpeg, &req).await else {
        return StatusCode::BAD_GATEWAY.into_response();
    };
    // `process` holds the permit for its lifetime via the stream body below.
    let process = PermitGuardedProcess { process, _permit: permit };

    let body = Body::from_stream(process);
    Response::builder()
        .header(header::CONTENT_TYPE, "video/mp2t")
        .header(header::CACHE_CONTROL, "no-cache,no-store,must-revalidate,private")
        .header("X-Accel-Buffering", "no")
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn load_channel(pool: &crate::db::DbPool, number: &str) -> Option<crate::db::models::Channel> {
    use crate::db::schema::channels::dsl;
    use crate::db::models::Channel;
    let mut conn = pool.get().ok()?;
    dsl::channels
        .filter(dsl::number.eq(number))
        .select(Channel::as_select())
        .first::<Channel>(&mut conn)
        .optional()
        .ok()
        .flatten()
}

fn load_media_item(pool: &crate::db::DbPool, id: i32) -> Option<MediaItem> {
    use crate::db::schema::media_items::dsl;
    let mut conn = pool.get().ok()?;
    dsl::media_items
        .filter(dsl::id.eq(id))
        .select(MediaItem::as_select())
        .first::<MediaItem>(&mut conn)
        .optional()
        .ok()
        .flatten()
}
