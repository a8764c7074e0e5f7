//! Small top-level endpoints (`/health`, `/iptv/xmltv.xml`) and the
//! extension-dispatch wrappers that route `{number}.ts` / `{number}.m3u8`
//! and `v{number}` tuner paths to the right handler in `stream.rs`, since
//! axum's router matches whole path segments and can't mix a literal
//! suffix with a capture in the same segment.

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

use super::state::AppState;
use super::stream::{hls_playlist, stream_channel, StreamQuery};

pub async fn health_check() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain")], "ok")
}

pub async fn epg_xml(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let host = headers.get(header::HOST).and_then(|h| h.to_str().ok());
    let base = state.base_url(host);
    let now = chrono::Utc::now();
    let xml = crate::epg::generate_xmltv(state.pool(), state.config(), &base, now);
    ([(header::CONTENT_TYPE, "application/xml")], xml)
}

/// Dispatches `/iptv/channel/{name}` where `name` is `{number}.ts` or
/// `{number}.m3u8`, per §6's two per-channel media types.
pub async fn channel_media(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<StreamQuery>,
) -> Response {
    if let Some(number) = name.strip_suffix(".ts") {
        return stream_channel(State(state), Path(number.to_string()), Query(query)).await;
    }
    if let Some(number) = name.strip_suffix(".m3u8") {
        return hls_playlist(State(state), Path(number.to_string()), Query(query)).await;
    }
    StatusCode::NOT_FOUND.into_response()
}

/// Dispatches `/auto/v{number}` (and its `/hdhomerun/` alias) to the same
/// channel stream `/iptv/channel/{number}.ts` uses.
pub async fn hdhr_tuner(
    State(state): State<AppState>,
    Path(tuner): Path<String>,
    Query(query): Query<StreamQuery>,
) -> Response {
    let number = tuner.strip_prefix('v').unwrap_or(&tuner);
    stream_channel(State(state), Path(number.to_string()), Query(query)).await
}

pub async fn fallback_handler() -> impl IntoResponse {
    StatusCode::NOT_FOUND
}
