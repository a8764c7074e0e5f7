use axum::{routing::get, Router};

use super::handlers::{channel_media, epg_xml, fallback_handler, hdhr_tuner, health_check};
use super::hdhr::{device_xml, discover_json, lineup_json, lineup_status_json, service_xml};
use super::m3u::playlist_m3u;
use super::state::AppState;
use super::stream::stream_media;

/// Full HTTP surface: the HDHomeRun emulation endpoints at
/// both the root path and the `/hdhomerun/` alias real tuner clients
/// also probe, and the `/iptv/...` endpoints for M3U, XMLTV, and the
/// per-channel media streams.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/discover.json", get(discover_json))
        .route("/lineup.json", get(lineup_json))
        .route("/lineup_status.json", get(lineup_status_json))
        .route("/device.xml", get(device_xml))
        .route("/service.xml", get(service_xml))
        .route("/auto/{tuner}", get(hdhr_tuner))
        .route("/hdhomerun/discover.json", get(discover_json))
        .route("/hdhomerun/lineup.json", get(lineup_json))
        .route("/hdhomerun/lineup_status.json", get(lineup_status_json))
        .route("/hdhomerun/auto/{tuner}", get(hdhr_tuner))
        .route("/iptv/channels.m3u", get(playlist_m3u))
        .route("/iptv/xmltv.xml", get(epg_xml))
        .route("/iptv/channel/{name}", get(channel_media))
        .route("/iptv/stream/{media_id}", get(stream_media))
        .fallback(fallback_handler)
        .with_state(state)
}
