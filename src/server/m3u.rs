//! `channels.m3u` playlist generation (§4.7 scenario 5, §4.8 shared
//! logo rule).

use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::response::IntoResponse;

use crate::logo::resolve_logo_url;

use super::common::enabled_channels;
use super::state::AppState;

pub async fn playlist_m3u(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let host = headers.get(header::HOST).and_then(|h| h.to_str().ok());
    let base = state.base_url(host);
    let channels = enabled_channels(state.pool());

    let mut out = String::from("#EXTM3U\n");
    for channel in &channels {
        let logo = resolve_logo_url(&base, &channel.number, channel.logo_path.as_deref());
        let group = channel
            .group_name
            .as_deref()
            .map(|g| format!(r#" group-title="{}""#, escape_attr(g)))
            .unwrap_or_default();

        out.push_str(&format!(
            r#"#EXTINF:-1 tvg-id="{}" tvg-name="{}"{} tvg-logo="{}",{}"#,
            escape_attr(&channel.number),
            escape_attr(&channel.name),
            group,
            escape_attr(&logo),
            channel.name
        ));
        out.push('\n');
        out.push_str(&format!("{base}/iptv/channel/{}.ts\n", channel.number));
    }

    ([(header::CONTENT_TYPE, "audio/x-mpegurl")], out)
}

fn escape_attr(value: &str) -> String {
    value.replace('"', "'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_escaping_neutralizes_quotes() {
        assert_eq!(escape_attr(r#"ACME "Classic""#), "ACME 'Classic'");
    }
}
