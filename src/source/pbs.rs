use regex::Regex;

use super::{ResolvedSource, SourceError};

/// PBS video pages embed a player config containing a direct HLS
/// manifest URL; we fetch the page and pull the matching `.m3u8` URL
/// out of it rather than reimplementing PBS's player JS. If the stored
/// URL is already an `.m3u8` manifest, it's returned as-is (§4.1:
/// "if input is an .m3u8, return as-is").
pub async fn resolve(
    client: &reqwest::Client,
    url: &str,
    channel_name_hint: Option<&str>,
) -> Result<ResolvedSource, SourceError> {
    if is_hls_manifest(url) {
        return Ok(ResolvedSource {
            stream_url: url.to_string(),
            direct_play: true,
            probe_hint: Some("pbs".to_string()),
            extra_headers: Vec::new(),
        });
    }

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| SourceError::Network(url.to_string(), e.to_string()))?;

    if !response.status().is_success() {
        return Err(SourceError::ResolutionFailed {
            url: url.to_string(),
            status: response.status().to_string(),
        });
    }

    let body = response
        .text()
        .await
        .map_err(|e| SourceError::Network(url.to_string(), e.to_string()))?;

    let manifest_url =
        find_hls_url(&body, channel_name_hint).ok_or_else(|| SourceError::ResolutionFailed {
            url: url.to_string(),
            status: "no HLS manifest URL found in page".to_string(),
        })?;

    Ok(ResolvedSource {
        stream_url: manifest_url,
        direct_play: true,
        probe_hint: Some("pbs".to_string()),
        extra_headers: Vec::new(),
    })
}

fn is_hls_manifest(url: &str) -> bool {
    url.split(['?', '#']).next().unwrap_or(url).ends_with(".m3u8")
}

/// Multi-feed PBS pages (e.g. a live bundle covering several regional
/// feeds) embed more than one `.m3u8` URL; when `channel_name_hint` is
/// given, prefer the first manifest whose URL contains it, falling
/// back to the first manifest found at all.
fn find_hls_url(body: &str, channel_name_hint: Option<&str>) -> Option<String> {
    let re = Regex::new(r#"https:[^"'\\]+\.m3u8[^"'\\]*"#).ok()?;
    let candidates: Vec<String> = re.find_iter(body).map(|m| m.as_str().replace("\\/", "/")).collect();

    if let Some(hint) = channel_name_hint {
        let hint = hint.to_ascii_lowercase();
        if let Some(found) = candidates.iter().find(|c| c.to_ascii_lowercase().contains(&hint)) {
            return Some(found.clone());
        }
    }
    candidates.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_manifest_url_embedded_in_json() {
        let body = r#"{"url":"https:\/\/video-ga.pbs.org\/vod\/abc\/stream.m3u8?t=1"}"#;
        assert_eq!(
            find_hls_url(body, None),
            Some("https://video-ga.pbs.org/vod/abc/stream.m3u8?t=1".to_string())
        );
    }

    #[test]
    fn returns_none_when_absent() {
        assert!(find_hls_url("no manifest here", None).is_none());
    }

    #[test]
    fn prefers_manifest_matching_channel_hint_in_multi_feed_bundle() {
        let body = r#"
            {"url":"https:\/\/video-ga.pbs.org\/vod\/east\/stream.m3u8"}
            {"url":"https:\/\/video-ga.pbs.org\/vod\/west\/stream.m3u8"}
        "#;
        assert_eq!(
            find_hls_url(body, Some("west")),
            Some("https://video-ga.pbs.org/vod/west/stream.m3u8".to_string())
        );
    }

    #[test]
    fn recognizes_an_already_resolved_manifest_url() {
        assert!(is_hls_manifest("https://video-ga.pbs.org/vod/abc/stream.m3u8?t=1"));
        assert!(!is_hls_manifest("https://www.pbs.org/video/some-show-abc123/"));
    }
}
