use serde::Deserialize;

use crate::config::ArchiveOrgConfig;

use super::cookies::CookieJar;
use super::{ResolvedSource, SourceError};

#[derive(Debug, Deserialize)]
struct MetadataResponse {
    #[serde(default)]
    files: Vec<MetadataFile>,
}

#[derive(Debug, Deserialize)]
struct MetadataFile {
    name: String,
    #[serde(default)]
    format: Option<String>,
}

/// §4.1: a `…/details/{identifier}/{filename}` URL resolves directly to
/// `https://archive.org/download/{identifier}/{filename}` with no
/// network round-trip. A bare `…/details/{identifier}` (no filename)
/// falls back to the `/metadata/{identifier}` JSON API, picking the
/// best-quality video file out of the item's file list.
pub async fn resolve(
    client: &reqwest::Client,
    url: &str,
    config: &ArchiveOrgConfig,
) -> Result<ResolvedSource, SourceError> {
    let (identifier, filename) = extract_identifier(url).ok_or_else(|| SourceError::ResolutionFailed {
        url: url.to_string(),
        status: "could not find an item identifier in the URL path".to_string(),
    })?;

    let session_cookie = session_cookie_header(url, config)?;

    if let Some(filename) = filename {
        return Ok(ResolvedSource {
            stream_url: format!("https://archive.org/download/{identifier}/{filename}"),
            direct_play: true,
            probe_hint: Some("archive_org".to_string()),
            extra_headers: session_cookie
                .clone()
                .map(|c| vec![("Cookie".to_string(), c)])
                .unwrap_or_default(),
        });
    }

    let metadata_url = format!("https://archive.org/metadata/{identifier}");
    let mut request = client.get(&metadata_url);

    if let Some(header) = &session_cookie {
        request = request.header("Cookie", header.clone());
    }

    let response = request
        .send()
        .await
        .map_err(|e| SourceError::Network(url.to_string(), e.to_string()))?;

    if response.status() == reqwest::StatusCode::FORBIDDEN
        || response.status() == reqwest::StatusCode::UNAUTHORIZED
    {
        return Err(SourceError::AuthRequired(url.to_string()));
    }
    if !response.status().is_success() {
        return Err(SourceError::ResolutionFailed {
            url: url.to_string(),
            status: response.status().to_string(),
        });
    }

    let metadata: MetadataResponse = response
        .json()
        .await
        .map_err(|e| SourceError::Network(url.to_string(), e.to_string()))?;

    let best = metadata
        .files
        .iter()
        .find(|f| matches!(f.format.as_deref(), Some("MPEG4") | Some("h.264") | Some("512Kb MPEG4")))
        .or_else(|| metadata.files.iter().find(|f| f.name.ends_with(".mp4")))
        .ok_or_else(|| SourceError::ResolutionFailed {
            url: url.to_string(),
            status: "item has no playable video file".to_string(),
        })?;

    Ok(ResolvedSource {
        stream_url: format!("https://archive.org/download/{identifier}/{}", best.name),
        direct_play: true,
        probe_hint: Some("archive_org".to_string()),
        extra_headers: session_cookie
            .map(|c| vec![("Cookie".to_string(), c)])
            .unwrap_or_default(),
    })
}

/// Load the configured session-cookie header, if authentication is
/// enabled, so it can be forwarded both to the metadata API request and
/// into `extra_headers` for FFmpeg's own connection to the resolved URL.
fn session_cookie_header(url: &str, config: &ArchiveOrgConfig) -> Result<Option<String>, SourceError> {
    if !config.use_authentication {
        return Ok(None);
    }
    let Some(cookies_path) = &config.cookies_file else {
        return Err(SourceError::AuthRequired(url.to_string()));
    };
    let jar = CookieJar::load(cookies_path).map_err(|e| SourceError::Network(url.to_string(), e.to_string()))?;
    Ok(jar.header_value())
}

/// Returns `(identifier, filename)`. `filename` is `Some` only for
/// `/details/{id}/{name}` and `/download/{id}/{name}` URLs that already
/// name a file; a bare `/details/{id}` yields `None`.
fn extract_identifier(url: &str) -> Option<(String, Option<String>)> {
    let parsed = url::Url::parse(url).ok()?;
    let mut segments = parsed.path_segments()?;
    match segments.next()? {
        "details" | "download" => {
            let identifier = segments.next()?.to_string();
            let filename = segments.next().map(|s| s.to_string());
            Some((identifier, filename))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_identifier_from_details_url() {
        assert_eq!(
            extract_identifier("https://archive.org/details/some-item-1992"),
            Some(("some-item-1992".to_string(), None))
        );
    }

    #[test]
    fn extracts_identifier_and_filename_from_download_url() {
        assert_eq!(
            extract_identifier("https://archive.org/download/some-item/video.mp4"),
            Some(("some-item".to_string(), Some("video.mp4".to_string())))
        );
    }

    #[test]
    fn extracts_identifier_and_filename_from_details_url() {
        assert_eq!(
            extract_identifier("https://archive.org/details/some-item/video.mp4"),
            Some(("some-item".to_string(), Some("video.mp4".to_string())))
        );
    }

    const SAMPLE_COOKIES: &str = "# Netscape HTTP Cookie File\n\
        .archive.org\tTRUE\t/\tTRUE\t1999999999\tlogged-in-user\tperson%40example.com\n";

    #[tokio::test]
    async fn fast_path_carries_session_cookie_into_extra_headers_when_authenticated() {
        let dir = tempfile::tempdir().unwrap();
        let cookies_path = dir.path().join("cookies.txt");
        std::fs::write(&cookies_path, SAMPLE_COOKIES).unwrap();

        let config = ArchiveOrgConfig {
            use_authentication: true,
            cookies_file: Some(cookies_path),
        };
        let client = reqwest::Client::new();
        let resolved = resolve(&client, "https://archive.org/details/some-item/video.mp4", &config)
            .await
            .unwrap();

        assert_eq!(resolved.stream_url, "https://archive.org/download/some-item/video.mp4");
        assert_eq!(resolved.extra_headers.len(), 1);
        assert_eq!(resolved.extra_headers[0].0, "Cookie");
        assert!(resolved.extra_headers[0].1.contains("logged-in-user=person%40example.com"));
    }

    #[tokio::test]
    async fn fast_path_without_authentication_carries_no_headers() {
        let config = ArchiveOrgConfig {
            use_authentication: false,
            cookies_file: None,
        };
        let client = reqwest::Client::new();
        let resolved = resolve(&client, "https://archive.org/details/some-item/video.mp4", &config)
            .await
            .unwrap();
        assert!(resolved.extra_headers.is_empty());
    }
}
