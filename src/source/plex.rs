use serde::Deserialize;

use crate::config::PlexConfig;

use super::{ResolvedSource, SourceError};

#[derive(Debug, Deserialize)]
struct PlexContainer {
    #[serde(rename = "MediaContainer")]
    media_container: MediaContainer,
}

#[derive(Debug, Deserialize)]
struct MediaContainer {
    #[serde(default, rename = "Metadata")]
    metadata: Vec<PlexMetadata>,
}

#[derive(Debug, Deserialize)]
struct PlexMetadata {
    #[serde(default, rename = "Media")]
    media: Vec<PlexMedia>,
}

#[derive(Debug, Deserialize)]
struct PlexMedia {
    #[serde(default, rename = "Part")]
    part: Vec<PlexPart>,
}

#[derive(Debug, Deserialize)]
struct PlexPart {
    key: String,
}

/// Resolve a Plex library item (`.../library/metadata/{id}`) to a
/// direct-play file URL by asking the Plex server for that item's
/// parts and appending the server's auth token.
pub async fn resolve(
    client: &reqwest::Client,
    url: &str,
    config: &PlexConfig,
) -> Result<ResolvedSource, SourceError> {
    if !config.enabled {
        return Err(SourceError::UnsupportedSource(url.to_string()));
    }
    let base_url = config
        .base_url
        .as_deref()
        .ok_or_else(|| SourceError::ResolutionFailed {
            url: url.to_string(),
            status: "no Plex base_url configured".to_string(),
        })?;
    let token = config
        .token
        .as_deref()
        .ok_or_else(|| SourceError::AuthRequired(url.to_string()))?;

    let rating_key = extract_rating_key(url).ok_or_else(|| SourceError::ResolutionFailed {
        url: url.to_string(),
        status: "could not find a metadata id in the URL path".to_string(),
    })?;

    let metadata_url = format!("{base_url}/library/metadata/{rating_key}?X-Plex-Token={token}");
    let response = client
        .get(&metadata_url)
        .header("Accept", "application/json")
        .send()
        .await
        .map_err(|e| SourceError::Network(url.to_string(), e.to_string()))?;

    if response.status() == reqwest::StatusCode::UNAUTHORIZED {
        return Err(SourceError::AuthRequired(url.to_string()));
    }
    if !response.status().is_success() {
        return Err(SourceError::ResolutionFailed {
            url: url.to_string(),
            status: response.status().to_string(),
        });
    }

    let container: PlexContainer = response
        .json()
        .await
        .map_err(|e| SourceError::Network(url.to_string(), e.to_string()))?;

    let part_key = container
        .media_container
        .metadata
        .first()
        .and_then(|m| m.media.first())
        .and_then(|m| m.part.first())
        .map(|p| p.key.clone())
        .ok_or_else(|| SourceError::ResolutionFailed {
            url: url.to_string(),
            status: "item has no playable media parts".to_string(),
        })?;

    Ok(ResolvedSource {
        stream_url: format!("{base_url}{part_key}?X-Plex-Token={token}"),
        direct_play: true,
        probe_hint: Some("plex".to_string()),
        extra_headers: Vec::new(),
    })
}

fn extract_rating_key(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let mut segments: Vec<&str> = parsed.path_segments()?.collect();
    segments.pop().map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_rating_key_from_metadata_path() {
        assert_eq!(
            extract_rating_key("http://192.168.1.5:32400/library/metadata/4521"),
            Some("4521".to_string())
        );
    }
}
