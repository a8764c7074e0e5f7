use tokio::process::Command;

use crate::config::YoutubeConfig;

use super::{ResolvedSource, SourceError};

/// YouTube pages don't expose a directly playable URL; we shell out to
/// `yt-dlp` (already the de facto standard extractor) to resolve the
/// watch URL to a direct googlevideo.com stream URL, the same way the
/// transcoder shells out to `ffmpeg` itself.
pub async fn resolve(
    _client: &reqwest::Client,
    url: &str,
    config: &YoutubeConfig,
) -> Result<ResolvedSource, SourceError> {
    let mut cmd = Command::new("yt-dlp");
    cmd.arg("--no-playlist")
        .arg("-f")
        .arg("best[protocol^=https]/best")
        .arg("-g")
        .arg(url);

    if let Some(cookies) = &config.cookies_file {
        cmd.arg("--cookies").arg(cookies);
    }

    let output = cmd
        .output()
        .await
        .map_err(|e| SourceError::Network(url.to_string(), e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("Sign in") || stderr.contains("private video") {
            return Err(SourceError::AuthRequired(url.to_string()));
        }
        return Err(SourceError::ResolutionFailed {
            url: url.to_string(),
            status: stderr.trim().to_string(),
        });
    }

    let stream_url = String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| SourceError::ResolutionFailed {
            url: url.to_string(),
            status: "yt-dlp produced no output".to_string(),
        })?
        .to_string();

    Ok(ResolvedSource {
        stream_url,
        direct_play: false,
        probe_hint: Some("youtube".to_string()),
        extra_headers: Vec::new(),
    })
}
