pub mod command;
pub mod process;

use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;

use crate::config::FfmpegConfig;

pub use command::{build_ffmpeg_command, TranscodeRequest};
pub use process::{classify_stderr_line, StderrSeverity, TranscodeBufferConfig, TranscodeProcess};

const FIRST_CHUNK_TIMEOUT: Duration = Duration::from_secs(15);
const FIRST_CHUNK_RETRY_TIMEOUT: Duration = Duration::from_secs(10);
const SUBSEQUENT_CHUNK_TIMEOUT: Duration = Duration::from_secs(5);
const CANCEL_GRACE_PERIOD: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("ffmpeg binary not found at '{0}'")]
    FfmpegNotFound(String),
    #[error("ffmpeg exited immediately with status {0}")]
    FfmpegImmediateExit(std::process::ExitStatus),
    #[error("no data received from ffmpeg within the first-chunk timeout")]
    FirstChunkTimeout,
    #[error("ffmpeg reported a fatal demux error: {0}")]
    FatalDemuxError(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Verify the configured ffmpeg binary actually runs before spawning a
/// real transcode.
pub async fn check_ffmpeg_available(config: &FfmpegConfig) -> Result<(), TranscodeError> {
    let output = Command::new(&config.ffmpeg_path)
        .arg("-version")
        .output()
        .await
        .map_err(|_| TranscodeError::FfmpegNotFound(config.ffmpeg_path.clone()))?;
    if !output.status.success() {
        return Err(TranscodeError::FfmpegImmediateExit(output.status));
    }
    Ok(())
}

/// Probe a resolved stream URL with `ffprobe` to recover codec/duration
/// hints used for direct-stream-copy decisions. Each stream selector is
/// bounded to 10 seconds; a probe that hangs (some PBS live manifests)
/// is treated as "unknown" for that stream rather than blocking channel
/// startup. Video and audio are probed separately since ffprobe's CSV
/// output can't cleanly carry mixed-stream rows through one invocation.
pub async fn probe(config: &FfmpegConfig, stream_url: &str) -> Option<ProbeResult> {
    let video = probe_stream(config, stream_url, "v:0", "codec_name,width,height").await;
    let audio = probe_stream(config, stream_url, "a:0", "codec_name").await;

    if video.is_none() && audio.is_none() {
        return None;
    }

    let mut video_parts = video.as_deref().unwrap_or_default().split(',');
    Some(ProbeResult {
        video_codec: video_parts.next().filter(|s| !s.is_empty()).map(str::to_string),
        width: video_parts.next().and_then(|s| s.parse().ok()),
        height: video_parts.next().and_then(|s| s.parse().ok()),
        audio_codec: audio.and_then(|s| s.split(',').next().map(str::to_string)).filter(|s| !s.is_empty()),
    })
}

async fn probe_stream(
    config: &FfmpegConfig,
    stream_url: &str,
    selector: &str,
    entries: &str,
) -> Option<String> {
    let output = timeout(
        Duration::from_secs(10),
        Command::new(&config.ffprobe_path)
            .args(["-v", "error", "-select_streams", selector, "-show_entries", &format!("stream={entries}"), "-of", "csv=p=0"])
            .arg(stream_url)
            .output(),
    )
    .await
    .ok()??;

    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProbeResult {
    pub video_codec: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub audio_codec: Option<String>,
}

/// Start a transcode process and wait for its first chunk of data,
/// retrying once on a bare timeout (a cold CDN connection, typically)
/// before giving up. This is the operation the broadcaster calls once
/// per playout item.
pub async fn start_stream(
    config: &FfmpegConfig,
    req: &TranscodeRequest<'_>,
) -> Result<TranscodeProcess, TranscodeError> {
    let command = build_ffmpeg_command(config, req);
    let process = TranscodeProcess::spawn(command, TranscodeBufferConfig::default())?;

    match timeout(FIRST_CHUNK_TIMEOUT, wait_for_first_byte(&process)).await {
        Ok(true) => Ok(process),
        Ok(false) => Err(TranscodeError::FfmpegImmediateExit(std::process::ExitStatus::default())),
        Err(_) => {
            // One extended retry read on the same process: a cold CDN
            // connection may legitimately take longer than 15s to send
            // its first TS packet (§4.4 "Timeout semantics").
            match timeout(FIRST_CHUNK_RETRY_TIMEOUT, wait_for_first_byte(&process)).await {
                Ok(true) => Ok(process),
                _ => {
                    let tail = process.stderr_tail();
                    tracing::error!(stderr_tail = ?tail, "no first chunk within first-chunk timeout");
                    Err(TranscodeError::FirstChunkTimeout)
                }
            }
        }
    }
}

async fn wait_for_first_byte(process: &TranscodeProcess) -> bool {
    loop {
        if process.seconds_since_last_data() < Duration::from_millis(50) || process.is_finished() {
            return !process.is_finished();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

pub fn subsequent_chunk_timeout() -> Duration {
    SUBSEQUENT_CHUNK_TIMEOUT
}

pub fn cancel_grace_period() -> Duration {
    CANCEL_GRACE_PERIOD
}
