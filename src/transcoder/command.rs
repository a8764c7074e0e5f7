use std::process::Stdio;

use tokio::process::Command;

use crate::config::FfmpegConfig;
use crate::source::ResolvedSource;

use super::ProbeResult;

/// Everything the command synthesizer needs to know about the item
/// being transcoded, independent of which source resolved it.
pub struct TranscodeRequest<'a> {
    pub resolved: &'a ResolvedSource,
    pub source_kind_hint: Option<&'a str>,
    pub video_encoder_override: Option<&'a str>,
    pub audio_encoder_override: Option<&'a str>,
    pub resolution: Option<(u32, u32)>,
    /// `ffprobe` output for the resolved stream, when available. Drives
    /// the copy-vs-encode decisions in `can_copy_video`/`can_copy_audio`;
    /// `None` (a probe that timed out or failed) falls back to
    /// re-encoding rather than guessing stream compatibility.
    pub probe: Option<&'a ProbeResult>,
}

/// Video codecs ffmpeg can pass through unmodified into an MPEG-TS
/// container with only a bitstream filter, no re-encode.
const COPYABLE_VIDEO_CODECS: &[&str] = &["h264", "hevc", "mpeg2video"];

/// Audio codecs MPEG-TS already accepts without a transcode.
const COPYABLE_AUDIO_CODECS: &[&str] = &["aac", "mp3", "mp2"];

/// Old MPEG-4 Part 2 codecs (DivX/Xvid-era `mpeg4`, Windows Media's
/// `msmpeg4v1`/`v2`/`v3`). Hardware decoders frequently either refuse
/// these outright or silently fall back to software, so hwaccel is
/// force-disabled rather than trusted to fail loudly.
fn is_mpeg4_family_codec(codec: &str) -> bool {
    codec == "mpeg4" || codec.starts_with("msmpeg4v")
}

fn source_is_mpeg4_family(probe: Option<&ProbeResult>) -> bool {
    probe
        .and_then(|p| p.video_codec.as_deref())
        .is_some_and(is_mpeg4_family_codec)
}

/// MPEG-4 *container* sources (plain `.mp4` progressive downloads, as
/// opposed to segmented HLS) get a wider, error-tolerant demux window
/// since a single corrupt box shouldn't kill the whole probe.
fn is_mpeg4_container(req: &TranscodeRequest<'_>) -> bool {
    let url = req.resolved.stream_url.to_ascii_lowercase();
    url.ends_with(".mp4") || url.contains(".mp4?")
}

fn can_copy_video(req: &TranscodeRequest<'_>) -> bool {
    req.video_encoder_override.is_none()
        && req.resolution.is_none()
        && req
            .probe
            .and_then(|p| p.video_codec.as_deref())
            .is_some_and(|c| COPYABLE_VIDEO_CODECS.contains(&c))
}

fn can_copy_audio(req: &TranscodeRequest<'_>) -> bool {
    req.audio_encoder_override.is_none()
        && req
            .probe
            .and_then(|p| p.audio_codec.as_deref())
            .is_some_and(|c| COPYABLE_AUDIO_CODECS.contains(&c))
}

/// DRM-tagged HLS manifests (e.g. a PBS live feed fronted by a license
/// server) need a larger probe window than ffmpeg's defaults or the
/// first segment request races the key exchange and ffmpeg gives up.
fn is_drm_tagged_hls(req: &TranscodeRequest<'_>) -> bool {
    req.resolved.stream_url.contains(".m3u8")
        && (req.resolved.stream_url.contains("drm")
            || matches!(req.source_kind_hint, Some("pbs") | Some("plex")))
}

/// Build the `ffmpeg` child-process command for one playout item.
/// Generalizes the fixed `-c copy -f mpegts` invocation into a full
/// synthesis matrix: hwaccel selection, per-source-class input flags
/// (reconnect behavior, demux tolerance and probe window all vary by
/// URL class), codec selection (copy when the source already matches
/// the target profile, otherwise re-encode with source-appropriate
/// settings), and fixed output flags for MPEG-TS muxing.
pub fn build_ffmpeg_command(config: &FfmpegConfig, req: &TranscodeRequest<'_>) -> Command {
    let mut cmd = Command::new(&config.ffmpeg_path);
    cmd.kill_on_drop(true);
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.stdin(Stdio::null());

    cmd.arg("-hide_banner").arg("-loglevel").arg(&config.log_level);

    let copy_video = can_copy_video(req);
    let copy_audio = can_copy_audio(req);
    let needs_reencode = !copy_video;

    if let Some(hwaccel) = hwaccel_for(config, req, needs_reencode) {
        cmd.arg("-hwaccel").arg(hwaccel);
        if let Some(device) = &config.hwaccel_device {
            cmd.arg("-hwaccel_device").arg(device);
        }
    } else {
        cmd.arg("-hwaccel").arg("none");
    }

    for flag in input_flags_for(req) {
        cmd.arg(flag);
    }

    if let Some((header, value)) = headers_flag(req) {
        cmd.arg(header).arg(value);
    }

    cmd.arg("-i").arg(&req.resolved.stream_url);

    if copy_video {
        cmd.arg("-c:v").arg("copy").arg("-bsf:v").arg("h264_mp4toannexb,dump_extra");
    } else if let Some(encoder) = req
        .video_encoder_override
        .map(str::to_string)
        .or_else(|| video_encoder_for(config, req.source_kind_hint))
    {
        // Operator-configured encoder (possibly a hardware one such as
        // `h264_vaapi`/`h264_nvenc`); the realtime bitrate ceiling still
        // applies but preset/profile tuning is left to the operator.
        cmd.arg("-c:v")
            .arg(encoder)
            .arg("-b:v")
            .arg("6M")
            .arg("-maxrate")
            .arg("6M")
            .arg("-profile:v")
            .arg("high")
            .arg("-pix_fmt")
            .arg("yuv420p")
            .arg("-bsf:v")
            .arg("dump_extra");
        if let Some((w, h)) = req.resolution {
            cmd.arg("-vf").arg(format!("scale={w}:{h}"));
        }
    } else {
        let preset = if source_is_mpeg4_family(req.probe) { "ultrafast" } else { "veryfast" };
        cmd.arg("-c:v")
            .arg("libx264")
            .arg("-preset")
            .arg(preset)
            .arg("-crf")
            .arg("23")
            .arg("-maxrate")
            .arg("6M")
            .arg("-bufsize")
            .arg("12M")
            .arg("-profile:v")
            .arg("high")
            .arg("-level:v")
            .arg("4.1")
            .arg("-g")
            .arg("50");
        if let Some((w, h)) = req.resolution {
            cmd.arg("-vf").arg(format!("scale={w}:{h}"));
        }
    }

    if copy_audio {
        cmd.arg("-c:a").arg("copy");
    } else if let Some(encoder) = req.audio_encoder_override {
        cmd.arg("-c:a").arg(encoder);
    } else {
        cmd.arg("-c:a")
            .arg("aac")
            .arg("-b:a")
            .arg("192k")
            .arg("-ar")
            .arg("48000")
            .arg("-ac")
            .arg("2");
    }

    if !(copy_video && copy_audio) {
        if let Some(threads) = config.threads {
            cmd.arg("-threads").arg(threads.to_string());
        }
    }

    cmd.arg("-f")
        .arg("mpegts")
        .arg("-fflags")
        .arg("+genpts")
        .arg("-mpegts_flags")
        .arg("+initial_discontinuity")
        .arg("-muxrate")
        .arg("4M")
        .arg("-pcr_period")
        .arg("20")
        .arg("-flush_packets")
        .arg("1")
        .arg("-max_interleave_delta")
        .arg("0");

    if let Some(extra) = &config.extra_flags {
        for flag in extra.split_whitespace() {
            cmd.arg(flag);
        }
    }

    cmd.arg("-");
    cmd
}

/// Hardware acceleration is only worth enabling when ffmpeg is actually
/// re-encoding the video stream, and never for MPEG-4-family sources
/// (old DivX/Xvid/WMV-era codecs that hardware decoders often handle
/// by silently falling back to software, which we'd rather know about
/// up front than discover as a dropped-frames mystery).
fn hwaccel_for<'a>(config: &'a FfmpegConfig, req: &TranscodeRequest<'_>, needs_reencode: bool) -> Option<&'a str> {
    if !needs_reencode || source_is_mpeg4_family(req.probe) {
        return None;
    }
    match req.source_kind_hint {
        Some("youtube") => config.youtube_hwaccel.as_deref().or(config.hwaccel.as_deref()),
        Some("archive_org") => config
            .archive_org_hwaccel
            .as_deref()
            .or(config.hwaccel.as_deref()),
        Some("pbs") => config.pbs_hwaccel.as_deref().or(config.hwaccel.as_deref()),
        Some("plex") => config.plex_hwaccel.as_deref().or(config.hwaccel.as_deref()),
        _ => config.hwaccel.as_deref(),
    }
}

fn video_encoder_for(config: &FfmpegConfig, source_kind: Option<&str>) -> Option<String> {
    match source_kind {
        Some("youtube") => config.youtube_video_encoder.clone(),
        Some("archive_org") => config.archive_org_video_encoder.clone(),
        Some("pbs") => config.pbs_video_encoder.clone(),
        Some("plex") => config.plex_video_encoder.clone(),
        _ => None,
    }
}

/// Input-side flags vary by URL class: plain HTTP progressive downloads
/// get ffmpeg's reconnect loop plus a generous timeout (Archive.org and
/// Plex transcode sessions can stall mid-request longer than most
/// hosts); `.mp4` containers get a wider error-tolerant demux window;
/// DRM-tagged HLS needs the same tolerance but a narrower window so the
/// first segment doesn't sit waiting on a license exchange forever;
/// everything else gets the low-latency default.
fn input_flags_for(req: &TranscodeRequest<'_>) -> Vec<String> {
    let timeout_us = match req.source_kind_hint {
        Some("archive_org") | Some("plex") => "60000000",
        _ => "30000000",
    };
    let reconnect_delay_max = match req.source_kind_hint {
        Some("archive_org") => "10",
        Some("plex") => "3",
        _ => "5",
    };

    let mut flags: Vec<String> = vec![
        "-timeout".into(),
        timeout_us.into(),
        "-reconnect".into(),
        "1".into(),
        "-reconnect_at_eof".into(),
        "1".into(),
        "-reconnect_streamed".into(),
        "1".into(),
        "-reconnect_delay_max".into(),
        reconnect_delay_max.into(),
        "-multiple_requests".into(),
        "1".into(),
    ];

    if is_mpeg4_container(req) {
        flags.push("-fflags".into());
        flags.push("+genpts+discardcorrupt+igndts".into());
        flags.push("-err_detect".into());
        flags.push("ignore_err".into());
        flags.push("-probesize".into());
        flags.push("5M".into());
        flags.push("-analyzeduration".into());
        flags.push("5M".into());
    } else if is_drm_tagged_hls(req) {
        flags.push("-err_detect".into());
        flags.push("ignore_err".into());
        flags.push("-probesize".into());
        flags.push("1M".into());
        flags.push("-analyzeduration".into());
        flags.push("2M".into());
    } else {
        flags.push("-fflags".into());
        flags.push("+genpts+discardcorrupt+fastseek+low_delay".into());
        flags.push("-probesize".into());
        flags.push("1M".into());
        flags.push("-analyzeduration".into());
        flags.push("2M".into());
    }

    flags
}

/// A single `-headers` option carrying every `extra_headers` pair,
/// `\r\n`-joined the way ffmpeg's `http`/`hls` protocol handlers expect.
fn headers_flag(req: &TranscodeRequest<'_>) -> Option<(&'static str, String)> {
    if req.resolved.extra_headers.is_empty() {
        return None;
    }
    let joined = req
        .resolved
        .extra_headers
        .iter()
        .map(|(k, v)| format!("{k}: {v}"))
        .collect::<Vec<_>>()
        .join("\r\n");
    Some(("-headers", format!("{joined}\r\n")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved(url: &str) -> ResolvedSource {
        ResolvedSource {
            stream_url: url.to_string(),
            direct_play: true,
            probe_hint: None,
            extra_headers: Vec::new(),
        }
    }

    fn base_req<'a>(resolved: &'a ResolvedSource) -> TranscodeRequest<'a> {
        TranscodeRequest {
            resolved,
            source_kind_hint: Some("archive_org"),
            video_encoder_override: None,
            audio_encoder_override: None,
            resolution: None,
            probe: None,
        }
    }

    fn args(cmd: &Command) -> Vec<String> {
        cmd.as_std().get_args().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn no_probe_falls_back_to_reencode_rather_than_guessing_copy() {
        let config = FfmpegConfig::default();
        let source = resolved("https://archive.org/download/x/x.mp4");
        let req = base_req(&source);
        let cmd = build_ffmpeg_command(&config, &req);
        let args = args(&cmd);
        assert!(args.windows(2).any(|w| w == ["-c:v", "libx264"]));
    }

    #[test]
    fn copies_video_with_bitstream_filter_when_probe_confirms_h264() {
        let config = FfmpegConfig::default();
        let source = resolved("https://archive.org/download/x/x.mp4");
        let probe = ProbeResult {
            video_codec: Some("h264".to_string()),
            width: Some(1920),
            height: Some(1080),
            ..Default::default()
        };
        let mut req = base_req(&source);
        req.probe = Some(&probe);
        let cmd = build_ffmpeg_command(&config, &req);
        let args = args(&cmd);
        assert!(args.windows(2).any(|w| w == ["-c:v", "copy"]));
        assert!(args.windows(2).any(|w| w == ["-bsf:v", "h264_mp4toannexb,dump_extra"]));
        // h264 is not an MPEG-4-family codec, and no re-encode is
        // happening either way, so hwaccel is suppressed on the "no
        // re-encode needed" rule rather than the MPEG-4 one.
        assert!(args.windows(2).any(|w| w == ["-hwaccel", "none"]));
    }

    #[test]
    fn mpeg4_family_codec_forces_hwaccel_none_even_when_reencoding() {
        let mut config = FfmpegConfig::default();
        config.hwaccel = Some("vaapi".to_string());
        let source = resolved("https://archive.org/download/x/x.avi");
        let probe = ProbeResult {
            video_codec: Some("msmpeg4v3".to_string()),
            width: None,
            height: None,
            audio_codec: None,
        };
        let mut req = base_req(&source);
        req.probe = Some(&probe);
        let cmd = build_ffmpeg_command(&config, &req);
        let args = args(&cmd);
        // msmpeg4v3 isn't in COPYABLE_VIDEO_CODECS, so this re-encodes,
        // but hwaccel must still be suppressed for the MPEG-4 family.
        assert!(args.windows(2).any(|w| w == ["-c:v", "libx264"]));
        assert!(args.windows(2).any(|w| w == ["-preset", "ultrafast"]));
        assert!(args.windows(2).any(|w| w == ["-hwaccel", "none"]));
    }

    #[test]
    fn audio_copy_is_used_when_probe_confirms_an_already_compatible_codec() {
        let config = FfmpegConfig::default();
        let source = resolved("https://archive.org/download/x/x.mp4");
        let probe = ProbeResult {
            video_codec: Some("h264".to_string()),
            width: None,
            height: None,
            audio_codec: Some("aac".to_string()),
        };
        let mut req = base_req(&source);
        req.probe = Some(&probe);
        let cmd = build_ffmpeg_command(&config, &req);
        let args = args(&cmd);
        assert!(args.windows(2).any(|w| w == ["-c:a", "copy"]));
    }

    #[test]
    fn audio_reencodes_to_aac_with_fixed_bitrate_when_probe_reports_an_incompatible_codec() {
        let config = FfmpegConfig::default();
        let source = resolved("https://archive.org/download/x/x.mp4");
        let probe = ProbeResult {
            video_codec: Some("h264".to_string()),
            width: None,
            height: None,
            audio_codec: Some("flac".to_string()),
        };
        let mut req = base_req(&source);
        req.probe = Some(&probe);
        let cmd = build_ffmpeg_command(&config, &req);
        let args = args(&cmd);
        assert!(args.windows(2).any(|w| w == ["-c:a", "aac"]));
        assert!(args.windows(2).any(|w| w == ["-b:a", "192k"]));
        assert!(args.windows(2).any(|w| w == ["-ar", "48000"]));
    }

    #[test]
    fn output_mux_flags_include_the_full_fixed_set() {
        let config = FfmpegConfig::default();
        let source = resolved("https://archive.org/download/x/x.mp4");
        let req = base_req(&source);
        let cmd = build_ffmpeg_command(&config, &req);
        let args = args(&cmd);
        for pair in [
            ["-muxrate", "4M"],
            ["-pcr_period", "20"],
            ["-flush_packets", "1"],
            ["-max_interleave_delta", "0"],
        ] {
            assert!(args.windows(2).any(|w| w == pair), "missing {pair:?} in {args:?}");
        }
    }

    #[test]
    fn mp4_container_gets_widened_error_tolerant_probe_window() {
        let config = FfmpegConfig::default();
        let source = resolved("https://archive.org/download/x/x.mp4");
        let req = base_req(&source);
        let cmd = build_ffmpeg_command(&config, &req);
        let args = args(&cmd);
        assert!(args.windows(2).any(|w| w == ["-probesize", "5M"]));
        assert!(args.windows(2).any(|w| w == ["-analyzeduration", "5M"]));
        assert!(args.iter().any(|a| a == "ignore_err"));
    }

    #[test]
    fn drm_tagged_pbs_hls_gets_a_narrow_tolerant_probe_window() {
        let config = FfmpegConfig::default();
        let source = resolved("https://video-ga.pbs.org/vod/x/stream.m3u8");
        let mut req = base_req(&source);
        req.source_kind_hint = Some("pbs");
        let cmd = build_ffmpeg_command(&config, &req);
        let args = args(&cmd);
        assert!(args.windows(2).any(|w| w == ["-probesize", "1M"]));
        assert!(args.windows(2).any(|w| w == ["-analyzeduration", "2M"]));
    }

    #[test]
    fn default_source_gets_low_delay_flags() {
        let config = FfmpegConfig::default();
        let source = resolved("https://example.com/live/stream.m3u8");
        let mut req = base_req(&source);
        req.source_kind_hint = None;
        let cmd = build_ffmpeg_command(&config, &req);
        let args = args(&cmd);
        let idx = args.iter().position(|a| a == "-fflags").expect("fflags present");
        assert!(args[idx + 1].contains("low_delay"));
    }

    #[test]
    fn extra_headers_are_emitted_as_a_single_headers_flag() {
        let config = FfmpegConfig::default();
        let mut source = resolved("https://archive.org/download/x/x.mp4");
        source.extra_headers = vec![("Cookie".to_string(), "logged-in-user=abc".to_string())];
        let req = base_req(&source);
        let cmd = build_ffmpeg_command(&config, &req);
        let args = args(&cmd);
        let idx = args.iter().position(|a| a == "-headers").expect("headers flag present");
        assert_eq!(args[idx + 1], "Cookie: logged-in-user=abc\r\n");
    }

    #[test]
    fn hwaccel_is_suppressed_when_no_reencode_is_needed() {
        let mut config = FfmpegConfig::default();
        config.hwaccel = Some("vaapi".to_string());
        let source = resolved("https://archive.org/download/x/x.mp4");
        let probe = ProbeResult {
            video_codec: Some("h264".to_string()),
            width: None,
            height: None,
            audio_codec: None,
        };
        let mut req = base_req(&source);
        req.probe = Some(&probe);
        let cmd = build_ffmpeg_command(&config, &req);
        let args = args(&cmd);
        assert!(args.windows(2).any(|w| w == ["-hwaccel", "none"]));
    }

    #[test]
    fn threads_flag_is_omitted_on_a_full_copy() {
        let mut config = FfmpegConfig::default();
        config.threads = Some(4);
        let source = resolved("https://archive.org/download/x/x.mp4");
        let probe = ProbeResult {
            video_codec: Some("h264".to_string()),
            width: None,
            height: None,
            audio_codec: Some("aac".to_string()),
        };
        let mut req = base_req(&source);
        req.probe = Some(&probe);
        let cmd = build_ffmpeg_command(&config, &req);
        let args = args(&cmd);
        assert!(!args.iter().any(|a| a == "-threads"));
    }

    #[test]
    fn threads_flag_is_present_when_any_stream_is_reencoded() {
        let mut config = FfmpegConfig::default();
        config.threads = Some(4);
        let source = resolved("https://archive.org/download/x/x.mp4");
        let req = base_req(&source);
        let cmd = build_ffmpeg_command(&config, &req);
        let args = args(&cmd);
        assert!(args.windows(2).any(|w| w == ["-threads", "4"]));
    }
}
