use std::collections::VecDeque;
use std::io::ErrorKind;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::Stream;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy)]
pub struct TranscodeBufferConfig {
    pub read_chunk_size: usize,
    pub prefill_bytes: usize,
}

impl Default for TranscodeBufferConfig {
    fn default() -> Self {
        Self {
            read_chunk_size: 188 * 1000,
            prefill_bytes: 2 * 1024 * 1024,
        }
    }
}

/// stderr lines are sorted into one of four buckets so the caller can
/// decide whether to keep streaming, log-and-continue, or treat the
/// process as fatally broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StderrSeverity {
    /// Routine ffmpeg chatter (`Input #0`, stream mapping) logged at debug.
    Debug,
    /// Recoverable hiccup (late packet, non-monotonic DTS) logged at warning.
    Warning,
    /// Read/decode error on a single frame; the process is still alive.
    Error,
    /// The upstream demuxer gave up; the process is about to exit and
    /// should not be retried on the same item.
    FatalDemux,
}

/// Classify one line of ffmpeg stderr, case-insensitive, checked
/// downgrade-to-debug first (these look alarming but are routine for a
/// linear stream reconnecting or skipping a corrupt macroblock), then
/// escalate-to-fatal, then the generic error/warning catch-alls.
pub fn classify_stderr_line(line: &str) -> StderrSeverity {
    let lower = line.to_ascii_lowercase();

    let is_debug = lower.contains("hwaccel initialisation returned error")
        || lower.contains("error while decoding mb")
        || (lower.contains("will reconnect") && lower.contains("end of file"))
        || (lower.contains("will reconnect") && lower.contains("input/output error"));

    if is_debug {
        return StderrSeverity::Debug;
    }

    if lower.contains("error during demuxing") || (lower.contains("demuxing") && lower.contains("input/output error")) {
        return StderrSeverity::FatalDemux;
    }

    if lower.contains("error") || lower.contains("failed") {
        return StderrSeverity::Error;
    }

    if lower.contains("warning") {
        return StderrSeverity::Warning;
    }

    StderrSeverity::Debug
}

const STDERR_TAIL_LINES: usize = 10;

struct BufferState {
    chunks: VecDeque<Bytes>,
    bytes_buffered: usize,
    bytes_sent: u64,
    finished: bool,
    prefilled: bool,
    error: Option<String>,
    waker: Option<Waker>,
    last_data_at: Instant,
    stderr_tail: VecDeque<String>,
}

/// A single FFmpeg child process producing an MPEG-TS byte stream,
/// exposed as a `futures_util::Stream<Item = Result<Bytes, io::Error>>`.
/// Owns the child process: dropping this drops the process (SIGKILL via
/// `kill_on_drop`) and aborts the reader/stderr pump tasks.
pub struct TranscodeProcess {
    state: Arc<Mutex<BufferState>>,
    _child: Child,
    reader_handle: JoinHandle<()>,
    stderr_handle: JoinHandle<()>,
    pub last_fatal_stderr: Arc<Mutex<Option<String>>>,
}

impl TranscodeProcess {
    /// Set once the stderr classifier has seen a fatal demux line
    /// (§4.4's `FatalDemuxError`). The process isn't killed on the
    /// spot — ffmpeg is typically already on its way out — but callers
    /// use this to distinguish a clean EOF from a fatal one so the
    /// broadcaster logs and advances rather than treating it as a
    /// normal end-of-item.
    pub fn fatal_stderr(&self) -> Option<String> {
        self.last_fatal_stderr.lock().unwrap().clone()
    }
}

impl TranscodeProcess {
    pub fn spawn(mut command: Command, config: TranscodeBufferConfig) -> std::io::Result<Self> {
        let mut child = command.spawn()?;
        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");

        let state = Arc::new(Mutex::new(BufferState {
            chunks: VecDeque::new(),
            bytes_buffered: 0,
            bytes_sent: 0,
            finished: false,
            prefilled: false,
            error: None,
            waker: None,
            last_data_at: Instant::now(),
            stderr_tail: VecDeque::with_capacity(STDERR_TAIL_LINES),
        }));

        let last_fatal_stderr = Arc::new(Mutex::new(None));

        let reader_state = state.clone();
        let reader_handle = tokio::spawn(async move {
            reader_task(stdout, reader_state, config).await;
        });

        let stderr_state = state.clone();
        let stderr_fatal = last_fatal_stderr.clone();
        let stderr_handle = tokio::spawn(async move {
            stderr_task(stderr, stderr_state, stderr_fatal).await;
        });

        Ok(Self {
            state,
            _child: child,
            reader_handle,
            stderr_handle,
            last_fatal_stderr,
        })
    }

    pub fn seconds_since_last_data(&self) -> Duration {
        self.state.lock().unwrap().last_data_at.elapsed()
    }

    pub fn is_finished(&self) -> bool {
        self.state.lock().unwrap().finished
    }

    /// Last 10 stderr lines seen so far, oldest first. Attached to
    /// `FirstChunkTimeout`/`FatalDemuxError` logs so a failure carries
    /// the ffmpeg output that explains it.
    pub fn stderr_tail(&self) -> Vec<String> {
        self.state.lock().unwrap().stderr_tail.iter().cloned().collect()
    }
}

impl Stream for TranscodeProcess {
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut state = self.state.lock().unwrap();

        if !state.prefilled && !state.finished && state.bytes_buffered < 1 {
            state.waker = Some(cx.waker().clone());
            return Poll::Pending;
        }

        if let Some(err) = state.error.take() {
            return Poll::Ready(Some(Err(std::io::Error::new(ErrorKind::Other, err))));
        }

        if let Some(chunk) = state.chunks.pop_front() {
            state.bytes_buffered -= chunk.len();
            state.bytes_sent += chunk.len() as u64;
            return Poll::Ready(Some(Ok(chunk)));
        }

        if state.finished {
            return Poll::Ready(None);
        }

        state.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl Drop for TranscodeProcess {
    fn drop(&mut self) {
        self.reader_handle.abort();
        self.stderr_handle.abort();
    }
}

async fn reader_task(
    mut stdout: tokio::process::ChildStdout,
    state: Arc<Mutex<BufferState>>,
    config: TranscodeBufferConfig,
) {
    let mut buf = vec![0u8; config.read_chunk_size];
    loop {
        match stdout.read(&mut buf).await {
            Ok(0) => {
                let mut state = state.lock().unwrap();
                state.finished = true;
                if let Some(waker) = state.waker.take() {
                    waker.wake();
                }
                break;
            }
            Ok(n) => {
                let chunk = Bytes::copy_from_slice(&buf[..n]);
                let mut state = state.lock().unwrap();
                state.bytes_buffered += chunk.len();
                state.chunks.push_back(chunk);
                state.last_data_at = Instant::now();
                if state.bytes_buffered >= config.prefill_bytes {
                    state.prefilled = true;
                }
                if let Some(waker) = state.waker.take() {
                    waker.wake();
                }
            }
            Err(e) => {
                let mut state = state.lock().unwrap();
                state.error = Some(e.to_string());
                state.finished = true;
                if let Some(waker) = state.waker.take() {
                    waker.wake();
                }
                break;
            }
        }
    }
}

async fn stderr_task(
    stderr: tokio::process::ChildStderr,
    state: Arc<Mutex<BufferState>>,
    last_fatal: Arc<Mutex<Option<String>>>,
) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        {
            let mut state = state.lock().unwrap();
            if state.stderr_tail.len() >= STDERR_TAIL_LINES {
                state.stderr_tail.pop_front();
            }
            state.stderr_tail.push_back(line.clone());
        }
        match classify_stderr_line(&line) {
            StderrSeverity::Debug => tracing::debug!(ffmpeg_stderr = %line),
            StderrSeverity::Warning => tracing::warn!(ffmpeg_stderr = %line),
            StderrSeverity::Error => tracing::error!(ffmpeg_stderr = %line),
            StderrSeverity::FatalDemux => {
                tracing::error!(ffmpeg_stderr = %line, "fatal demux error");
                *last_fatal.lock().unwrap() = Some(line.clone());
                let mut state = state.lock().unwrap();
                state.prefilled = true;
                if let Some(waker) = state.waker.take() {
                    waker.wake();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_fatal_demux_errors() {
        assert_eq!(
            classify_stderr_line("Error during demuxing: Input/output error"),
            StderrSeverity::FatalDemux
        );
    }

    #[test]
    fn classifies_routine_warnings() {
        assert_eq!(classify_stderr_line("Non-monotonic DTS, warning"), StderrSeverity::Warning);
    }

    #[test]
    fn classifies_plain_info_as_debug() {
        assert_eq!(classify_stderr_line("Input #0, mov,mp4,m4a"), StderrSeverity::Debug);
    }

    #[test]
    fn downgrades_reconnect_chatter_to_debug() {
        assert_eq!(
            classify_stderr_line("HLS request failed, will reconnect at 12.34 due to end of file"),
            StderrSeverity::Debug
        );
        assert_eq!(
            classify_stderr_line("http: will reconnect at 1.00, error=Input/output error"),
            StderrSeverity::Debug
        );
    }

    #[test]
    fn downgrades_hwaccel_init_failure_to_debug() {
        assert_eq!(
            classify_stderr_line("[h264 @ 0x0] hwaccel initialisation returned error"),
            StderrSeverity::Debug
        );
    }
}
