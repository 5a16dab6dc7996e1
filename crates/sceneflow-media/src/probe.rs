//! Frame-rate resolution via FFprobe with a MediaInfo fallback, plus the raw
//! container/stream description reported alongside a run.

use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};

/// Frame rate used when no probe yields a usable value.
pub const FALLBACK_FPS: f64 = 30.0;

/// Some containers report exactly 60 for variable-rate content.
const SUSPECT_FPS: f64 = 60.0;

const PROBE_TIMEOUT: Duration = Duration::from_secs(15);

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
}

/// MediaInfo `--Output=JSON` format.
#[derive(Debug, Deserialize)]
struct MediaInfoOutput {
    media: Option<MediaInfoMedia>,
}

#[derive(Debug, Deserialize)]
struct MediaInfoMedia {
    #[serde(default)]
    track: Vec<MediaInfoTrack>,
}

#[derive(Debug, Deserialize)]
struct MediaInfoTrack {
    #[serde(rename = "@type")]
    kind: String,
    /// String in most builds, number in some
    #[serde(rename = "FrameRate")]
    frame_rate: Option<Value>,
    /// Nominal rate some muxers keep next to an adjusted `FrameRate`
    #[serde(rename = "FrameRate_Original")]
    frame_rate_original: Option<Value>,
}

/// Resolve the frame rate of a video. Never fails.
///
/// Candidates are tried in order: FFprobe `avg_frame_rate`, FFprobe
/// `r_frame_rate`, MediaInfo `FrameRate`, MediaInfo `FrameRate_Original`.
/// Falls back to [`FALLBACK_FPS`].
pub async fn resolve_fps(path: impl AsRef<Path>) -> f64 {
    let path = path.as_ref();
    let mut candidates = Vec::with_capacity(4);

    match run_ffprobe(path).await {
        Ok(json) => match parse_ffprobe_rates(&json) {
            Ok((avg, r)) => {
                candidates.push(avg);
                candidates.push(r);
            }
            Err(e) => warn!("Could not parse ffprobe output: {}", e),
        },
        Err(e) => warn!("ffprobe unavailable for fps detection: {}", e),
    }

    if select_fps(&candidates).is_none() {
        match run_mediainfo(path).await {
            Ok(json) => match parse_mediainfo_rates(&json) {
                Ok(rates) => candidates.extend(rates),
                Err(e) => warn!("Could not parse mediainfo output: {}", e),
            },
            Err(e) => debug!("mediainfo unavailable for fps detection: {}", e),
        }
    }

    match select_fps(&candidates) {
        Some(fps) => {
            info!(fps, "Resolved frame rate for {}", path.display());
            fps
        }
        None => {
            warn!(
                "No usable frame rate for {}, using {}",
                path.display(),
                FALLBACK_FPS
            );
            FALLBACK_FPS
        }
    }
}

/// First acceptable candidate, in order.
pub fn select_fps(candidates: &[Option<f64>]) -> Option<f64> {
    candidates.iter().flatten().copied().find(|&fps| is_usable(fps))
}

fn is_usable(fps: f64) -> bool {
    fps.is_finite() && fps > 0.0 && fps != SUSPECT_FPS
}

/// Parse a rate such as `"30000/1001"`, `"30/1"` or `"29.97"`.
///
/// `"0/0"` and other zero denominators yield `None`.
pub fn parse_frame_rate(s: &str) -> Option<f64> {
    let s = s.trim();
    if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.trim().parse().ok()?;
        let den: f64 = den.trim().parse().ok()?;
        if den > 0.0 {
            return Some(num / den);
        }
        return None;
    }
    s.parse().ok()
}

/// Extract `(avg_frame_rate, r_frame_rate)` of the first stream.
fn parse_ffprobe_rates(json: &[u8]) -> MediaResult<(Option<f64>, Option<f64>)> {
    let probe: FfprobeOutput = serde_json::from_slice(json)?;
    let Some(stream) = probe.streams.first() else {
        return Ok((None, None));
    };

    Ok((
        stream.avg_frame_rate.as_deref().and_then(parse_frame_rate),
        stream.r_frame_rate.as_deref().and_then(parse_frame_rate),
    ))
}

/// Extract the video track `FrameRate` and `FrameRate_Original`, in that
/// order. Empty when there is no video track.
fn parse_mediainfo_rates(json: &[u8]) -> MediaResult<Vec<Option<f64>>> {
    let info: MediaInfoOutput = serde_json::from_slice(json)?;
    let Some(track) = info
        .media
        .into_iter()
        .flat_map(|m| m.track)
        .find(|t| t.kind == "Video")
    else {
        return Ok(Vec::new());
    };

    Ok(vec![
        track.frame_rate.and_then(rate_value),
        track.frame_rate_original.and_then(rate_value),
    ])
}

fn rate_value(v: Value) -> Option<f64> {
    match v {
        Value::String(s) => parse_frame_rate(&s),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// Full FFprobe description (`format` and `streams`) of a video.
///
/// Returns `None` when ffprobe is missing, fails, or prints something other
/// than a JSON object.
pub async fn read_video_info(path: impl AsRef<Path>) -> Option<Value> {
    let path = path.as_ref();
    let json = match run_ffprobe_info(path).await {
        Ok(json) => json,
        Err(e) => {
            debug!("Video info unavailable for {}: {}", path.display(), e);
            return None;
        }
    };

    match parse_video_info(&json) {
        Ok(info) => Some(info),
        Err(e) => {
            warn!("Could not parse ffprobe video info: {}", e);
            None
        }
    }
}

fn parse_video_info(json: &[u8]) -> MediaResult<Value> {
    let info: Value = serde_json::from_slice(json)?;
    if !info.is_object() {
        return Err(MediaError::probe_failed("ffprobe", "expected a JSON object"));
    }
    Ok(info)
}

async fn run_ffprobe(path: &Path) -> MediaResult<Vec<u8>> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)?;

    let mut cmd = Command::new("ffprobe");
    cmd.args([
        "-v",
        "quiet",
        "-print_format",
        "json",
        "-select_streams",
        "v:0",
        "-show_entries",
        "stream=avg_frame_rate,r_frame_rate",
    ])
    .arg(path);

    run_probe("ffprobe", cmd).await
}

async fn run_ffprobe_info(path: &Path) -> MediaResult<Vec<u8>> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)?;

    let mut cmd = Command::new("ffprobe");
    cmd.args([
        "-v",
        "quiet",
        "-print_format",
        "json",
        "-show_format",
        "-show_streams",
    ])
    .arg(path);

    run_probe("ffprobe", cmd).await
}

async fn run_mediainfo(path: &Path) -> MediaResult<Vec<u8>> {
    which::which("mediainfo").map_err(|_| MediaError::probe_failed("mediainfo", "not found in PATH"))?;

    let mut cmd = Command::new("mediainfo");
    cmd.arg("--Output=JSON").arg(path);

    run_probe("mediainfo", cmd).await
}

async fn run_probe(tool: &str, mut cmd: Command) -> MediaResult<Vec<u8>> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = tokio::time::timeout(PROBE_TIMEOUT, cmd.output())
        .await
        .map_err(|_| MediaError::Timeout(PROBE_TIMEOUT.as_secs()))??;

    if !output.status.success() {
        return Err(MediaError::probe_failed(
            tool,
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    Ok(output.stdout)
}
