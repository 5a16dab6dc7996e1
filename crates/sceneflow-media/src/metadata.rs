//! Scene metadata parsed from FFmpeg `showinfo` output.

use regex::Regex;
use sceneflow_models::SceneFrameRecord;
use std::sync::LazyLock;
use tracing::debug;

static SHOWINFO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"n:\s*(\d+)\s.*pts:\s*(\d+)\s.*pts_time:\s*([\d.]+)")
        .unwrap_or_else(|e| panic!("invalid showinfo pattern: {e}"))
});

/// Parse every `Parsed_showinfo` line in `text` into a scene record.
///
/// Lines that do not match are skipped.
pub fn parse_metadata(text: &str, fps: f64) -> Vec<SceneFrameRecord> {
    let records: Vec<SceneFrameRecord> = text
        .lines()
        .filter(|line| line.contains("Parsed_showinfo"))
        .filter_map(|line| parse_line(line, fps))
        .collect();

    debug!(count = records.len(), "Parsed scene metadata");
    records
}

fn parse_line(line: &str, fps: f64) -> Option<SceneFrameRecord> {
    let caps = SHOWINFO_RE.captures(line)?;
    let n: u64 = caps[1].parse().ok()?;
    let pts: i64 = caps[2].parse().ok()?;
    let timestamp: f64 = caps[3].parse().ok()?;

    Some(SceneFrameRecord {
        frame_number: n + 1,
        pts,
        timestamp,
        formatted_time: format_timecode(timestamp, fps),
        fps,
    })
}

/// Format seconds as `HH:MM:SS:FF` where `FF` is the frame within the second.
pub fn format_timecode(seconds: f64, fps: f64) -> String {
    let seconds = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
    let whole = seconds.trunc() as u64;
    let frames = (seconds.fract() * fps).trunc() as u64;

    format!(
        "{:02}:{:02}:{:02}:{:02}",
        whole / 3600,
        (whole % 3600) / 60,
        whole % 60,
        frames
    )
}
