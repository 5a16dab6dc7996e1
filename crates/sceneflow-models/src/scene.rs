//! Scene-change frame records.

use serde::{Deserialize, Serialize};

/// One frame selected by the scene-change filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneFrameRecord {
    /// 1-based frame number (matches the output file sequence)
    pub frame_number: u64,
    /// Presentation timestamp in stream time-base units
    pub pts: i64,
    /// Timestamp in seconds
    pub timestamp: f64,
    /// `HH:MM:SS:FF` timecode
    pub formatted_time: String,
    /// Frame rate used to derive the frame component of the timecode
    pub fps: f64,
}
