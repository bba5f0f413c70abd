//! Recorder configuration
//!
//! Geometry, timing and encoder defaults. Every field has a default so a
//! partial JSON file is enough to override a single value.

use crate::utils::error::{RecorderError, RecorderResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// What a device change does while a recording is running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HotSwapPolicy {
    /// Refuse the change with `RecorderError::RecordingInProgress`
    #[default]
    Reject,
    /// Finalize the running recording (discarding it) and restart on the new device
    StopAndRestart,
}

/// Audio processing hints passed to the platform with every acquisition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AudioProcessing {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    pub sample_rate: u32,
    pub sample_size: u16,
    pub channel_count: u16,
}

impl Default for AudioProcessing {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
            sample_rate: 48_000,
            sample_size: 16,
            channel_count: 1,
        }
    }
}

/// Recorder configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecorderConfig {
    /// Long side of requested capture and of the render surface
    pub long_side: u32,

    /// Short side of requested capture
    pub short_side: u32,

    /// Viewports narrower than this are candidates for portrait capture
    pub narrow_viewport_width: u32,

    /// Ideal (and maximum) capture frame rate
    pub frame_rate: u32,

    /// Frame rate at which the encoder samples the render surface
    pub capture_frame_rate: u32,

    /// Redraw period of the compositor (one display refresh)
    pub redraw_interval_ms: u64,

    /// Interval at which the encoder hands over data
    pub timeslice_ms: u64,

    /// Best-effort wait for a pending device rotation before re-reading
    /// the delivered geometry. Zero disables the re-read.
    pub rotation_settle_ms: u64,

    pub video_bits_per_second: u32,
    pub audio_bits_per_second: u32,

    pub audio: AudioProcessing,

    /// Encoder MIME types in descending preference
    pub mime_preferences: Vec<String>,

    pub hot_swap_policy: HotSwapPolicy,
}

/// Used when no preferred MIME type is supported
pub const FALLBACK_MIME_TYPE: &str = "video/webm";

pub fn default_mime_preferences() -> Vec<String> {
    [
        "video/mp4;codecs=h264,aac",
        "video/mp4;codecs=h264",
        "video/webm;codecs=vp9,opus",
        "video/webm;codecs=vp8,opus",
        FALLBACK_MIME_TYPE,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            long_side: 640,
            short_side: 360,
            narrow_viewport_width: 768,
            frame_rate: 30,
            capture_frame_rate: 30,
            redraw_interval_ms: 16,
            timeslice_ms: 100,
            rotation_settle_ms: 500,
            video_bits_per_second: 800_000,
            audio_bits_per_second: 128_000,
            audio: AudioProcessing::default(),
            mime_preferences: default_mime_preferences(),
            hot_swap_policy: HotSwapPolicy::default(),
        }
    }
}

impl RecorderConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> RecorderResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RecorderConfig = serde_json::from_str(&content)?;
        config.validate()?;
        tracing::debug!("Loaded recorder config from {:?}", path);
        Ok(config)
    }

    /// Check the invariants the recorder relies on
    pub fn validate(&self) -> RecorderResult<()> {
        if self.long_side == 0 || self.short_side == 0 {
            return Err(RecorderError::Config(
                "longSide and shortSide must be non-zero".to_string(),
            ));
        }
        if self.short_side > self.long_side {
            return Err(RecorderError::Config(format!(
                "shortSide ({}) exceeds longSide ({})",
                self.short_side, self.long_side
            )));
        }
        // 9:16 surfaces need an integral short side
        if self.long_side % 16 != 0 {
            return Err(RecorderError::Config(format!(
                "longSide ({}) must be a multiple of 16",
                self.long_side
            )));
        }
        if self.frame_rate == 0 || self.capture_frame_rate == 0 {
            return Err(RecorderError::Config("frame rates must be non-zero".to_string()));
        }
        if self.timeslice_ms == 0 || self.redraw_interval_ms == 0 {
            return Err(RecorderError::Config(
                "timeslice and redraw interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeslice(&self) -> Duration {
        Duration::from_millis(self.timeslice_ms)
    }

    pub fn redraw_interval(&self) -> Duration {
        Duration::from_millis(self.redraw_interval_ms)
    }

    pub fn rotation_settle(&self) -> Duration {
        Duration::from_millis(self.rotation_settle_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        let config = RecorderConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.mime_preferences.last().map(String::as_str), Some(FALLBACK_MIME_TYPE));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("recorder.json");
        std::fs::write(&path, r#"{ "rotationSettleMs": 250, "hotSwapPolicy": "stopAndRestart" }"#)
            .unwrap();

        let config = RecorderConfig::load(&path).unwrap();
        assert_eq!(config.rotation_settle_ms, 250);
        assert_eq!(config.hot_swap_policy, HotSwapPolicy::StopAndRestart);
        assert_eq!(config.long_side, 640);
        assert!(config.audio.echo_cancellation);
    }

    #[test]
    fn test_rejects_long_side_not_multiple_of_16() {
        let config = RecorderConfig {
            long_side: 650,
            ..RecorderConfig::default()
        };
        assert!(matches!(config.validate(), Err(RecorderError::Config(_))));
    }

    #[test]
    fn test_rejects_short_side_larger_than_long_side() {
        let config = RecorderConfig {
            short_side: 1280,
            ..RecorderConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
