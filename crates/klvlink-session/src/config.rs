use std::path::{Path, PathBuf};
use std::time::Duration;

use klvlink_transport::MAX_DATAGRAM_SIZE;
use serde::{Deserialize, Serialize};

/// Default sender rate in frames per second.
pub const DEFAULT_FRAME_RATE: f64 = 30.0;

/// Default receiver socket read timeout.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(250);

/// Default output video resolution.
pub const DEFAULT_RESOLUTION: (u32, u32) = (640, 480);

/// Sender loop configuration.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Pause after each frame. Default: 1/30 s.
    pub frame_interval: Duration,
    /// Serialized datagrams above this size are dropped. Default: 65 000.
    pub max_datagram_size: usize,
    /// Stop after this many frames have been attempted.
    pub max_frames: Option<u64>,
}

impl SenderConfig {
    /// Configuration pacing frames at `fps`. Non-positive or non-finite rates
    /// disable pacing; rates too slow for a `Duration` saturate at
    /// [`Duration::MAX`].
    pub fn with_fps(fps: f64) -> Self {
        let frame_interval = if fps.is_finite() && fps > 0.0 {
            Duration::try_from_secs_f64(1.0 / fps).unwrap_or(Duration::MAX)
        } else {
            Duration::ZERO
        };
        Self {
            frame_interval,
            ..Self::default()
        }
    }
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_secs_f64(1.0 / DEFAULT_FRAME_RATE),
            max_datagram_size: MAX_DATAGRAM_SIZE,
            max_frames: None,
        }
    }
}

/// Per-frame log line encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineFormat {
    /// Comma-separated values with a header row.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Receiver loop configuration.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Socket read timeout; bounds how long cancellation can go unnoticed.
    pub read_timeout: Duration,
    /// Output video width in pixels.
    pub width: u32,
    /// Output video height in pixels.
    pub height: u32,
    pub log_format: LineFormat,
    /// Stop after this many frames have been stored.
    pub max_frames: Option<u64>,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            read_timeout: DEFAULT_READ_TIMEOUT,
            width: DEFAULT_RESOLUTION.0,
            height: DEFAULT_RESOLUTION.1,
            log_format: LineFormat::default(),
            max_frames: None,
        }
    }
}

/// Locations of the four receiver outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    /// Raw RGB24 frames, concatenated.
    pub video: PathBuf,
    /// Canonical KLV packets, concatenated.
    pub metadata: PathBuf,
    /// One line per stored frame.
    pub log: PathBuf,
    /// One JSON frame record per line.
    pub index: PathBuf,
}

impl OutputPaths {
    /// Standard file names under `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            video: dir.join("output.rgb"),
            metadata: dir.join("output.klv"),
            log: dir.join("output_log.txt"),
            index: dir.join("frame_index.jsonl"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let sender = SenderConfig::default();
        assert_eq!(sender.max_datagram_size, 65_000);
        assert!(sender.frame_interval > Duration::from_millis(33));
        assert!(sender.frame_interval < Duration::from_millis(34));

        let receiver = ReceiverConfig::default();
        assert_eq!(receiver.read_timeout, Duration::from_millis(250));
        assert_eq!((receiver.width, receiver.height), (640, 480));
        assert_eq!(receiver.log_format, LineFormat::Text);
    }

    #[test]
    fn fps_sets_interval() {
        assert_eq!(
            SenderConfig::with_fps(4.0).frame_interval,
            Duration::from_millis(250)
        );
        assert_eq!(SenderConfig::with_fps(0.0).frame_interval, Duration::ZERO);
        assert_eq!(
            SenderConfig::with_fps(f64::NAN).frame_interval,
            Duration::ZERO
        );
    }

    #[test]
    fn vanishing_fps_saturates_instead_of_panicking() {
        assert_eq!(SenderConfig::with_fps(1e-20).frame_interval, Duration::MAX);
        assert_eq!(SenderConfig::with_fps(1e-300).frame_interval, Duration::MAX);
        assert_eq!(
            SenderConfig::with_fps(0.25).frame_interval,
            Duration::from_secs(4)
        );
    }

    #[test]
    fn output_paths_share_directory() {
        let paths = OutputPaths::in_dir("/tmp/session");
        assert_eq!(paths.video, Path::new("/tmp/session/output.rgb"));
        assert_eq!(paths.metadata, Path::new("/tmp/session/output.klv"));
        assert_eq!(paths.log, Path::new("/tmp/session/output_log.txt"));
        assert_eq!(paths.index, Path::new("/tmp/session/frame_index.jsonl"));
    }
}
