//! Inputs for the sender loop.

use std::collections::VecDeque;
use std::io::BufRead;
use std::path::{Path, PathBuf};

use klvlink_codec::Telemetry;
use tracing::debug;

use crate::error::{Result, SessionError};

/// Produces encoded frames, one per call, until exhausted.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<Vec<u8>>>;
}

/// Provides the most recent telemetry sample, if any, without blocking.
pub trait TelemetrySource {
    fn latest(&mut self) -> Option<Telemetry>;
}

impl FrameSource for VecDeque<Vec<u8>> {
    fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.pop_front())
    }
}

/// A telemetry source that never has a sample.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTelemetry;

impl TelemetrySource for NoTelemetry {
    fn latest(&mut self) -> Option<Telemetry> {
        None
    }
}

/// JPEG files from a directory, in file name order.
#[derive(Debug, Clone)]
pub struct DirectoryFrames {
    paths: Vec<PathBuf>,
    cursor: usize,
    looping: bool,
}

impl DirectoryFrames {
    /// Collect `*.jpg`/`*.jpeg` files in `dir`. Fails if there are none.
    pub fn open(dir: impl AsRef<Path>, looping: bool) -> Result<Self> {
        let dir = dir.as_ref();
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let is_jpeg = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"));
            if is_jpeg && path.is_file() {
                paths.push(path);
            }
        }
        if paths.is_empty() {
            return Err(SessionError::Source(format!(
                "no .jpg or .jpeg files in {}",
                dir.display()
            )));
        }
        paths.sort();
        debug!(dir = %dir.display(), frames = paths.len(), looping, "opened frame directory");
        Ok(Self {
            paths,
            cursor: 0,
            looping,
        })
    }

    /// Number of distinct frame files.
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl FrameSource for DirectoryFrames {
    fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        if self.cursor == self.paths.len() {
            if !self.looping {
                return Ok(None);
            }
            self.cursor = 0;
        }
        let path = &self.paths[self.cursor];
        self.cursor += 1;
        Ok(Some(std::fs::read(path)?))
    }
}

/// Replays recorded telemetry, one sample per frame.
///
/// Once the samples run out the last one keeps being reported, the way a
/// stale "latest position" would be.
#[derive(Debug, Clone, Default)]
pub struct TelemetryReplay {
    samples: Vec<Telemetry>,
    cursor: usize,
}

impl TelemetryReplay {
    pub fn new(samples: Vec<Telemetry>) -> Self {
        Self { samples, cursor: 0 }
    }

    /// Parse JSON lines, one [`Telemetry`] object per line. Blank lines are skipped.
    pub fn from_jsonl(reader: impl BufRead) -> Result<Self> {
        let mut samples = Vec::new();
        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            samples.push(serde_json::from_str(line)?);
        }
        Ok(Self::new(samples))
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl TelemetrySource for TelemetryReplay {
    fn latest(&mut self) -> Option<Telemetry> {
        let sample = self.samples.get(self.cursor).or(self.samples.last()).copied();
        if self.cursor < self.samples.len() {
            self.cursor += 1;
        }
        sample
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::*;

    fn unique_temp_dir(tag: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!(
            "klvlink-source-{tag}-{}-{nanos}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn directory_frames_in_name_order() {
        let dir = unique_temp_dir("order");
        std::fs::write(dir.join("b.jpg"), b"second").unwrap();
        std::fs::write(dir.join("a.JPEG"), b"first").unwrap();
        std::fs::write(dir.join("notes.txt"), b"ignored").unwrap();

        let mut frames = DirectoryFrames::open(&dir, false).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames.next_frame().unwrap().unwrap(), b"first");
        assert_eq!(frames.next_frame().unwrap().unwrap(), b"second");
        assert!(frames.next_frame().unwrap().is_none());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn directory_frames_loop() {
        let dir = unique_temp_dir("loop");
        std::fs::write(dir.join("only.jpg"), b"frame").unwrap();

        let mut frames = DirectoryFrames::open(&dir, true).unwrap();
        for _ in 0..3 {
            assert_eq!(frames.next_frame().unwrap().unwrap(), b"frame");
        }

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn empty_directory_is_a_source_error() {
        let dir = unique_temp_dir("empty");
        let err = DirectoryFrames::open(&dir, false).unwrap_err();
        assert!(matches!(err, SessionError::Source(_)));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn replay_holds_last_sample() {
        let input = "{\"timestamp_micros\":1,\"latitude\":10.0}\n\n{\"timestamp_micros\":2}\n";
        let mut replay = TelemetryReplay::from_jsonl(Cursor::new(input)).unwrap();
        assert_eq!(replay.len(), 2);

        assert_eq!(replay.latest().unwrap().latitude, Some(10.0));
        assert_eq!(replay.latest().unwrap().timestamp_micros, Some(2));
        assert_eq!(replay.latest().unwrap().timestamp_micros, Some(2));
    }

    #[test]
    fn replay_rejects_bad_json() {
        let err = TelemetryReplay::from_jsonl(Cursor::new("not json\n")).unwrap_err();
        assert!(matches!(err, SessionError::Json(_)));
    }

    #[test]
    fn empty_sources() {
        assert!(TelemetryReplay::default().latest().is_none());
        assert!(NoTelemetry.latest().is_none());
        let mut queue: VecDeque<Vec<u8>> = VecDeque::new();
        assert!(queue.next_frame().unwrap().is_none());
    }
}
