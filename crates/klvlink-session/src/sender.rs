use std::sync::atomic::{AtomicBool, Ordering};

use klvlink_codec::Telemetry;
use klvlink_transport::DatagramChannel;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::SenderConfig;
use crate::error::{Result, SessionError};
use crate::source::{FrameSource, TelemetrySource};
use crate::wire::{encode_datagram, Datagram, FieldMap, Metadata, TelemetryItem};

/// What happened to one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The datagram was handed to the transport.
    Sent { frame_id: u64, size: usize },
    /// The serialized datagram exceeded the size ceiling and was not sent.
    Oversize { frame_id: u64, size: usize },
    /// The transport refused the datagram.
    Failed { frame_id: u64 },
}

/// Sender loop counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SenderStats {
    pub sent: u64,
    pub dropped_oversize: u64,
    pub send_errors: u64,
    pub bytes_sent: u64,
    /// Frames whose metadata carried telemetry items.
    pub with_telemetry: u64,
}

/// Pairs frames with metadata and sends them as datagrams.
///
/// Frame ids start at 0 and advance for every frame, including frames that
/// are dropped.
pub struct Sender<C> {
    channel: C,
    config: SenderConfig,
    next_frame_id: u64,
    stats: SenderStats,
}

impl<C: DatagramChannel> Sender<C> {
    pub fn new(channel: C, config: SenderConfig) -> Self {
        Self {
            channel,
            config,
            next_frame_id: 0,
            stats: SenderStats::default(),
        }
    }

    /// Build, serialize and send one frame.
    ///
    /// Oversize datagrams and transport failures are counted and reported
    /// through [`SendOutcome`]; only serialization bugs are returned as errors.
    pub fn send_frame(
        &mut self,
        image: Vec<u8>,
        telemetry: Option<Telemetry>,
        now_secs: f64,
    ) -> Result<SendOutcome> {
        let frame_id = self.next_frame_id;
        self.next_frame_id += 1;

        let metadata = build_metadata(frame_id, telemetry, now_secs);
        let with_telemetry = matches!(metadata, Metadata::Items(_));
        let datagram = Datagram {
            metadata,
            image,
            frame_id: Some(frame_id),
        };

        let bytes = match encode_datagram(&datagram, self.config.max_datagram_size) {
            Ok(bytes) => bytes,
            Err(SessionError::OversizeDatagram { size, max }) => {
                warn!(frame_id, size, max, "frame too big, skipping");
                self.stats.dropped_oversize += 1;
                return Ok(SendOutcome::Oversize { frame_id, size });
            }
            Err(err) => return Err(err),
        };

        match self.channel.send_datagram(&bytes) {
            Ok(size) => {
                self.stats.sent += 1;
                self.stats.bytes_sent += size as u64;
                if with_telemetry {
                    self.stats.with_telemetry += 1;
                }
                debug!(frame_id, size, with_telemetry, "sent frame");
                Ok(SendOutcome::Sent { frame_id, size })
            }
            Err(err) => {
                warn!(frame_id, error = %err, "failed to send frame");
                self.stats.send_errors += 1;
                Ok(SendOutcome::Failed { frame_id })
            }
        }
    }

    /// Send frames until the source is exhausted, `max_frames` is reached or
    /// `cancel` is set. The flag is checked before every frame.
    pub fn run(
        &mut self,
        frames: &mut impl FrameSource,
        telemetry: &mut impl TelemetrySource,
        cancel: &AtomicBool,
    ) -> Result<SenderStats> {
        loop {
            if cancel.load(Ordering::SeqCst) {
                info!("sender cancelled");
                break;
            }
            if self
                .config
                .max_frames
                .is_some_and(|max| self.next_frame_id >= max)
            {
                break;
            }
            let Some(image) = frames.next_frame()? else {
                break;
            };

            let sample = telemetry.latest();
            self.send_frame(image, sample, crate::unix_time_secs())?;

            if !self.config.frame_interval.is_zero() {
                std::thread::sleep(self.config.frame_interval);
            }
        }

        info!(
            sent = self.stats.sent,
            dropped = self.stats.dropped_oversize,
            errors = self.stats.send_errors,
            "sender finished"
        );
        Ok(self.stats)
    }

    pub fn stats(&self) -> SenderStats {
        self.stats
    }

    /// Id the next frame will carry.
    pub fn next_frame_id(&self) -> u64 {
        self.next_frame_id
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }
}

/// Item metadata when `telemetry` is present and within domain, otherwise
/// the field-map fallback.
pub fn build_metadata(frame_id: u64, telemetry: Option<Telemetry>, now_secs: f64) -> Metadata {
    match telemetry {
        Some(sample) if !sample.is_empty() => match sample.to_items() {
            Ok(_) => Metadata::Items(TelemetryItem::from_telemetry(&sample)),
            Err(err) => {
                warn!(frame_id, error = %err, "telemetry not encodable, using field map");
                Metadata::Fields(FieldMap::new(frame_id, now_secs))
            }
        },
        _ => Metadata::Fields(FieldMap::new(frame_id, now_secs)),
    }
}
