//! Frame image decoding for the video output stream.
//!
//! Frames travel as compressed images; the video stream stores raw RGB24
//! frames at a fixed resolution. Images of another size are resampled with
//! nearest-neighbour scaling.

use crate::error::{Result, SessionError};

/// A decoded frame in packed RGB24.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbFrame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl RgbFrame {
    pub const BYTES_PER_PIXEL: usize = 3;

    /// Wrap packed RGB24 pixels, checking the buffer size.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = Self::frame_len(width, height);
        if pixels.len() != expected || expected == 0 {
            return Err(SessionError::ImageDecode(format!(
                "expected {expected} RGB bytes for {width}x{height}, got {}",
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Size in bytes of one `width`x`height` RGB24 frame.
    pub fn frame_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * Self::BYTES_PER_PIXEL
    }

    /// Resample to `width`x`height` with nearest-neighbour scaling.
    pub fn fit(self, width: u32, height: u32) -> Self {
        if self.width == width && self.height == height {
            return self;
        }

        let src_w = self.width as usize;
        let src_h = self.height as usize;
        let (dst_w, dst_h) = (width as usize, height as usize);
        let mut pixels = Vec::with_capacity(Self::frame_len(width, height));
        for y in 0..dst_h {
            let sy = y * src_h / dst_h;
            let row = &self.pixels[sy * src_w * 3..(sy + 1) * src_w * 3];
            for x in 0..dst_w {
                let sx = x * src_w / dst_w;
                pixels.extend_from_slice(&row[sx * 3..sx * 3 + 3]);
            }
        }

        Self {
            width,
            height,
            pixels,
        }
    }
}

/// Turns an encoded frame into raw pixels.
pub trait FrameDecoder {
    fn decode(&mut self, encoded: &[u8]) -> Result<RgbFrame>;
}

/// Expand 1-, 3- or 4-channel interleaved pixels to RGB24.
pub fn to_rgb24(pixels: Vec<u8>, width: u32, height: u32) -> Result<RgbFrame> {
    let count = width as usize * height as usize;
    if count == 0 || pixels.len() % count != 0 {
        return Err(SessionError::ImageDecode(format!(
            "{} pixel bytes do not fit {width}x{height}",
            pixels.len()
        )));
    }

    let rgb = match pixels.len() / count {
        3 => pixels,
        1 => pixels.iter().flat_map(|&v| [v, v, v]).collect(),
        4 => pixels
            .chunks_exact(4)
            .flat_map(|px| [px[0], px[1], px[2]])
            .collect(),
        channels => {
            return Err(SessionError::ImageDecode(format!(
                "unsupported channel count {channels}"
            )))
        }
    };
    RgbFrame::new(width, height, rgb)
}

#[cfg(feature = "jpeg")]
mod jpeg {
    use tracing::trace;
    use zune_jpeg::JpegDecoder as ZuneJpegDecoder;

    use super::{to_rgb24, FrameDecoder, RgbFrame};
    use crate::error::{Result, SessionError};

    /// JPEG decoder using zune-jpeg (pure Rust).
    #[derive(Debug, Default)]
    pub struct JpegFrameDecoder {
        frames_decoded: u64,
    }

    impl JpegFrameDecoder {
        pub fn new() -> Self {
            Self::default()
        }

        /// Number of frames decoded so far.
        pub fn frame_count(&self) -> u64 {
            self.frames_decoded
        }
    }

    impl FrameDecoder for JpegFrameDecoder {
        fn decode(&mut self, encoded: &[u8]) -> Result<RgbFrame> {
            let mut decoder = ZuneJpegDecoder::new(encoded);

            decoder.decode_headers().map_err(|e| {
                SessionError::ImageDecode(format!("JPEG header decode failed: {e:?}"))
            })?;
            let info = decoder
                .info()
                .ok_or_else(|| SessionError::ImageDecode("missing JPEG info".to_string()))?;

            let pixels = decoder
                .decode()
                .map_err(|e| SessionError::ImageDecode(format!("JPEG decode failed: {e:?}")))?;

            let frame = to_rgb24(pixels, info.width as u32, info.height as u32)?;
            self.frames_decoded += 1;
            trace!(
                width = frame.width,
                height = frame.height,
                "decoded jpeg frame"
            );
            Ok(frame)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn garbage_is_an_image_decode_error() {
            let mut decoder = JpegFrameDecoder::new();
            let err = decoder.decode(b"definitely not a jpeg").unwrap_err();
            assert!(matches!(err, SessionError::ImageDecode(_)));
            assert_eq!(decoder.frame_count(), 0);
        }

        #[test]
        fn empty_input_is_an_image_decode_error() {
            let mut decoder = JpegFrameDecoder::new();
            assert!(matches!(
                decoder.decode(&[]),
                Err(SessionError::ImageDecode(_))
            ));
        }
    }
}

#[cfg(feature = "jpeg")]
pub use jpeg::JpegFrameDecoder;
