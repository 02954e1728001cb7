//! Subprocess frame decoding.
//!
//! Encoded bytes go to the decoder's stdin from a dedicated feeder process
//! while this process drains raw RGB24 frames from the decoder's stdout.
//! Feeding and draining never block each other, whatever the pipe buffer size.

pub mod aggregator;
pub mod args;
pub mod error;
pub mod feeder;
pub mod launcher;
pub mod pipes;
pub mod reaper;

use std::fs::File;
use std::path::PathBuf;

use image::RgbImage;
use ndarray::{Array4, ShapeError};
use serde::Serialize;
use tracing::{debug, info, warn};

pub use error::DecodeError;
pub use feeder::FeedReport;
pub use reaper::ExitSummary;

use args::{decoder_args, ExecArgs, InputSource};
use pipes::PipePair;

/// Bytes per pixel: packed 8-bit RGB.
pub const CHANNELS: usize = 3;

/// Output geometry of one decode call. All fields are strictly positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameGeometry {
    width: u32,
    height: u32,
    num_frames: u32,
}

impl FrameGeometry {
    pub fn new(width: u32, height: u32, num_frames: u32) -> Result<Self, DecodeError> {
        if width == 0 || height == 0 || num_frames == 0 {
            return Err(DecodeError::invalid_request(format!(
                "geometry must be positive, got {}x{} x {} frames",
                width, height, num_frames
            )));
        }
        let geometry = Self { width, height, num_frames };
        geometry.checked_capacity().ok_or_else(|| {
            DecodeError::invalid_request(format!(
                "{}x{} x {} frames does not fit in memory",
                width, height, num_frames
            ))
        })?;
        Ok(geometry)
    }

    #[cfg(test)]
    pub(crate) fn new_unchecked(width: u32, height: u32, num_frames: u32) -> Self {
        Self { width, height, num_frames }
    }

    fn checked_capacity(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)?
            .checked_mul(CHANNELS)?
            .checked_mul(self.num_frames as usize)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn num_frames(&self) -> u32 {
        self.num_frames
    }

    /// Bytes in one frame: `height * width * 3`.
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * CHANNELS
    }

    /// Bytes in the whole buffer: `num_frames * height * width * 3`.
    pub fn capacity(&self) -> usize {
        self.frame_len() * self.num_frames as usize
    }

    /// `[num_frames, height, width, channels]`
    pub fn shape(&self) -> [usize; 4] {
        [
            self.num_frames as usize,
            self.height as usize,
            self.width as usize,
            CHANNELS,
        ]
    }
}

/// Seek position in seconds: finite, non-negative and bounded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeekOffset(f64);

impl SeekOffset {
    pub const MAX_SECONDS: f64 = 1.0e9;

    pub fn new(seconds: f64) -> Result<Self, DecodeError> {
        if !seconds.is_finite() || seconds < 0.0 || seconds > Self::MAX_SECONDS {
            return Err(DecodeError::invalid_request(format!(
                "seek must be within 0..={} seconds, got {}",
                Self::MAX_SECONDS,
                seconds
            )));
        }
        Ok(Self(seconds))
    }

    pub fn seconds(&self) -> f64 {
        self.0
    }
}

impl Default for SeekOffset {
    fn default() -> Self {
        Self(0.0)
    }
}

/// One decode call: borrowed encoded bytes plus the requested output.
#[derive(Debug, Clone, Copy)]
pub struct DecodeRequest<'a> {
    encoded: &'a [u8],
    geometry: FrameGeometry,
    seek: SeekOffset,
}

impl<'a> DecodeRequest<'a> {
    pub fn new(encoded: &'a [u8], geometry: FrameGeometry, seek: SeekOffset) -> Self {
        Self { encoded, geometry, seek }
    }

    pub fn encoded(&self) -> &'a [u8] {
        self.encoded
    }

    pub fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    pub fn seek(&self) -> SeekOffset {
        self.seek
    }
}

/// Owned, zero-initialised frame storage laid out as `[frame][row][col][channel]`.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    geometry: FrameGeometry,
    data: Vec<u8>,
}

impl FrameBuffer {
    pub fn new(geometry: FrameGeometry) -> Self {
        Self {
            geometry,
            data: vec![0; geometry.capacity()],
        }
    }

    pub fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn frame(&self, index: usize) -> Option<&[u8]> {
        self.data.chunks_exact(self.geometry.frame_len()).nth(index)
    }

    pub fn frames(&self) -> impl Iterator<Item = &[u8]> {
        self.data.chunks_exact(self.geometry.frame_len())
    }

    pub fn pixel(&self, frame: usize, row: usize, col: usize) -> Option<[u8; 3]> {
        let g = &self.geometry;
        if row >= g.height as usize || col >= g.width as usize {
            return None;
        }
        let start = (row * g.width as usize + col) * CHANNELS;
        let frame = self.frame(frame)?;
        Some([frame[start], frame[start + 1], frame[start + 2]])
    }

    pub fn frame_image(&self, index: usize) -> Option<RgbImage> {
        let frame = self.frame(index)?;
        RgbImage::from_raw(self.geometry.width, self.geometry.height, frame.to_vec())
    }

    pub fn into_array(self) -> Result<Array4<u8>, ShapeError> {
        Array4::from_shape_vec(self.geometry.shape(), self.data)
    }
}

/// Outcome of a decode call that ran to completion.
#[derive(Debug, Clone, Serialize)]
pub struct DecodeReport {
    pub capacity: usize,
    pub filled: usize,
    /// `capacity - filled`; non-zero means the decoder produced fewer bytes than requested.
    pub shortfall: usize,
    /// Absent for on-disk decodes, where nothing is fed.
    pub feed: Option<FeedReport>,
    pub decoder_exit: ExitSummary,
}

impl DecodeReport {
    pub(crate) fn new(capacity: usize, filled: usize, feed: Option<FeedReport>, decoder_exit: ExitSummary) -> Self {
        Self {
            capacity,
            filled,
            shortfall: capacity.saturating_sub(filled),
            feed,
            decoder_exit,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.shortfall == 0
    }

    pub(crate) fn log(&self) {
        if self.is_complete() {
            info!(bytes = self.filled, "decoded full frame buffer");
        } else {
            warn!(
                filled = self.filled,
                capacity = self.capacity,
                shortfall = self.shortfall,
                decoder_exit = ?self.decoder_exit,
                "decoder produced fewer bytes than requested"
            );
        }

        if let Some(feed) = self.feed.as_ref().filter(|f| f.is_short()) {
            // Expected when the decoder stops reading once the frame cap is reached.
            if self.is_complete() {
                debug!(requested = feed.requested, written = ?feed.written, "decoder stopped reading input early");
            } else {
                warn!(requested = feed.requested, written = ?feed.written, "feeder could not write all input");
            }
        }
    }
}

/// Decoder executable settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderConfig {
    pub program: PathBuf,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
        }
    }
}

/// Runs decode calls against one external decoder.
#[derive(Debug, Clone, Default)]
pub struct FrameDecoder {
    config: DecoderConfig,
}

impl FrameDecoder {
    pub fn new(config: DecoderConfig) -> Self {
        Self { config }
    }

    /// Decodes into a freshly allocated buffer.
    pub fn decode(&self, request: &DecodeRequest<'_>) -> Result<(FrameBuffer, DecodeReport), DecodeError> {
        let mut buffer = FrameBuffer::new(request.geometry());
        let report = self.decode_into(request, buffer.as_bytes_mut())?;
        Ok((buffer, report))
    }

    /// Decodes into a caller-owned buffer of exactly `geometry.capacity()` bytes.
    ///
    /// On a short read the tail of `out` keeps its previous contents.
    pub fn decode_into(&self, request: &DecodeRequest<'_>, out: &mut [u8]) -> Result<DecodeReport, DecodeError> {
        let capacity = request.geometry().capacity();
        if out.len() != capacity {
            return Err(DecodeError::BufferSize {
                expected: capacity,
                actual: out.len(),
            });
        }

        let args = decoder_args(InputSource::Stdin, request.geometry(), request.seek());
        let exec = ExecArgs::new(&self.config.program, &args)?;

        let (decoder, feeder, drain) = {
            let _guard = pipes::spawn_lock();
            let pipes = PipePair::new().map_err(DecodeError::Pipe)?;
            let (decoder, parent) = launcher::spawn_decoder(&exec, pipes)?;
            match feeder::spawn_feeder(request.encoded(), parent) {
                Ok((feeder, drain)) => (decoder, feeder, drain),
                Err(e) => {
                    decoder.abandon();
                    return Err(e);
                }
            }
        };
        debug!(decoder = decoder.pid(), feeder = feeder.pid(), capacity, "draining decoder output");

        // The drain is closed before reaping so a decoder with more output than
        // `capacity` gets EPIPE instead of blocking the reaper.
        let filled = match aggregator::drain_into(File::from(drain), out) {
            Ok(filled) => filled,
            Err(e) => {
                feeder.abandon();
                decoder.abandon();
                return Err(e);
            }
        };

        let feed = match feeder.join() {
            Ok(feed) => feed,
            Err(e) => {
                decoder.abandon();
                return Err(e);
            }
        };
        let decoder_exit = decoder.wait()?;

        let report = DecodeReport::new(capacity, filled, Some(feed), decoder_exit.into());
        report.log();
        Ok(report)
    }
}
