//! Array-host boundary: a decode operation with fixed attributes that takes a
//! scalar blob of encoded bytes and returns a `[frames, height, width, 3]` array.

use ndarray::{Array4, ArrayViewD};
use tracing::warn;

use crate::decode::{DecodeError, DecodeReport, DecodeRequest, DecoderConfig, FrameDecoder, FrameGeometry, SeekOffset};

/// Builder with the operation's default attributes.
#[derive(Debug, Clone)]
pub struct DecodeVideoOpBuilder {
    width: u32,
    height: u32,
    num_frames: u32,
    seek_distance: f32,
    config: DecoderConfig,
}

impl Default for DecodeVideoOpBuilder {
    fn default() -> Self {
        Self {
            width: 256,
            height: 256,
            num_frames: 16,
            seek_distance: 0.0,
            config: DecoderConfig::default(),
        }
    }
}

impl DecodeVideoOpBuilder {
    pub fn width(mut self, width: u32) -> Self {
        self.width = width;
        self
    }

    pub fn height(mut self, height: u32) -> Self {
        self.height = height;
        self
    }

    pub fn num_frames(mut self, num_frames: u32) -> Self {
        self.num_frames = num_frames;
        self
    }

    pub fn seek_distance(mut self, seconds: f32) -> Self {
        self.seek_distance = seconds;
        self
    }

    pub fn decoder(mut self, config: DecoderConfig) -> Self {
        self.config = config;
        self
    }

    /// Attributes are checked once here, not on every call.
    pub fn build(self) -> Result<DecodeVideoOp, DecodeError> {
        Ok(DecodeVideoOp {
            geometry: FrameGeometry::new(self.width, self.height, self.num_frames)?,
            seek: SeekOffset::new(f64::from(self.seek_distance))?,
            decoder: FrameDecoder::new(self.config),
        })
    }
}

#[derive(Debug, Clone)]
pub struct DecodeVideoOp {
    geometry: FrameGeometry,
    seek: SeekOffset,
    decoder: FrameDecoder,
}

/// Output of one `compute` call.
#[derive(Debug)]
pub struct DecodedFrames {
    pub frames: Array4<u8>,
    pub report: DecodeReport,
}

impl DecodeVideoOp {
    pub fn builder() -> DecodeVideoOpBuilder {
        DecodeVideoOpBuilder::default()
    }

    /// `[num_frames, height, width, 3]`
    pub fn output_shape(&self) -> [usize; 4] {
        self.geometry.shape()
    }

    /// Rejects anything but a rank-0 input before a process is spawned.
    pub fn check_input_shape(shape: &[usize]) -> Result<(), DecodeError> {
        if !shape.is_empty() {
            return Err(DecodeError::InvalidInput {
                reason: format!("contents must be scalar, got shape {:?}", shape),
            });
        }
        Ok(())
    }

    pub fn compute<B: AsRef<[u8]>>(&self, contents: ArrayViewD<'_, B>) -> Result<DecodedFrames, DecodeError> {
        Self::check_input_shape(contents.shape())?;
        let blob = contents.iter().next().ok_or_else(|| DecodeError::InvalidInput {
            reason: "scalar input holds no value".to_string(),
        })?;

        let request = DecodeRequest::new(blob.as_ref(), self.geometry, self.seek);
        let mut frames = Array4::<u8>::zeros(self.output_shape());
        let capacity = self.geometry.capacity();
        let out = frames.as_slice_mut().ok_or(DecodeError::BufferSize {
            expected: capacity,
            actual: 0,
        })?;
        let report = self.decoder.decode_into(&request, out)?;
        if !report.is_complete() {
            warn!(
                shortfall = report.shortfall,
                "returning partially filled frames; the tail stays zeroed"
            );
        }
        Ok(DecodedFrames { frames, report })
    }
}
