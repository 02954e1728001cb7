//! Decode an in-memory encoded video into a fixed-size RGB24 frame buffer by
//! driving an external decoder process over a pair of pipes.

pub mod batch;
pub mod decode;
pub mod ingest;
pub mod media;
pub mod op;
pub mod utils;

pub use decode::{
    DecodeError, DecodeReport, DecodeRequest, DecoderConfig, FrameBuffer, FrameDecoder, FrameGeometry,
    SeekOffset,
};
pub use op::{DecodeVideoOp, DecodedFrames};
