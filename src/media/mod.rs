pub mod ffmpeg;
pub mod mimetype;
pub mod snapshot;
pub mod source;
