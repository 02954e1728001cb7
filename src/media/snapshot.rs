use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use tracing::debug;

use crate::decode::FrameBuffer;

/// Writes up to `limit` frames as `frame_000.png`, `frame_001.png`, ...
pub fn write_pngs(buffer: &FrameBuffer, dir: &Path, limit: Option<usize>) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;

    let count = buffer.frames().count().min(limit.unwrap_or(usize::MAX));
    let mut written = Vec::with_capacity(count);
    for index in 0..count {
        let image = buffer
            .frame_image(index)
            .ok_or_else(|| anyhow!("Frame {} does not match the buffer geometry", index))?;
        let path = dir.join(format!("frame_{:03}.png", index));
        image
            .save(&path)
            .with_context(|| format!("Failed to write {:?}", path))?;
        debug!(?path, "wrote frame snapshot");
        written.push(path);
    }
    Ok(written)
}
