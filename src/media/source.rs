use std::fs::File;
use std::io::Read;
use std::ops::Deref;
use std::path::Path;

use anyhow::{Context, Result};
use memmap2::{Mmap, MmapOptions};
use sha2::{Digest, Sha256};

const MMAP_THRESHOLD: u64 = 64 * 1024 * 1024; // 64 MB

/// Encoded video bytes loaded from disk, read-only for the rest of the pipeline.
pub enum EncodedVideo {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl EncodedVideo {
    pub fn load(path: &Path) -> Result<Self> {
        let mut file = File::open(path).with_context(|| format!("Failed to open file: {:?}", path))?;
        let len = file.metadata()?.len();

        if len > MMAP_THRESHOLD {
            // The feeder child shares the mapping after fork, so nothing is copied.
            // We assume the file is not truncated underneath us while decoding.
            let mmap = unsafe { MmapOptions::new().map(&file) }
                .with_context(|| format!("Failed to map file: {:?}", path))?;
            Ok(EncodedVideo::Mapped(mmap))
        } else {
            let mut bytes = Vec::with_capacity(len as usize);
            file.read_to_end(&mut bytes)
                .with_context(|| format!("Failed to read file: {:?}", path))?;
            Ok(EncodedVideo::Owned(bytes))
        }
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self, EncodedVideo::Mapped(_))
    }

    /// Hex SHA-256 of the encoded bytes.
    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(&self[..]))
    }
}

impl Deref for EncodedVideo {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            EncodedVideo::Mapped(mmap) => mmap,
            EncodedVideo::Owned(bytes) => bytes,
        }
    }
}
