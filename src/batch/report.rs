use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::decode::DecodeReport;

/// One line of `report.jsonl`.
#[derive(Debug, Clone, Serialize)]
pub struct BatchRecord {
    pub source_path: String,
    pub sha256: Option<String>,
    pub media_type: String,
    /// Raw frames written for this input, if decoding ran.
    pub frames_path: Option<PathBuf>,
    pub report: Option<DecodeReport>,
    pub error: Option<String>,
}

impl BatchRecord {
    pub fn skipped(source_path: &Path, media_type: &str) -> Self {
        Self {
            source_path: source_path.to_string_lossy().into_owned(),
            sha256: None,
            media_type: media_type.to_string(),
            frames_path: None,
            report: None,
            error: None,
        }
    }
}

/// Buffers records and appends them as JSON lines once `buffer_limit` is reached.
pub struct ReportWriter {
    out: BufWriter<File>,
    buffer: Vec<BatchRecord>,
    buffer_limit: usize,
    total: usize,
}

impl ReportWriter {
    pub fn new(path: &Path) -> Result<Self> {
        let file = File::create(path).with_context(|| format!("Failed to create report {:?}", path))?;
        Ok(Self {
            out: BufWriter::new(file),
            buffer: Vec::new(),
            buffer_limit: 64,
            total: 0,
        })
    }

    pub fn add(&mut self, record: BatchRecord) -> Result<()> {
        self.buffer.push(record);
        if self.buffer.len() >= self.buffer_limit {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        for record in self.buffer.drain(..) {
            serde_json::to_writer(&mut self.out, &record).context("Failed to serialize record")?;
            self.out.write_all(b"\n")?;
            self.total += 1;
        }
        self.out.flush().context("Failed to flush report")?;
        Ok(())
    }

    /// Records written to disk so far.
    pub fn total(&self) -> usize {
        self.total
    }
}
