//! Queue-fed batch decoding of a directory tree.
//!
//! scanner thread -> worker threads (sniff, load, decode, write frames) -> report writer thread

pub mod report;

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;

use anyhow::{anyhow, Context, Result};
use crossbeam::channel::bounded;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::decode::{DecodeReport, DecodeRequest, DecoderConfig, FrameDecoder, FrameGeometry, SeekOffset};
use crate::ingest::scanner;
use crate::media::{mimetype, snapshot, source::EncodedVideo};
use report::{BatchRecord, ReportWriter};

pub const REPORT_FILE: &str = "report.jsonl";

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub input_dir: PathBuf,
    pub out_dir: PathBuf,
    pub workers: usize,
    pub geometry: FrameGeometry,
    pub seek: SeekOffset,
    pub decoder: DecoderConfig,
    /// Also write this many frames per input as PNG.
    pub png_frames: Option<usize>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub queued: usize,
    pub decoded: usize,
    /// Decoded, but the decoder produced fewer bytes than requested.
    pub incomplete: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl BatchSummary {
    fn count(&mut self, record: &BatchRecord) {
        match (&record.error, &record.report) {
            (Some(_), _) => self.failed += 1,
            (None, Some(report)) => {
                self.decoded += 1;
                if !report.is_complete() {
                    self.incomplete += 1;
                }
            }
            (None, None) => self.skipped += 1,
        }
    }
}

pub fn run_batch(opts: &BatchOptions) -> Result<BatchSummary> {
    fs::create_dir_all(&opts.out_dir)
        .with_context(|| format!("Failed to create output directory {:?}", opts.out_dir))?;

    // Channels
    let (scan_tx, scan_rx) = bounded::<PathBuf>(256);
    let (record_tx, record_rx) = bounded::<BatchRecord>(256);

    // 1. Scanner Thread
    let input_dir = opts.input_dir.clone();
    let scanner_handle = thread::spawn(move || -> Result<usize> {
        info!("Scanner started");
        let queued = scanner::scan_directory(&input_dir, scan_tx)?;
        info!("Scanner finished, {} files queued", queued);
        Ok(queued)
    });

    // 2. Decode Workers
    let mut worker_handles = Vec::new();
    for i in 0..opts.workers.max(1) {
        let rx = scan_rx.clone();
        let tx = record_tx.clone();
        let opts = opts.clone();

        worker_handles.push(thread::spawn(move || {
            info!("Worker {} started", i);
            let decoder = FrameDecoder::new(opts.decoder.clone());
            for path in rx {
                let record = process_file(&path, &opts, &decoder);
                if tx.send(record).is_err() {
                    break;
                }
            }
            info!("Worker {} finished", i);
        }));
    }
    // Drop the originals so the writer sees the channel close once workers finish
    drop(scan_rx);
    drop(record_tx);

    // 3. Report Writer Thread
    let report_path = opts.out_dir.join(REPORT_FILE);
    let writer_handle = thread::spawn(move || -> Result<BatchSummary> {
        let mut writer = ReportWriter::new(&report_path)?;
        let progress = ProgressBar::new_spinner();
        progress.set_style(
            ProgressStyle::with_template("{spinner} {pos} files {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );

        let mut summary = BatchSummary::default();
        for record in record_rx {
            summary.count(&record);
            progress.inc(1);
            progress.set_message(record.source_path.clone());
            if let Err(e) = writer.add(record) {
                error!("Failed to add record to report: {:#}", e);
            }
        }
        writer.flush()?;
        progress.finish_and_clear();
        info!("Report writer finished, {} records", writer.total());
        Ok(summary)
    });

    let queued = scanner_handle
        .join()
        .map_err(|_| anyhow!("Scanner thread panicked"))??;
    for handle in worker_handles {
        handle.join().map_err(|_| anyhow!("Worker thread panicked"))?;
    }
    let mut summary = writer_handle
        .join()
        .map_err(|_| anyhow!("Report writer thread panicked"))??;
    summary.queued = queued;
    Ok(summary)
}

fn process_file(path: &Path, opts: &BatchOptions, decoder: &FrameDecoder) -> BatchRecord {
    let media_type = match mimetype::detect_mimetype(path) {
        Ok(m) => m,
        Err(e) => {
            error!("Mimetype detection failed for {:?}: {:#}", path, e);
            "application/octet-stream"
        }
    };

    let mut record = BatchRecord::skipped(path, media_type);
    if !mimetype::is_video(media_type) {
        return record;
    }

    match decode_file(path, opts, decoder) {
        Ok((digest, frames_path, report)) => {
            record.sha256 = Some(digest);
            record.frames_path = Some(frames_path);
            record.report = Some(report);
        }
        Err(e) => {
            error!("Decoding failed for {:?}: {:#}", path, e);
            record.error = Some(format!("{:#}", e));
        }
    }
    record
}

fn decode_file(path: &Path, opts: &BatchOptions, decoder: &FrameDecoder) -> Result<(String, PathBuf, DecodeReport)> {
    let video = EncodedVideo::load(path)?;
    let digest = video.digest();
    debug!(bytes = video.len(), mapped = video.is_mapped(), "loaded {:?}", path);

    let request = DecodeRequest::new(&video, opts.geometry, opts.seek);
    let (buffer, report) = decoder
        .decode(&request)
        .with_context(|| format!("Failed to decode {:?}", path))?;

    let frames_path = opts.out_dir.join(format!("{}.rgb", digest));
    fs::write(&frames_path, buffer.as_bytes())
        .with_context(|| format!("Failed to write {:?}", frames_path))?;

    if let Some(limit) = opts.png_frames {
        snapshot::write_pngs(&buffer, &opts.out_dir.join(&digest), Some(limit))?;
    }

    Ok((digest, frames_path, report))
}
