use std::path::Path;
use std::process::{Command, Stdio};

use crate::decode::args::{decoder_args, InputSource};
use crate::decode::{aggregator, pipes, DecodeError, DecodeReport, DecoderConfig, FrameBuffer, FrameGeometry, SeekOffset};

/// Decodes a video that is already on disk.
///
/// Nothing is fed, so a single piped stdout is enough: the decoder opens
/// `input_path` itself and we only drain its output into `out`.
pub fn decode_file(
    config: &DecoderConfig,
    input_path: &Path,
    geometry: FrameGeometry,
    seek: SeekOffset,
    out: &mut [u8],
) -> Result<DecodeReport, DecodeError> {
    let capacity = geometry.capacity();
    if out.len() != capacity {
        return Err(DecodeError::BufferSize {
            expected: capacity,
            actual: out.len(),
        });
    }

    let mut child = {
        let _guard = pipes::spawn_lock();
        Command::new(&config.program)
            .args(decoder_args(InputSource::File(input_path), geometry, seek))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|source| DecodeError::Spawn {
                program: config.program.clone(),
                source,
            })?
    };

    let filled = match child.stdout.take() {
        // Dropped on return, closing the pipe before we wait.
        Some(stdout) => aggregator::drain_into(stdout, out),
        None => Err(DecodeError::Drain(std::io::Error::other("decoder stdout was not captured"))),
    };
    let filled = match filled {
        Ok(filled) => filled,
        Err(e) => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(e);
        }
    };

    let status = child.wait().map_err(|source| DecodeError::Wait {
        role: "decoder",
        pid: child.id() as i32,
        source,
    })?;

    let report = DecodeReport::new(capacity, filled, None, status.into());
    report.log();
    Ok(report)
}

/// Convenience wrapper allocating the frame buffer.
pub fn extract_frames(
    config: &DecoderConfig,
    input_path: &Path,
    geometry: FrameGeometry,
    seek: SeekOffset,
) -> Result<(FrameBuffer, DecodeReport), DecodeError> {
    let mut buffer = FrameBuffer::new(geometry);
    let report = decode_file(config, input_path, geometry, seek, buffer.as_bytes_mut())?;
    Ok((buffer, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::testing::{digits, digits_pattern, mock_decoder};
    use std::fs;

    #[test]
    fn test_decoder_reads_the_named_file() {
        let dir = tempfile::tempdir().unwrap();
        let clip = dir.path().join("clip.bin");
        fs::write(&clip, b"ABCDEFGHIJKL").unwrap();
        // `-i` is the first argument pair.
        let program = mock_decoder(dir.path(), r#"cat "$2""#);
        let config = DecoderConfig { program };

        let g = FrameGeometry::new(2, 2, 1).unwrap();
        let (buffer, report) = extract_frames(&config, &clip, g, SeekOffset::default()).unwrap();
        assert_eq!(buffer.as_bytes(), b"ABCDEFGHIJKL");
        assert!(report.is_complete());
        assert!(report.feed.is_none());
    }

    #[test]
    fn test_short_file_output_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let program = mock_decoder(dir.path(), &digits(100));
        let config = DecoderConfig { program };

        let g = FrameGeometry::new(8, 8, 1).unwrap();
        let mut out = vec![0u8; g.capacity()];
        let report = decode_file(&config, Path::new("unused.mp4"), g, SeekOffset::default(), &mut out).unwrap();
        assert_eq!(report.filled, 100);
        assert_eq!(report.shortfall, 92);
        assert_eq!(&out[..100], digits_pattern(100).as_slice());
    }

    #[test]
    fn test_missing_program_is_a_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = DecoderConfig {
            program: dir.path().join("missing"),
        };
        let g = FrameGeometry::new(8, 8, 1).unwrap();
        let err = extract_frames(&config, Path::new("a.mp4"), g, SeekOffset::default()).unwrap_err();
        assert!(matches!(err, DecodeError::Spawn { .. }));
    }
}
