use std::io::{ErrorKind, Read};

use super::DecodeError;

/// Drains `reader` into `buf` from offset zero.
///
/// Each read asks for at most the bytes still missing, so `buf` is never
/// over-filled. Stops when `buf` is full or the reader hits end-of-stream.
/// Returns the number of bytes accumulated.
pub fn drain_into<R: Read>(mut reader: R, buf: &mut [u8]) -> Result<usize, DecodeError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(count) => filled += count,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(DecodeError::Drain(e)),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Cursor};

    /// Hands out at most `chunk` bytes per call and records every request size.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        chunk: usize,
        requests: Vec<usize>,
        interrupt_first: bool,
    }

    impl Read for Trickle {
        fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
            self.requests.push(out.len());
            if self.interrupt_first {
                self.interrupt_first = false;
                return Err(io::Error::from(ErrorKind::Interrupted));
            }
            let n = out.len().min(self.chunk).min(self.data.len() - self.pos);
            out[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    #[test]
    fn test_exact_stream_fills_buffer() {
        let data: Vec<u8> = (0..=255).collect();
        let mut buf = vec![0u8; 256];
        let filled = drain_into(Cursor::new(&data), &mut buf).unwrap();
        assert_eq!(filled, 256);
        assert_eq!(buf, data);
    }

    #[test]
    fn test_short_stream_leaves_tail_untouched() {
        let mut buf = vec![0xEE; 100];
        let filled = drain_into(Cursor::new(vec![1u8; 40]), &mut buf).unwrap();
        assert_eq!(filled, 40);
        assert!(buf[..40].iter().all(|&b| b == 1));
        assert!(buf[40..].iter().all(|&b| b == 0xEE));
    }

    #[test]
    fn test_partial_reads_accumulate_and_requests_shrink() {
        let mut trickle = Trickle {
            data: vec![9u8; 1000],
            pos: 0,
            chunk: 300,
            requests: Vec::new(),
            interrupt_first: true,
        };
        let mut buf = vec![0u8; 700];
        let filled = drain_into(&mut trickle, &mut buf).unwrap();

        assert_eq!(filled, 700);
        assert_eq!(trickle.pos, 700);
        // First request was interrupted and retried.
        assert_eq!(trickle.requests, vec![700, 700, 400, 100]);
        assert!(trickle.requests.iter().all(|&r| r <= buf.len()));
    }

    #[test]
    fn test_longer_stream_is_not_over_read() {
        let mut cursor = Cursor::new(vec![5u8; 64]);
        let mut buf = vec![0u8; 16];
        assert_eq!(drain_into(&mut cursor, &mut buf).unwrap(), 16);
        assert_eq!(cursor.position(), 16);
    }

    #[test]
    fn test_read_error_is_drain_error() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(ErrorKind::Other, "boom"))
            }
        }
        let mut buf = [0u8; 4];
        assert!(matches!(drain_into(Broken, &mut buf), Err(DecodeError::Drain(_))));
    }
}
