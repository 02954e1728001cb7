use std::io;
use std::os::fd::{AsRawFd, OwnedFd};

use serde::Serialize;
use tracing::debug;

use super::pipes::{self, ParentEnds, Pipe};
use super::reaper::{ChildProcess, ExitSummary};
use super::DecodeError;

const SHORT_WRITE_EXIT: libc::c_int = 3;

/// Handle on the forked feeder child.
#[must_use = "the feeder must be joined"]
pub struct Feeder {
    process: ChildProcess,
    report: OwnedFd,
    requested: usize,
}

/// How much of the encoded input reached the decoder.
#[derive(Debug, Clone, Serialize)]
pub struct FeedReport {
    pub requested: usize,
    /// `None` if the feeder died before reporting.
    pub written: Option<u64>,
    pub exit: ExitSummary,
}

impl FeedReport {
    pub fn is_short(&self) -> bool {
        self.written != Some(self.requested as u64)
    }
}

/// Forks the feeder, which writes all of `encoded` into the input-feed pipe.
///
/// The parent's input-feed write end is closed here; the output-drain read
/// end is returned for the aggregator. Must be called with the spawn lock held.
pub fn spawn_feeder(encoded: &[u8], ends: ParentEnds) -> Result<(Feeder, OwnedFd), DecodeError> {
    let report = Pipe::new().map_err(DecodeError::Pipe)?;
    let ParentEnds { feed, drain } = ends;

    match unsafe { libc::fork() } {
        -1 => Err(DecodeError::Fork {
            role: "feeder",
            source: io::Error::last_os_error(),
        }),
        // SAFETY: only async-signal-safe calls follow in the child, and it never returns.
        0 => unsafe { run_feeder(encoded, feed, drain, report) },
        pid => {
            // Without this the decoder never sees end-of-input.
            drop(feed);
            let Pipe { read, write } = report;
            drop(write);
            debug!(pid, bytes = encoded.len(), "feeder started");
            Ok((
                Feeder {
                    process: ChildProcess::new(pid, "feeder"),
                    report: read,
                    requested: encoded.len(),
                },
                drain,
            ))
        }
    }
}

unsafe fn run_feeder(encoded: &[u8], feed: OwnedFd, drain: OwnedFd, report: Pipe) -> ! {
    drop(drain);
    drop(report.read);
    // Concurrent decodes' drain ends are open here too; holding one would keep
    // that decoder from ever seeing EPIPE.
    pipes::close_fds_except([feed.as_raw_fd(), report.write.as_raw_fd()]);
    libc::signal(libc::SIGPIPE, libc::SIG_IGN);

    let written = pipes::write_raw(feed.as_raw_fd(), encoded);
    drop(feed);
    pipes::write_raw(report.write.as_raw_fd(), &(written as u64).to_ne_bytes());

    let code = if written == encoded.len() { 0 } else { SHORT_WRITE_EXIT };
    libc::_exit(code)
}

impl Feeder {
    pub fn pid(&self) -> libc::pid_t {
        self.process.pid()
    }

    /// Reaps the feeder and collects its byte count.
    pub fn join(self) -> Result<FeedReport, DecodeError> {
        let status = self.process.wait()?;
        let mut buf = [0u8; 8];
        let written = match pipes::read_raw(self.report.as_raw_fd(), &mut buf) {
            Ok(8) => Some(u64::from_ne_bytes(buf)),
            _ => None,
        };
        Ok(FeedReport {
            requested: self.requested,
            written,
            exit: status.into(),
        })
    }

    pub(crate) fn abandon(self) {
        self.process.abandon();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::pipes::PipePair;
    use std::fs::File;
    use std::io::Read;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn test_feeder_delivers_input_larger_than_pipe_buffer() {
        let encoded: Vec<u8> = (0..4 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
        let (parent, decoder_ends) = PipePair::new().unwrap().split();

        let (feeder, drain) = {
            let _guard = pipes::spawn_lock();
            spawn_feeder(&encoded, parent).unwrap()
        };
        drop(drain);

        // Stand-in for the decoder: drain stdin on another thread.
        let stdin = decoder_ends.stdin;
        drop(decoder_ends.stdout);
        let reader = thread::spawn(move || {
            let mut got = Vec::new();
            File::from(stdin).read_to_end(&mut got).unwrap();
            got
        });

        let report = feeder.join().unwrap();
        assert_eq!(reader.join().unwrap(), encoded);
        assert_eq!(report.written, Some(encoded.len() as u64));
        assert!(!report.is_short());
        assert!(report.exit.success());
    }

    #[test]
    fn test_feeder_reports_short_write_when_reader_closes() {
        let encoded = vec![7u8; 1024 * 1024];
        let (parent, decoder_ends) = PipePair::new().unwrap().split();
        drop(decoder_ends);

        let (feeder, drain) = {
            let _guard = pipes::spawn_lock();
            spawn_feeder(&encoded, parent).unwrap()
        };
        drop(drain);

        let report = feeder.join().unwrap();
        assert_eq!(report.written, Some(0));
        assert!(report.is_short());
        assert_eq!(report.exit.code, Some(SHORT_WRITE_EXIT));
    }

    #[test]
    fn test_feeder_drops_unrelated_pipe_ends() {
        // Read end of some other decode's drain, open in this process at fork time.
        let foreign = Pipe::new().unwrap();
        let encoded = vec![3u8; 1024 * 1024];
        let (parent, decoder_ends) = PipePair::new().unwrap().split();

        let (feeder, drain) = {
            let _guard = pipes::spawn_lock();
            spawn_feeder(&encoded, parent).unwrap()
        };
        drop(drain);
        drop(decoder_ends.stdout);

        // The first byte arriving means the feeder has finished closing descriptors.
        let mut stdin = File::from(decoder_ends.stdin);
        let mut first = [0u8; 1];
        stdin.read_exact(&mut first).unwrap();

        drop(foreign.read);
        // No reader left anywhere, even though the feeder is still blocked writing.
        // Retried because children forked by other tests briefly hold a copy too.
        let deadline = Instant::now() + Duration::from_secs(5);
        while pipes::write_raw(foreign.write.as_raw_fd(), b"x") != 0 {
            assert!(Instant::now() < deadline, "feeder still holds an unrelated read end");
            thread::sleep(Duration::from_millis(10));
        }

        drop(stdin);
        let report = feeder.join().unwrap();
        assert!(report.is_short());
    }
}
