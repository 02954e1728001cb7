use std::io;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::sync::{Mutex, MutexGuard};

/// Serializes pipe creation and every fork of a decode call.
///
/// A fork from another thread while a decode still holds child-facing
/// endpoints would hand that child a stray writable duplicate, and the
/// reader on the other end would never see end-of-stream.
static SPAWN_LOCK: Mutex<()> = Mutex::new(());

pub(crate) fn spawn_lock() -> MutexGuard<'static, ()> {
    SPAWN_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One anonymous unidirectional pipe. Both endpoints are close-on-exec.
pub struct Pipe {
    pub read: OwnedFd,
    pub write: OwnedFd,
}

impl Pipe {
    pub fn new() -> io::Result<Self> {
        let mut fds: [libc::c_int; 2] = [-1, -1];
        create_cloexec_pipe(&mut fds)?;
        // SAFETY: both descriptors were just returned by the kernel and are owned by nobody else.
        let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
        Ok(Self { read, write })
    }
}

#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
fn create_cloexec_pipe(fds: &mut [libc::c_int; 2]) -> io::Result<()> {
    if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
fn create_cloexec_pipe(fds: &mut [libc::c_int; 2]) -> io::Result<()> {
    if unsafe { libc::pipe(fds.as_mut_ptr()) } == -1 {
        return Err(io::Error::last_os_error());
    }
    for &fd in fds.iter() {
        if unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) } == -1 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::close(fds[0]);
                libc::close(fds[1]);
            }
            return Err(err);
        }
    }
    Ok(())
}

/// The two channels between this process and the decoder.
///
/// `input` is the input-feed pipe (we write, the decoder reads its stdin).
/// `output` is the output-drain pipe (the decoder writes its stdout, we read).
pub struct PipePair {
    pub input: Pipe,
    pub output: Pipe,
}

impl PipePair {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            input: Pipe::new()?,
            output: Pipe::new()?,
        })
    }

    /// Splits the pair into the endpoints each side of the decoder fork keeps.
    pub fn split(self) -> (ParentEnds, DecoderEnds) {
        let PipePair { input, output } = self;
        (
            ParentEnds {
                feed: input.write,
                drain: output.read,
            },
            DecoderEnds {
                stdin: input.read,
                stdout: output.write,
            },
        )
    }
}

/// What the calling process holds once the decoder is running.
pub struct ParentEnds {
    /// Input-feed write endpoint. Handed to the feeder, then closed here.
    pub feed: OwnedFd,
    /// Output-drain read endpoint. Read by the aggregator.
    pub drain: OwnedFd,
}

/// What the decoder child redirects onto its stdio.
pub struct DecoderEnds {
    pub stdin: OwnedFd,
    pub stdout: OwnedFd,
}

/// Reads until `buf` is full or EOF, retrying on EINTR. Async-signal-safe.
pub(crate) fn read_raw(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let rest = &mut buf[filled..];
        let n = unsafe { libc::read(fd, rest.as_mut_ptr().cast(), rest.len()) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        if n == 0 {
            break;
        }
        filled += n as usize;
    }
    Ok(filled)
}

/// Writes as much of `bytes` as the fd accepts, looping over partial writes.
/// Stops at the first unrecoverable error. Async-signal-safe.
pub(crate) fn write_raw(fd: RawFd, mut bytes: &[u8]) -> usize {
    let mut written = 0;
    while !bytes.is_empty() {
        let chunk = bytes.len().min(isize::MAX as usize);
        let n = unsafe { libc::write(fd, bytes.as_ptr().cast(), chunk) };
        if n < 0 {
            if io::Error::last_os_error().kind() == io::ErrorKind::Interrupted {
                continue;
            }
            break;
        }
        if n == 0 {
            break;
        }
        written += n as usize;
        bytes = &bytes[n as usize..];
    }
    written
}

/// Closes every descriptor above stderr except those in `keep`.
///
/// For forked children that never exec: CLOEXEC does not fire for them, so
/// they would otherwise hold every endpoint the parent had open at fork time,
/// including other decodes' drain ends. Async-signal-safe.
pub(crate) fn close_fds_except<const N: usize>(mut keep: [RawFd; N]) {
    keep.sort_unstable();
    let mut next: RawFd = 3;
    for fd in keep {
        if fd < next {
            continue;
        }
        close_range(next, fd - 1);
        next = fd + 1;
    }
    close_range(next, RawFd::MAX);
}

fn close_range(first: RawFd, last: RawFd) {
    if first > last || sys_close_range(first, last) {
        return;
    }
    let limit = open_fd_limit();
    if first >= limit {
        return;
    }
    for fd in first..=last.min(limit - 1) {
        unsafe { libc::close(fd) };
    }
}

#[cfg(target_os = "linux")]
fn sys_close_range(first: RawFd, last: RawFd) -> bool {
    let ret = unsafe {
        libc::syscall(
            libc::SYS_close_range,
            first as libc::c_uint,
            last as libc::c_uint,
            0 as libc::c_uint,
        )
    };
    ret == 0
}

// No close_range(2): fall back to the close loop.
#[cfg(not(target_os = "linux"))]
fn sys_close_range(_first: RawFd, _last: RawFd) -> bool {
    false
}

fn open_fd_limit() -> RawFd {
    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) } != 0 || limit.rlim_cur == libc::RLIM_INFINITY {
        return 1024;
    }
    limit.rlim_cur.min(RawFd::MAX as libc::rlim_t) as RawFd
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::{Read, Write};
    use std::os::fd::AsRawFd;

    fn is_cloexec(fd: &OwnedFd) -> bool {
        let flags = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFD) };
        flags != -1 && flags & libc::FD_CLOEXEC != 0
    }

    #[test]
    fn test_pipe_endpoints_are_cloexec() {
        let pair = PipePair::new().unwrap();
        for fd in [&pair.input.read, &pair.input.write, &pair.output.read, &pair.output.write] {
            assert!(is_cloexec(fd));
        }
    }

    #[test]
    fn test_split_routes_endpoints_by_role() {
        let (parent, decoder) = PipePair::new().unwrap().split();

        // Parent feed -> decoder stdin
        let mut feed = File::from(parent.feed);
        feed.write_all(b"encoded").unwrap();
        drop(feed);
        let mut stdin = File::from(decoder.stdin);
        let mut got = Vec::new();
        stdin.read_to_end(&mut got).unwrap();
        assert_eq!(got, b"encoded");

        // Decoder stdout -> parent drain
        let mut stdout = File::from(decoder.stdout);
        stdout.write_all(b"pixels").unwrap();
        drop(stdout);
        let mut drain = File::from(parent.drain);
        let mut got = Vec::new();
        drain.read_to_end(&mut got).unwrap();
        assert_eq!(got, b"pixels");
    }

    #[test]
    fn test_eof_only_after_every_write_end_closes() {
        let pipe = Pipe::new().unwrap();
        let extra = pipe.write.try_clone().unwrap();
        assert_eq!(write_raw(pipe.write.as_raw_fd(), b"ab"), 2);
        drop(pipe.write);
        drop(extra);

        let mut buf = [0u8; 8];
        let n = read_raw(pipe.read.as_raw_fd(), &mut buf).unwrap();
        assert_eq!(&buf[..n], b"ab");
    }

    #[test]
    fn test_write_raw_reports_short_write_on_closed_reader() {
        let pipe = Pipe::new().unwrap();
        drop(pipe.read);
        // Test binaries ignore SIGPIPE, so this surfaces as EPIPE.
        assert_eq!(write_raw(pipe.write.as_raw_fd(), b"lost"), 0);
    }

    #[test]
    fn test_close_fds_except_keeps_only_listed_descriptors() {
        let kept = Pipe::new().unwrap();
        let swept = Pipe::new().unwrap();
        let status = Pipe::new().unwrap();

        let _guard = spawn_lock();
        match unsafe { libc::fork() } {
            -1 => panic!("fork failed: {}", io::Error::last_os_error()),
            0 => {
                close_fds_except([kept.write.as_raw_fd(), status.write.as_raw_fd()]);
                let alive = |fd: &OwnedFd| unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFD) } != -1;
                let verdict = [alive(&kept.write) as u8, alive(&swept.read) as u8, alive(&swept.write) as u8];
                write_raw(status.write.as_raw_fd(), &verdict);
                unsafe { libc::_exit(0) }
            }
            pid => {
                drop(status.write);
                let mut verdict = [9u8; 3];
                assert_eq!(read_raw(status.read.as_raw_fd(), &mut verdict).unwrap(), 3);
                let mut raw = 0;
                unsafe { libc::waitpid(pid, &mut raw, 0) };
                assert_eq!(verdict, [1, 0, 0]);
            }
        }
    }
}
