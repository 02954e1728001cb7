use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::path::PathBuf;

use tracing::debug;

use super::args::ExecArgs;
use super::pipes::{self, ParentEnds, Pipe, PipePair};
use super::reaper::ChildProcess;
use super::DecodeError;

const EXEC_FAILED_EXIT: libc::c_int = 127;

/// Forks the decoder with its stdin/stdout wired to `pipes`.
///
/// Returns the decoder handle and the two endpoints the parent keeps:
/// the input-feed write end and the output-drain read end.
/// Must be called with the spawn lock held.
pub fn spawn_decoder(args: &ExecArgs, pipes: PipePair) -> Result<(ChildProcess, ParentEnds), DecodeError> {
    let status = Pipe::new().map_err(DecodeError::Pipe)?;
    let argv = args.argv();

    match unsafe { libc::fork() } {
        -1 => Err(DecodeError::Fork {
            role: "decoder",
            source: io::Error::last_os_error(),
        }),
        // SAFETY: only async-signal-safe calls follow in the child, and it never returns.
        0 => unsafe { exec_decoder(&argv, pipes, status) },
        pid => {
            let decoder = ChildProcess::new(pid, "decoder");
            let (parent, child_ends) = pipes.split();
            drop(child_ends);

            let Pipe { read, write } = status;
            drop(write);
            match read_exec_errno(&read) {
                None => {
                    debug!(pid, program = ?args.program(), "decoder started");
                    Ok((decoder, parent))
                }
                Some(errno) => {
                    drop(parent);
                    let _ = decoder.wait();
                    Err(DecodeError::Exec {
                        program: PathBuf::from(args.program().to_string_lossy().into_owned()),
                        source: io::Error::from_raw_os_error(errno),
                    })
                }
            }
        }
    }
}

/// EOF on the status pipe means exec succeeded and closed the write end.
fn read_exec_errno(fd: &OwnedFd) -> Option<i32> {
    let mut buf = [0u8; 4];
    match pipes::read_raw(fd.as_raw_fd(), &mut buf) {
        Ok(4) => Some(i32::from_ne_bytes(buf)),
        Ok(_) => None,
        Err(err) => err.raw_os_error(),
    }
}

unsafe fn exec_decoder(argv: &[*const libc::c_char], pipes: PipePair, status: Pipe) -> ! {
    drop(status.read);
    let PipePair { input, output } = pipes;
    drop(input.write);
    drop(output.read);

    // Keep the sources clear of 0..=2 so one dup2 cannot clobber the other.
    let stdin_src = lift_above_stdio(input.read);
    let stdout_src = lift_above_stdio(output.write);
    if stdin_src < 0
        || stdout_src < 0
        || libc::dup2(stdin_src, libc::STDIN_FILENO) == -1
        || libc::dup2(stdout_src, libc::STDOUT_FILENO) == -1
    {
        fail_exec(status.write.as_raw_fd());
    }
    libc::close(stdin_src);
    libc::close(stdout_src);

    // The feeder relies on EPIPE, but the decoder should die on a closed drain.
    libc::signal(libc::SIGPIPE, libc::SIG_DFL);

    libc::execvp(argv[0], argv.as_ptr());
    fail_exec(status.write.as_raw_fd())
}

/// Returns a raw fd numbered 3 or above, taking ownership of `fd`.
unsafe fn lift_above_stdio(fd: OwnedFd) -> RawFd {
    let raw = fd.as_raw_fd();
    if raw > libc::STDERR_FILENO {
        std::mem::forget(fd);
        return raw;
    }
    libc::fcntl(raw, libc::F_DUPFD_CLOEXEC, libc::STDERR_FILENO + 1)
}

unsafe fn fail_exec(status_fd: RawFd) -> ! {
    let errno = io::Error::last_os_error().raw_os_error().unwrap_or(libc::EINVAL);
    pipes::write_raw(status_fd, &errno.to_ne_bytes());
    libc::_exit(EXEC_FAILED_EXIT)
}
