use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

use serde::Serialize;

use super::DecodeError;

/// A forked child we are responsible for reaping.
#[derive(Debug)]
#[must_use = "a forked child must be reaped"]
pub struct ChildProcess {
    pid: libc::pid_t,
    role: &'static str,
}

impl ChildProcess {
    pub(crate) fn new(pid: libc::pid_t, role: &'static str) -> Self {
        Self { pid, role }
    }

    pub fn pid(&self) -> libc::pid_t {
        self.pid
    }

    /// Blocks until the child terminates.
    ///
    /// A non-zero exit is returned as a status; only a failing `waitpid` is an error.
    pub fn wait(self) -> Result<ExitStatus, DecodeError> {
        let mut status: libc::c_int = 0;
        loop {
            let rc = unsafe { libc::waitpid(self.pid, &mut status, 0) };
            if rc == self.pid {
                return Ok(ExitStatus::from_raw(status));
            }
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(DecodeError::Wait {
                role: self.role,
                pid: self.pid,
                source: err,
            });
        }
    }

    /// Kills and reaps the child on an error path. Failures are ignored.
    pub(crate) fn abandon(self) {
        unsafe {
            libc::kill(self.pid, libc::SIGKILL);
        }
        let _ = self.wait();
    }
}

/// Serializable view of an `ExitStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExitSummary {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitSummary {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<ExitStatus> for ExitSummary {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
            signal: status.signal(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fork_exiting_with(code: libc::c_int) -> ChildProcess {
        let _guard = super::super::pipes::spawn_lock();
        match unsafe { libc::fork() } {
            -1 => panic!("fork failed"),
            0 => unsafe { libc::_exit(code) },
            pid => ChildProcess::new(pid, "test"),
        }
    }

    #[test]
    fn test_wait_returns_exit_code() {
        let status = fork_exiting_with(3).wait().unwrap();
        let summary = ExitSummary::from(status);
        assert_eq!(summary.code, Some(3));
        assert!(!summary.success());
    }

    #[test]
    fn test_wait_twice_is_a_wait_error() {
        let child = fork_exiting_with(0);
        let pid = child.pid();
        assert!(child.wait().unwrap().success());

        let err = ChildProcess::new(pid, "test").wait().unwrap_err();
        assert!(matches!(err, DecodeError::Wait { .. }));
    }

    #[test]
    fn test_abandon_reaps_a_blocked_child() {
        let child = {
            let _guard = super::super::pipes::spawn_lock();
            match unsafe { libc::fork() } {
                -1 => panic!("fork failed"),
                0 => {
                    super::super::pipes::close_fds_except([]);
                    loop {
                        unsafe { libc::pause() };
                    }
                }
                pid => ChildProcess::new(pid, "test"),
            }
        };
        child.abandon();
    }
}
