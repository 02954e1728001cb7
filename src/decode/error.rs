use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failures that abort a decode call.
///
/// Short reads and short writes are not errors; they are carried in
/// [`DecodeReport`](super::DecodeReport).
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Invalid decode request: {reason}")]
    InvalidRequest { reason: String },

    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("Frame buffer holds {actual} bytes, expected exactly {expected}")]
    BufferSize { expected: usize, actual: usize },

    #[error("pipe() failed")]
    Pipe(#[source] io::Error),

    #[error("fork() failed for {role}")]
    Fork {
        role: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("Failed to execute decoder {program:?}")]
    Exec {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("waitpid() failed for {role} (pid {pid})")]
    Wait {
        role: &'static str,
        pid: i32,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read decoder output")]
    Drain(#[source] io::Error),

    #[error("Failed to spawn decoder {program:?}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl DecodeError {
    pub(crate) fn invalid_request(reason: impl Into<String>) -> Self {
        DecodeError::InvalidRequest { reason: reason.into() }
    }

    /// True for errors raised before any process was spawned.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            DecodeError::InvalidRequest { .. }
                | DecodeError::InvalidInput { .. }
                | DecodeError::BufferSize { .. }
        )
    }
}
