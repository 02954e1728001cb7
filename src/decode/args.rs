use std::ffi::{CString, OsStr, OsString};
use std::fmt;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use super::{DecodeError, FrameGeometry, SeekOffset};

// Sized for u32 geometry and seeks below `SeekOffset::MAX_SECONDS`, plus a NUL.
const SIZE_ARG_CAP: usize = 24;
const SEEK_ARG_CAP: usize = 16;
const FRAMES_ARG_CAP: usize = 12;

/// Where the decoder reads encoded bytes from.
#[derive(Debug, Clone, Copy)]
pub enum InputSource<'a> {
    Stdin,
    File(&'a Path),
}

impl InputSource<'_> {
    fn as_arg(&self) -> &OsStr {
        match self {
            InputSource::Stdin => OsStr::new("pipe:0"),
            InputSource::File(path) => path.as_os_str(),
        }
    }
}

/// Stack buffer that refuses to grow past `N - 1` bytes (one byte stays free for a NUL).
pub(crate) struct FixedArg<const N: usize> {
    buf: [u8; N],
    len: usize,
}

impl<const N: usize> FixedArg<N> {
    fn new() -> Self {
        Self { buf: [0; N], len: 0 }
    }

    pub(crate) fn as_str(&self) -> &str {
        // Only `write_str` fills the buffer, and it copies whole `&str`s.
        std::str::from_utf8(&self.buf[..self.len]).unwrap_or_default()
    }
}

impl<const N: usize> fmt::Write for FixedArg<N> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let end = self.len + s.len();
        if end >= N {
            return Err(fmt::Error);
        }
        self.buf[self.len..end].copy_from_slice(s.as_bytes());
        self.len = end;
        Ok(())
    }
}

/// Formats into a fixed-capacity buffer. Overflow is a programming error.
pub(crate) fn format_fixed<const N: usize>(args: fmt::Arguments<'_>) -> FixedArg<N> {
    let mut arg = FixedArg::new();
    let formatted = fmt::write(&mut arg, args);
    assert!(formatted.is_ok(), "decoder argument overflows its {}-byte buffer", N);
    arg
}

/// Builds the decoder's argument list (program name excluded).
///
/// Order matters: input, pixel format, scale, seek, codec, stream map,
/// container, frame cap, destination, log level.
pub fn decoder_args(input: InputSource<'_>, geometry: FrameGeometry, seek: SeekOffset) -> Vec<OsString> {
    let size: FixedArg<SIZE_ARG_CAP> =
        format_fixed(format_args!("{}x{}", geometry.width(), geometry.height()));
    let seek: FixedArg<SEEK_ARG_CAP> = format_fixed(format_args!("{:.2}", seek.seconds()));
    let frames: FixedArg<FRAMES_ARG_CAP> = format_fixed(format_args!("{}", geometry.num_frames()));

    let mut args: Vec<OsString> = Vec::with_capacity(20);
    args.push("-i".into());
    args.push(input.as_arg().to_os_string());
    for arg in [
        "-pix_fmt", "rgb24",
        "-s", size.as_str(),
        "-ss", seek.as_str(),
        "-c:v", "rawvideo",
        "-map", "0:v",
        "-f", "rawvideo",
        "-vframes", frames.as_str(),
        "pipe:1",
        "-loglevel", "warning",
    ] {
        args.push(arg.into());
    }
    args
}

/// A NUL-terminated argv, built before fork so the child never allocates.
pub struct ExecArgs {
    program: CString,
    args: Vec<CString>,
}

impl ExecArgs {
    pub fn new(program: &Path, args: &[OsString]) -> Result<Self, DecodeError> {
        let program = to_cstring(program.as_os_str())?;
        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push(program.clone());
        for arg in args {
            argv.push(to_cstring(arg)?);
        }
        Ok(Self { program, args: argv })
    }

    pub fn program(&self) -> &CString {
        &self.program
    }

    /// Pointer table for `execvp`. Valid while `self` lives.
    pub fn argv(&self) -> Vec<*const libc::c_char> {
        self.args
            .iter()
            .map(|arg| arg.as_ptr())
            .chain(std::iter::once(std::ptr::null()))
            .collect()
    }
}

fn to_cstring(arg: &OsStr) -> Result<CString, DecodeError> {
    CString::new(arg.as_bytes())
        .map_err(|_| DecodeError::invalid_request(format!("argument {:?} contains a NUL byte", arg)))
}
