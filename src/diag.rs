//! Fatal diagnostics
//!
//! The relocator runs before the C runtime has finished starting, so nothing
//! here allocates or touches buffered streams: messages are formatted into a
//! stack buffer and written to the raw standard error handle.

use crate::Error;
use core::fmt::{self, Write};

/// A sink for diagnostics that is usable during early process startup.
pub trait Diagnostic {
    fn emit(&mut self, msg: &str);
}

/// Writes directly to the standard error handle of the process.
#[derive(Debug, Default, Clone, Copy)]
pub struct LowLevelStderr;

impl Diagnostic for LowLevelStderr {
    fn emit(&mut self, msg: &str) {
        crate::os::write_stderr(msg.as_bytes());
    }
}

impl Diagnostic for alloc::string::String {
    fn emit(&mut self, msg: &str) {
        self.push_str(msg);
    }
}

/// Fixed-capacity formatting buffer; overlong output is cut at a character
/// boundary.
struct StackBuf<const N: usize> {
    buf: [u8; N],
    len: usize,
}

impl<const N: usize> StackBuf<N> {
    const fn new() -> Self {
        Self {
            buf: [0; N],
            len: 0,
        }
    }

    fn as_str(&self) -> &str {
        // Only whole characters are ever copied in.
        core::str::from_utf8(&self.buf[..self.len]).unwrap_or_default()
    }
}

impl<const N: usize> Write for StackBuf<N> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = N - self.len;
        let mut take = s.len().min(room);
        while !s.is_char_boundary(take) {
            take -= 1;
        }
        self.buf[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        if take < s.len() {
            return Err(fmt::Error);
        }
        Ok(())
    }
}

/// Writes the report for `err` to `diag`.
pub fn report<D: Diagnostic + ?Sized>(diag: &mut D, err: &Error) {
    let mut buf = StackBuf::<512>::new();
    let _ = write!(buf, "pseudo-relocation runtime failure:\n  {err}\n");
    diag.emit(buf.as_str());
}

/// Reports `err` on standard error and terminates the process.
#[cold]
#[inline(never)]
pub fn fatal(err: &Error) -> ! {
    #[cfg(feature = "log")]
    log::error!("{}", err);
    report(&mut LowLevelStderr, err);
    crate::os::terminate()
}
