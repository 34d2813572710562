use super::maps::{MAPS_PATH, find_region};
use crate::{
    Error, Result,
    protect::{ProtFlags, Protect, Region, flags_make_writable, flags_writable},
    protect_error,
};
use alloc::{format, vec::Vec};
use syscalls::Sysno;

/// An implementation of Protect trait on raw Linux syscalls
#[derive(Debug, Default)]
pub struct DefaultProtect;

impl DefaultProtect {
    pub const fn new() -> Self {
        Self
    }
}

#[inline]
fn mprotect(addr: usize, len: usize, prot: ProtFlags) -> Result<()> {
    unsafe {
        from_ret(
            syscalls::raw_syscall!(Sysno::mprotect, addr, len, prot.bits()),
            "mprotect failed",
            addr,
            len,
        )?;
    }
    Ok(())
}

impl Protect for DefaultProtect {
    type Prot = ProtFlags;

    unsafe fn query(&mut self, addr: usize) -> Result<Region<ProtFlags>> {
        let maps = read_maps()?;
        find_region(&maps, addr)
            .ok_or_else(|| protect_error(format!("address 0x{:x} is not mapped", addr)))
    }

    fn is_writable(prot: ProtFlags) -> bool {
        flags_writable(prot)
    }

    fn make_writable(prot: ProtFlags) -> ProtFlags {
        flags_make_writable(prot)
    }

    unsafe fn protect(&mut self, base: usize, len: usize, prot: ProtFlags) -> Result<()> {
        mprotect(base, len, prot)?;
        #[cfg(feature = "log")]
        log::trace!(
            "[Mprotect] address: 0x{:x}, length: {}, prot: {:?}",
            base,
            len,
            prot,
        );
        Ok(())
    }
}

fn read_maps() -> Result<Vec<u8>> {
    const RDONLY: u32 = 0;
    const AT_FDCWD: core::ffi::c_int = -100;
    let path = MAPS_PATH.as_ptr();
    let fd = unsafe {
        from_ret(
            syscalls::raw_syscall!(Sysno::openat, AT_FDCWD, path, RDONLY, 0),
            "openat /proc/self/maps failed",
            path as usize,
            0,
        )?
    };
    let mut maps = Vec::new();
    let mut chunk = [0u8; 4096];
    let result = loop {
        let n = unsafe {
            from_ret(
                syscalls::raw_syscall!(Sysno::read, fd, chunk.as_mut_ptr(), chunk.len()),
                "read /proc/self/maps failed",
                chunk.as_ptr() as usize,
                chunk.len(),
            )
        };
        match n {
            Err(err) => break Err(err),
            Ok(0) => break Ok(()),
            Ok(n) => maps.extend_from_slice(&chunk[..n]),
        }
    };
    unsafe { syscalls::raw_syscall!(Sysno::close, fd) };
    result.map(|()| maps)
}

/// Writes `bytes` to fd 2 without going through any buffered stream.
pub fn write_stderr(mut bytes: &[u8]) {
    const STDERR: usize = 2;
    while !bytes.is_empty() {
        let n = unsafe { syscalls::raw_syscall!(Sysno::write, STDERR, bytes.as_ptr(), bytes.len()) };
        if n == 0 || n > -4096isize as usize {
            return;
        }
        bytes = &bytes[n..];
    }
}

pub fn terminate() -> ! {
    const SIGABRT: usize = 6;
    unsafe {
        // Thread-directed, so the signal is taken before tgkill returns.
        let pid = syscalls::raw_syscall!(Sysno::getpid);
        let tid = syscalls::raw_syscall!(Sysno::gettid);
        syscalls::raw_syscall!(Sysno::tgkill, pid, tid, SIGABRT);
        loop {
            syscalls::raw_syscall!(Sysno::exit_group, 127);
        }
    }
}

/// Converts a raw syscall return value to a result.
#[inline(always)]
fn from_ret(value: usize, msg: &'static str, addr: usize, len: usize) -> Result<usize> {
    if value > -4096isize as usize {
        // Truncation of the error value is guaranteed to never occur due to
        // the above check. This is the same check that musl uses:
        // https://git.musl-libc.org/cgit/musl/tree/src/internal/syscall_ret.c?h=v1.1.15
        return Err(syscall_error(msg, value.wrapping_neg(), addr, len));
    }
    Ok(value)
}

#[cold]
#[inline(never)]
fn syscall_error(msg: &'static str, code: usize, addr: usize, len: usize) -> Error {
    protect_error(format!(
        "{} with code {} for {} bytes at address 0x{:x}",
        msg, code, len, addr
    ))
}
