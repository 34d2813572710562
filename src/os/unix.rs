use super::maps::{MAPS_PATH, find_region};
use crate::{
    Result,
    protect::{ProtFlags, Protect, Region, flags_make_writable, flags_writable},
    protect_error,
};
use alloc::{format, vec::Vec};
use libc::{O_RDONLY, mprotect};

/// An implementation of Protect trait
///
/// Regions come from `/proc/self/maps`, so lookups only work where procfs is
/// mounted.
#[derive(Debug, Default)]
pub struct DefaultProtect;

impl DefaultProtect {
    pub const fn new() -> Self {
        Self
    }
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
        let res = unsafe { mprotect(base as _, len, prot.bits()) };
        if res != 0 {
            return Err(protect_error(format!(
                "mprotect failed with code {} for {} bytes at address 0x{:x}",
                errno(),
                len,
                base
            )));
        }
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
    let fd = unsafe { libc::open(MAPS_PATH.as_ptr(), O_RDONLY) };
    if fd == -1 {
        return Err(protect_error(format!(
            "open {:?} failed with code {}",
            MAPS_PATH,
            errno()
        )));
    }
    let mut maps = Vec::new();
    let mut chunk = [0u8; 4096];
    let result = loop {
        let n = unsafe { libc::read(fd, chunk.as_mut_ptr() as *mut libc::c_void, chunk.len()) };
        if n < 0 {
            break Err(protect_error(format!(
                "read {:?} failed with code {}",
                MAPS_PATH,
                errno()
            )));
        } else if n == 0 {
            break Ok(());
        }
        maps.extend_from_slice(&chunk[..n as usize]);
    };
    unsafe { libc::close(fd) };
    result.map(|()| maps)
}

#[cfg(target_os = "linux")]
fn errno() -> i32 {
    unsafe { *libc::__errno_location() }
}

#[cfg(target_os = "android")]
fn errno() -> i32 {
    unsafe { *libc::__errno() }
}

#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
fn errno() -> i32 {
    unsafe { *libc::__error() }
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd"
)))]
fn errno() -> i32 {
    0
}

/// Writes `bytes` to fd 2 without going through any buffered stream.
pub fn write_stderr(mut bytes: &[u8]) {
    while !bytes.is_empty() {
        let n = unsafe { libc::write(2, bytes.as_ptr() as *const libc::c_void, bytes.len()) };
        if n <= 0 {
            return;
        }
        bytes = &bytes[n as usize..];
    }
}

pub fn terminate() -> ! {
    unsafe { libc::abort() }
}
