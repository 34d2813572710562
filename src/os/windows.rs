use crate::{
    Result,
    protect::{Protect, Region},
    protect_error,
};
use alloc::format;
use core::{
    ffi::c_void,
    mem::{MaybeUninit, size_of},
    ptr::null_mut,
};
use windows_sys::Win32::{
    Foundation::{GetLastError, INVALID_HANDLE_VALUE},
    Storage::FileSystem::WriteFile,
    System::{
        Console::{GetStdHandle, STD_ERROR_HANDLE},
        Memory::{
            self as Memory, MEMORY_BASIC_INFORMATION, PAGE_EXECUTE, PAGE_EXECUTE_READ,
            PAGE_EXECUTE_READWRITE, PAGE_EXECUTE_WRITECOPY, PAGE_PROTECTION_FLAGS,
            PAGE_READWRITE, PAGE_WRITECOPY,
        },
        Threading::{GetCurrentProcess, TerminateProcess},
    },
};

/// Exit status used when a pseudo relocation cannot be applied.
pub const STATUS_ILLEGAL_DLL_PSEUDO_RELOCATION: u32 = 0xe000_0269;

/// Modifiers such as `PAGE_GUARD` live above the low byte.
const PROTECTION_MASK: PAGE_PROTECTION_FLAGS = 0xff;

/// An implementation of Protect trait over `VirtualQuery`/`VirtualProtect`
#[derive(Debug, Default)]
pub struct DefaultProtect;

impl DefaultProtect {
    pub const fn new() -> Self {
        Self
    }
}

impl Protect for DefaultProtect {
    type Prot = PAGE_PROTECTION_FLAGS;

    unsafe fn query(&mut self, addr: usize) -> Result<Region<PAGE_PROTECTION_FLAGS>> {
        let mut info = MaybeUninit::<MEMORY_BASIC_INFORMATION>::uninit();
        let len = size_of::<MEMORY_BASIC_INFORMATION>();
        if unsafe { Memory::VirtualQuery(addr as *const c_void, info.as_mut_ptr(), len) } == 0 {
            let err_code = unsafe { GetLastError() };
            return Err(protect_error(format!(
                "VirtualQuery failed with code 0x{:x} for {} bytes at address 0x{:x}",
                err_code, len, addr
            )));
        }
        let info = unsafe { info.assume_init() };
        Ok(Region {
            base: info.BaseAddress as usize,
            len: info.RegionSize,
            prot: info.Protect,
        })
    }

    fn is_writable(prot: PAGE_PROTECTION_FLAGS) -> bool {
        matches!(
            prot & PROTECTION_MASK,
            PAGE_READWRITE | PAGE_WRITECOPY | PAGE_EXECUTE_READWRITE | PAGE_EXECUTE_WRITECOPY
        )
    }

    fn make_writable(prot: PAGE_PROTECTION_FLAGS) -> PAGE_PROTECTION_FLAGS {
        match prot & PROTECTION_MASK {
            PAGE_EXECUTE | PAGE_EXECUTE_READ => PAGE_EXECUTE_READWRITE,
            _ => PAGE_READWRITE,
        }
    }

    unsafe fn protect(
        &mut self,
        base: usize,
        len: usize,
        prot: PAGE_PROTECTION_FLAGS,
    ) -> Result<()> {
        let mut old = MaybeUninit::uninit();
        if unsafe { Memory::VirtualProtect(base as *const c_void, len, prot, old.as_mut_ptr()) }
            == 0
        {
            let err_code = unsafe { GetLastError() };
            return Err(protect_error(format!(
                "VirtualProtect failed with code 0x{:x} for {} bytes at address 0x{:x}",
                err_code, len, base
            )));
        }
        #[cfg(feature = "log")]
        log::trace!(
            "[VirtualProtect] address: 0x{:x}, length: {}, prot: 0x{:x}",
            base,
            len,
            prot,
        );
        Ok(())
    }
}

/// Writes `bytes` straight to the standard error handle.
pub fn write_stderr(mut bytes: &[u8]) {
    let handle = unsafe { GetStdHandle(STD_ERROR_HANDLE) };
    if handle.is_null() || handle == INVALID_HANDLE_VALUE {
        return;
    }
    while !bytes.is_empty() {
        let chunk = bytes.len().min(u32::MAX as usize) as u32;
        let mut written = 0u32;
        let ok = unsafe { WriteFile(handle, bytes.as_ptr(), chunk, &mut written, null_mut()) };
        if ok == 0 || written == 0 {
            return;
        }
        bytes = &bytes[written as usize..];
    }
}

pub fn terminate() -> ! {
    unsafe {
        TerminateProcess(GetCurrentProcess(), STATUS_ILLEGAL_DLL_PSEUDO_RELOCATION);
    }
    // TerminateProcess on the current process does not return.
    loop {
        core::hint::spin_loop();
    }
}
