use crate::{
    Result,
    protect::{ProtFlags, Protect, Region},
};

#[cfg(not(feature = "portable-atomic"))]
use core::sync::atomic::{AtomicUsize, Ordering};
#[cfg(feature = "portable-atomic")]
use portable_atomic::{AtomicUsize, Ordering};

const PAGE_SIZE: usize = 0x1000;

/// An implementation of Protect trait for flat, unprotected memory
///
/// Every address is reported as part of a writable page, so nothing is ever
/// widened or restored.
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
        Ok(Region {
            base: addr & !(PAGE_SIZE - 1),
            len: PAGE_SIZE,
            prot: ProtFlags::PROT_READ | ProtFlags::PROT_WRITE | ProtFlags::PROT_EXEC,
        })
    }

    fn is_writable(_prot: ProtFlags) -> bool {
        true
    }

    fn make_writable(prot: ProtFlags) -> ProtFlags {
        prot
    }

    unsafe fn protect(&mut self, _base: usize, _len: usize, _prot: ProtFlags) -> Result<()> {
        Ok(())
    }
}

static STDERR_HOOK: AtomicUsize = AtomicUsize::new(0);

/// Set where fatal diagnostics go on targets without a standard error handle.
///
/// # Safety
/// `f` must be callable before any runtime initialization has happened.
pub unsafe fn set_stderr_hook(f: fn(&[u8])) {
    STDERR_HOOK.store(f as usize, Ordering::Release);
}

pub fn write_stderr(bytes: &[u8]) {
    let hook = STDERR_HOOK.load(Ordering::Acquire);
    if hook != 0 {
        let f: fn(&[u8]) = unsafe { core::mem::transmute(hook) };
        f(bytes);
    }
}

pub fn terminate() -> ! {
    panic!("illegal pseudo relocation")
}
