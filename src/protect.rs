//! Memory protection for patching loaded images
//!
//! Pseudo-relocation targets usually live in `.text` or `.rdata`, which the
//! loader maps without write access. This module provides the trait used to
//! query and change page protection, and the [`ProtectionScope`] that widens a
//! region only for as long as the patcher needs it.
//!
//! Key concepts:
//! - **Region**: the span of pages the OS reports as sharing one protection.
//! - **Native protection**: each backend keeps the OS value untouched so the
//!   original can be reapplied bit for bit.
//! - **Guard**: one per distinct region touched during a run, restored once.
//!
//! # Safety
//! Changing page protection and writing through raw addresses affects the
//! whole process. Callers must make sure no other thread observes the target
//! memory while a scope is active.

#[cfg(test)]
pub(crate) mod mock;
mod scope;

pub use crate::os::DefaultProtect;
pub use scope::{ProtectionScope, RestorePolicy, SectionGuard};

use crate::Result;
use bitflags::bitflags;
use core::{ffi::c_int, fmt::Debug};

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    /// Memory protection flags for controlling access permissions.
    ///
    /// Native protection type of the Unix and bare metal backends.
    pub struct ProtFlags: c_int {
        /// No access allowed.
        const PROT_NONE = 0;

        /// Allow reading from the memory region.
        const PROT_READ = 1;

        /// Allow writing to the memory region.
        const PROT_WRITE = 2;

        /// Allow executing code in the memory region.
        const PROT_EXEC = 4;
    }
}

/// A span of memory sharing one protection value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Region<T> {
    /// First byte of the region.
    pub base: usize,
    /// Length of the region in bytes.
    pub len: usize,
    /// Protection of the region as reported by the OS.
    pub prot: T,
}

impl<T> Region<T> {
    /// Whether `addr` falls inside `[base, base + len)`.
    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.base && addr - self.base < self.len
    }

    /// One past the last byte of the region.
    #[inline]
    pub fn end(&self) -> usize {
        self.base.wrapping_add(self.len)
    }
}

/// A trait for the memory protection primitives the patcher needs.
///
/// This is the seam between the relocation walker and the operating system.
/// [`DefaultProtect`] is the implementation for the current target; tests and
/// embedders can supply their own.
///
/// # Example
/// ```rust,ignore
/// struct MyProtect;
///
/// impl Protect for MyProtect {
///     type Prot = ProtFlags;
///
///     unsafe fn query(&mut self, addr: usize) -> Result<Region<ProtFlags>> {
///         // Platform-specific lookup
///         todo!()
///     }
///
///     // Implement other required methods...
/// }
/// ```
pub trait Protect {
    /// The protection value in the OS's own representation.
    type Prot: Copy + Debug + PartialEq;

    /// Finds the region containing `addr` and its current protection.
    ///
    /// # Safety
    /// `addr` must be an address of the current process. The returned region
    /// must contain `addr`.
    unsafe fn query(&mut self, addr: usize) -> Result<Region<Self::Prot>>;

    /// Whether a region with protection `prot` can be written as is.
    ///
    /// Read-write, execute-read-write, and the copy-on-write variants of both
    /// count as writable.
    fn is_writable(prot: Self::Prot) -> bool;

    /// The protection to apply so that a region with `prot` becomes writable.
    ///
    /// Executable regions stay executable.
    fn make_writable(prot: Self::Prot) -> Self::Prot;

    /// Applies `prot` to `[base, base + len)`.
    ///
    /// # Safety
    /// The range must be one previously returned by [`Protect::query`].
    /// Removing access from memory that is in use will crash the process.
    unsafe fn protect(&mut self, base: usize, len: usize, prot: Self::Prot) -> Result<()>;
}

impl<P: Protect + ?Sized> Protect for &mut P {
    type Prot = P::Prot;

    #[inline]
    unsafe fn query(&mut self, addr: usize) -> Result<Region<Self::Prot>> {
        unsafe { (**self).query(addr) }
    }

    #[inline]
    fn is_writable(prot: Self::Prot) -> bool {
        P::is_writable(prot)
    }

    #[inline]
    fn make_writable(prot: Self::Prot) -> Self::Prot {
        P::make_writable(prot)
    }

    #[inline]
    unsafe fn protect(&mut self, base: usize, len: usize, prot: Self::Prot) -> Result<()> {
        unsafe { (**self).protect(base, len, prot) }
    }
}

/// `ProtFlags` rules shared by the Unix-like backends.
#[allow(unused)]
#[inline]
pub(crate) fn flags_writable(prot: ProtFlags) -> bool {
    prot.contains(ProtFlags::PROT_WRITE)
}

#[allow(unused)]
#[inline]
pub(crate) fn flags_make_writable(prot: ProtFlags) -> ProtFlags {
    prot | ProtFlags::PROT_READ | ProtFlags::PROT_WRITE
}
