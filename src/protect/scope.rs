use super::{Protect, Region};
use crate::{Result, protect_error};
use alloc::{format, vec::Vec};
use core::fmt::Debug;

/// When the protection of touched regions is put back.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RestorePolicy {
    /// Keep every widened region writable until the end of the run, then
    /// restore all of them in one pass.
    #[default]
    Batched,
    /// Restore right after each write. Costs two protection changes per
    /// write but never leaves a region widened between writes.
    PerWrite,
}

/// The record kept for one region touched by a [`ProtectionScope`].
#[derive(Debug)]
pub struct SectionGuard<T> {
    region: Region<T>,
    /// `None` when the region was already writable.
    original: Option<T>,
}

impl<T: Copy + Debug> SectionGuard<T> {
    /// The region as it was reported before any change.
    #[inline]
    pub fn region(&self) -> &Region<T> {
        &self.region
    }

    /// Whether the protection of the region was widened and still has to be
    /// restored.
    #[inline]
    pub fn is_changed(&self) -> bool {
        self.original.is_some()
    }

    unsafe fn restore<P: Protect<Prot = T>>(&mut self, protect: &mut P) -> Result<()> {
        if let Some(prot) = self.original.take() {
            unsafe { protect.protect(self.region.base, self.region.len, prot) }?;
            #[cfg(feature = "log")]
            log::trace!(
                "[Restore] address: 0x{:x}, length: {}, prot: {:?}",
                self.region.base,
                self.region.len,
                prot
            );
        }
        Ok(())
    }
}

/// Tracks the regions made writable during one patch run.
///
/// Each distinct region gets one [`SectionGuard`]. Guards are released by
/// [`ProtectionScope::restore_all`], by [`ProtectionScope::finish`], or when the
/// scope is dropped, so an error leaving the walker early still puts the
/// original protections back.
pub struct ProtectionScope<P: Protect> {
    protect: P,
    policy: RestorePolicy,
    guards: Vec<SectionGuard<P::Prot>>,
    changed: usize,
}

impl<P: Protect> ProtectionScope<P> {
    pub fn new(protect: P, policy: RestorePolicy) -> Self {
        Self {
            protect,
            policy,
            guards: Vec::new(),
            changed: 0,
        }
    }

    #[inline]
    pub fn policy(&self) -> RestorePolicy {
        self.policy
    }

    /// Guards that have not been released yet.
    #[inline]
    pub fn guards(&self) -> &[SectionGuard<P::Prot>] {
        &self.guards
    }

    /// Number of protection changes made so far, restores not counted.
    #[inline]
    pub fn changed(&self) -> usize {
        self.changed
    }

    #[inline]
    pub fn protector(&self) -> &P {
        &self.protect
    }

    unsafe fn guard_for(&mut self, addr: usize) -> Result<()> {
        if self.guards.iter().any(|guard| guard.region.contains(addr)) {
            return Ok(());
        }
        let region = unsafe { self.protect.query(addr) }?;
        if !region.contains(addr) {
            return Err(protect_error(format!(
                "no region reported for address 0x{:x} (got {} bytes at 0x{:x})",
                addr, region.len, region.base
            )));
        }
        let original = if P::is_writable(region.prot) {
            None
        } else {
            let writable = P::make_writable(region.prot);
            unsafe { self.protect.protect(region.base, region.len, writable) }?;
            self.changed += 1;
            #[cfg(feature = "log")]
            log::trace!(
                "[Widen] address: 0x{:x}, length: {}, prot: {:?} -> {:?}",
                region.base,
                region.len,
                region.prot,
                writable
            );
            Some(region.prot)
        };
        self.guards.push(SectionGuard { region, original });
        Ok(())
    }

    /// Makes `[addr, addr + len)` writable.
    ///
    /// Regions already guarded are not queried again. A range straddling two
    /// regions gets a guard for each.
    ///
    /// # Safety
    /// The range must lie in mapped memory of the current process.
    pub unsafe fn ensure_writable(&mut self, addr: usize, len: usize) -> Result<()> {
        unsafe { self.guard_for(addr) }?;
        if len > 1 {
            unsafe { self.guard_for(addr.wrapping_add(len - 1)) }?;
        }
        Ok(())
    }

    /// Copies `bytes` to `addr` after making the destination writable.
    ///
    /// # Safety
    /// `addr` must be valid for `bytes.len()` bytes and must not be read or
    /// written concurrently.
    pub unsafe fn write_memory(&mut self, addr: usize, bytes: &[u8]) -> Result<()> {
        unsafe { self.ensure_writable(addr, bytes.len()) }?;
        unsafe { core::ptr::copy_nonoverlapping(bytes.as_ptr(), addr as *mut u8, bytes.len()) };
        if self.policy == RestorePolicy::PerWrite {
            self.restore_all()?;
        }
        Ok(())
    }

    /// Reapplies the original protection of every widened region.
    ///
    /// All guards are released even when one restore fails; the first failure
    /// is returned.
    pub fn restore_all(&mut self) -> Result<()> {
        let mut result = Ok(());
        for mut guard in self.guards.drain(..) {
            // SAFETY: the guard only holds a region returned by `query`, and its
            // original protection.
            if let Err(err) = unsafe { guard.restore(&mut self.protect) } {
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        result
    }

    /// Restores all regions and ends the scope.
    pub fn finish(mut self) -> Result<()> {
        self.restore_all()
    }
}

impl<P: Protect> Drop for ProtectionScope<P> {
    fn drop(&mut self) {
        let _ = self.restore_all();
    }
}
