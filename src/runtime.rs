//! The one-shot startup driver
use crate::{
    Result,
    apply::{Stats, apply_table},
    protect::{Protect, ProtectionScope, RestorePolicy},
    table::RelocTable,
};

#[cfg(not(feature = "portable-atomic"))]
use core::sync::atomic::{AtomicU8, Ordering};
#[cfg(feature = "portable-atomic")]
use portable_atomic::{AtomicU8, Ordering};

/// Where a [`RuntimeRelocator`] is in its life.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    NotRun = 0,
    Running = 1,
    Done = 2,
}

impl RunState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => RunState::NotRun,
            1 => RunState::Running,
            _ => RunState::Done,
        }
    }
}

/// Applies an image's pseudo-relocation table at most once.
///
/// The state only moves forward: `NotRun → Running → Done`. A failed run also
/// ends in `Done`, since there is no way to retry a half-applied table.
#[derive(Debug)]
pub struct RuntimeRelocator {
    state: AtomicU8,
}

impl RuntimeRelocator {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(RunState::NotRun as u8),
        }
    }

    #[inline]
    pub fn state(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Relocates the image at `base` with `table`, unless this relocator has
    /// already been started.
    ///
    /// Returns `Ok(None)` for the no-op case.
    ///
    /// # Safety
    /// See [`relocate_image`].
    pub unsafe fn run<P: Protect>(
        &self,
        protect: P,
        table: &[u8],
        base: usize,
        policy: RestorePolicy,
    ) -> Result<Option<Stats>> {
        if self
            .state
            .compare_exchange(
                RunState::NotRun as u8,
                RunState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            #[cfg(feature = "log")]
            log::debug!("pseudo relocations already applied, skipping");
            return Ok(None);
        }
        let result = unsafe { relocate_image(protect, table, base, policy) };
        self.state.store(RunState::Done as u8, Ordering::Release);
        result.map(Some)
    }
}

impl Default for RuntimeRelocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses `table` and applies it to the image loaded at `base`.
///
/// Every widened region is restored before this returns, on success and on
/// error alike.
///
/// # Safety
/// `table` must be the pseudo-relocation table of the image at `base`, and no
/// other thread may touch the image while it is being patched.
pub unsafe fn relocate_image<P: Protect>(
    protect: P,
    table: &[u8],
    base: usize,
    policy: RestorePolicy,
) -> Result<Stats> {
    let table = RelocTable::parse(table)?;
    #[cfg(feature = "log")]
    log::debug!(
        "pseudo relocation table: {:?}, {} records, base 0x{:x}",
        table.format(),
        table.len(),
        base
    );
    if table.is_empty() {
        return Ok(Stats {
            format: table.format(),
            applied: 0,
        });
    }
    let mut scope = ProtectionScope::new(protect, policy);
    let stats = unsafe { apply_table(&mut scope, base, &table) }?;
    scope.finish()?;
    Ok(stats)
}

#[cfg(all(feature = "crt", windows, target_env = "gnu"))]
mod crt {
    use super::RuntimeRelocator;
    use crate::{diag::fatal, os::DefaultProtect, protect::RestorePolicy, table::raw_table};

    unsafe extern "C" {
        static __RUNTIME_PSEUDO_RELOC_LIST__: u8;
        static __RUNTIME_PSEUDO_RELOC_LIST_END__: u8;
        static __ImageBase: u8;
    }

    static RELOCATOR: RuntimeRelocator = RuntimeRelocator::new();

    /// Called by mingw startup code before `main` or `DllMain`.
    #[unsafe(no_mangle)]
    pub unsafe extern "C" fn _pei386_runtime_relocator() {
        let (start, end, base) = unsafe {
            (
                &raw const __RUNTIME_PSEUDO_RELOC_LIST__,
                &raw const __RUNTIME_PSEUDO_RELOC_LIST_END__,
                &raw const __ImageBase,
            )
        };
        let table = unsafe { raw_table(start, end) };
        let result = unsafe {
            RELOCATOR.run(
                DefaultProtect::new(),
                table,
                base as usize,
                RestorePolicy::Batched,
            )
        };
        if let Err(err) = result {
            fatal(&err);
        }
    }
}
