//! # pseudo_reloc
//! Runtime pseudo-relocations for PE images built by GNU toolchains.
//!
//! When data is auto-imported from a DLL, the static linker cannot resolve
//! references to it and instead emits a table of pseudo relocations. Before
//! any user code runs, the startup code walks that table and patches every
//! reference with the address the loader resolved, widening page protection
//! where the target is read-only and restoring it afterwards.
//!
//! ## Usage
//! With the `crt` feature on a `windows-gnu` target the crate exports
//! `_pei386_runtime_relocator`, the entry point mingw startup code calls.
//! Elsewhere the same machinery can be driven directly:
//! ```no_run
//! use pseudo_reloc::{DefaultProtect, RestorePolicy, RuntimeRelocator};
//!
//! static RELOCATOR: RuntimeRelocator = RuntimeRelocator::new();
//! # let (table, base): (&[u8], usize) = (&[], 0);
//! let stats = unsafe { RELOCATOR.run(DefaultProtect::new(), table, base, RestorePolicy::Batched) };
//! if let Err(err) = stats {
//!     pseudo_reloc::diag::fatal(&err);
//! }
//! ```
#![no_std]
extern crate alloc;

pub mod apply;
pub mod diag;
mod error;
pub mod os;
pub mod protect;
pub mod runtime;
pub mod table;

pub(crate) use error::{protect_error, unknown_bit_size, unknown_version};

pub use apply::{RelocWidth, Stats};
pub use error::Error;
pub use protect::{DefaultProtect, Protect, ProtectionScope, Region, RestorePolicy};
pub use runtime::{RuntimeRelocator, relocate_image};
pub use table::{RelocTable, RelocV1, RelocV2};

pub type Result<T> = core::result::Result<T, Error>;
