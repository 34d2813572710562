//! Pseudo-relocation table formats
//!
//! The linker emits the table between `__RUNTIME_PSEUDO_RELOC_LIST__` and
//! `__RUNTIME_PSEUDO_RELOC_LIST_END__`. Three layouts exist:
//!
//! ```text
//! v1, no header:    { addend, target } { addend, target } ...
//! v1, with header:  { 0, 0, 0 } { addend, target } ...
//! v2:               { 0, 0, 1 } { sym, target, flags } ...
//! ```
//!
//! All words are native-endian `u32`, all offsets are relative to the image
//! base. [`RelocTable::parse`] classifies a table once; the walker then only
//! matches on the result.

use crate::{Result, unknown_version};
use core::{fmt::Debug, marker::PhantomData, slice::ChunksExact};

/// Version word of a v1 table that carries a header.
pub const RP_VERSION_V1: u32 = 0;
/// Version word of a v2 table.
pub const RP_VERSION_V2: u32 = 1;

#[inline]
fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_ne_bytes(word)
}

/// A fixed-size record decoded from the raw table.
pub trait Record: Copy + Debug {
    /// Size of the record in the table.
    const SIZE: usize;

    /// Decodes a record from exactly [`Record::SIZE`] bytes.
    fn decode(bytes: &[u8]) -> Self;
}

/// The 12-byte stamp at the start of versioned tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RelocHeader {
    pub magic1: u32,
    pub magic2: u32,
    pub version: u32,
}

impl Record for RelocHeader {
    const SIZE: usize = 12;

    fn decode(bytes: &[u8]) -> Self {
        Self {
            magic1: read_u32(bytes, 0),
            magic2: read_u32(bytes, 4),
            version: read_u32(bytes, 8),
        }
    }
}

/// Add `addend` to the 32-bit value at `base + target`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RelocV1 {
    pub addend: u32,
    pub target: u32,
}

impl Record for RelocV1 {
    const SIZE: usize = 8;

    fn decode(bytes: &[u8]) -> Self {
        Self {
            addend: read_u32(bytes, 0),
            target: read_u32(bytes, 4),
        }
    }
}

/// Rebase the value at `base + target` from the import slot at `base + sym`
/// onto the address the loader stored in that slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RelocV2 {
    pub sym: u32,
    pub target: u32,
    pub flags: u32,
}

impl RelocV2 {
    /// Width of the patched value in bits.
    #[inline]
    pub fn bits(&self) -> u32 {
        self.flags & 0xff
    }
}

impl Record for RelocV2 {
    const SIZE: usize = 12;

    fn decode(bytes: &[u8]) -> Self {
        Self {
            sym: read_u32(bytes, 0),
            target: read_u32(bytes, 4),
            flags: read_u32(bytes, 8),
        }
    }
}

/// Iterator over the complete records of a table body.
///
/// A trailing partial record is never yielded.
#[derive(Clone, Debug)]
pub struct Records<'a, T> {
    chunks: ChunksExact<'a, u8>,
    _marker: PhantomData<T>,
}

impl<'a, T: Record> Records<'a, T> {
    fn new(bytes: &'a [u8]) -> Self {
        Self {
            chunks: bytes.chunks_exact(T::SIZE),
            _marker: PhantomData,
        }
    }
}

impl<T: Record> Iterator for Records<'_, T> {
    type Item = T;

    #[inline]
    fn next(&mut self) -> Option<T> {
        self.chunks.next().map(T::decode)
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        self.chunks.size_hint()
    }
}

impl<T: Record> ExactSizeIterator for Records<'_, T> {}

/// How a table was classified.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TableFormat {
    Empty,
    V1,
    V1WithHeader,
    V2,
}

/// A classified pseudo-relocation table.
#[derive(Clone, Debug)]
pub enum RelocTable<'a> {
    /// Nothing to apply.
    Empty,
    /// Additive 32-bit fixups.
    V1 {
        /// Whether the records follow a `{0, 0, 0}` header.
        header: bool,
        records: Records<'a, RelocV1>,
    },
    /// Width-aware rebase fixups.
    V2 { records: Records<'a, RelocV2> },
}

impl<'a> RelocTable<'a> {
    /// Classifies the table in `bytes`.
    ///
    /// Tables shorter than one v1 record are empty. A table whose first two
    /// words are not both zero is a headerless v1 list: a v1 record
    /// `{0, 0}` would add nothing at offset 0, so linkers never emit one.
    /// Otherwise the third word selects the version.
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        if bytes.len() < RelocV1::SIZE {
            return Ok(RelocTable::Empty);
        }
        if read_u32(bytes, 0) != 0 || read_u32(bytes, 4) != 0 {
            return Ok(RelocTable::V1 {
                header: false,
                records: Records::new(bytes),
            });
        }
        if bytes.len() < RelocHeader::SIZE {
            #[cfg(feature = "log")]
            log::debug!(
                "pseudo relocation table of {} bytes has a truncated header, ignoring it",
                bytes.len()
            );
            return Ok(RelocTable::Empty);
        }
        let header = RelocHeader::decode(bytes);
        let body = &bytes[RelocHeader::SIZE..];
        match header.version {
            RP_VERSION_V1 => Ok(RelocTable::V1 {
                header: true,
                records: Records::new(body),
            }),
            RP_VERSION_V2 => Ok(RelocTable::V2 {
                records: Records::new(body),
            }),
            version => Err(unknown_version(version)),
        }
    }

    pub fn format(&self) -> TableFormat {
        match self {
            RelocTable::Empty => TableFormat::Empty,
            RelocTable::V1 { header: false, .. } => TableFormat::V1,
            RelocTable::V1 { header: true, .. } => TableFormat::V1WithHeader,
            RelocTable::V2 { .. } => TableFormat::V2,
        }
    }

    /// Number of records in the table.
    pub fn len(&self) -> usize {
        match self {
            RelocTable::Empty => 0,
            RelocTable::V1 { records, .. } => records.len(),
            RelocTable::V2 { records } => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Builds the table slice from the linker's boundary symbols.
///
/// An `end` below `start` yields an empty slice.
///
/// # Safety
/// `[start, end)` must be readable for the lifetime `'a`.
pub unsafe fn raw_table<'a>(start: *const u8, end: *const u8) -> &'a [u8] {
    let len = (end as usize).saturating_sub(start as usize);
    if len == 0 {
        return &[];
    }
    unsafe { core::slice::from_raw_parts(start, len) }
}
