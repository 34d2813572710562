//! Applying pseudo-relocation records to a loaded image
use crate::{
    Result,
    protect::{Protect, ProtectionScope},
    table::{RelocTable, RelocV1, RelocV2, TableFormat},
    unknown_bit_size,
};

/// Width of the value a v2 record patches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelocWidth {
    W8,
    W16,
    W32,
    /// Only available on 64-bit targets.
    W64,
}

impl RelocWidth {
    #[inline]
    pub fn bits(self) -> u32 {
        match self {
            RelocWidth::W8 => 8,
            RelocWidth::W16 => 16,
            RelocWidth::W32 => 32,
            RelocWidth::W64 => 64,
        }
    }

    /// Reads the value at `addr`, sign-extended to pointer width.
    ///
    /// # Safety
    /// `addr` must be readable for `self.bits() / 8` bytes.
    #[inline]
    unsafe fn load(self, addr: usize) -> usize {
        unsafe {
            match self {
                RelocWidth::W8 => (addr as *const i8).read_unaligned() as isize as usize,
                RelocWidth::W16 => (addr as *const i16).read_unaligned() as isize as usize,
                RelocWidth::W32 => (addr as *const i32).read_unaligned() as isize as usize,
                RelocWidth::W64 => (addr as *const i64).read_unaligned() as isize as usize,
            }
        }
    }

    /// Writes `value` truncated to this width.
    #[inline]
    unsafe fn store<P: Protect>(
        self,
        scope: &mut ProtectionScope<P>,
        addr: usize,
        value: usize,
    ) -> Result<()> {
        unsafe {
            match self {
                RelocWidth::W8 => scope.write_memory(addr, &(value as u8).to_ne_bytes()),
                RelocWidth::W16 => scope.write_memory(addr, &(value as u16).to_ne_bytes()),
                RelocWidth::W32 => scope.write_memory(addr, &(value as u32).to_ne_bytes()),
                RelocWidth::W64 => scope.write_memory(addr, &(value as u64).to_ne_bytes()),
            }
        }
    }
}

impl TryFrom<u32> for RelocWidth {
    type Error = crate::Error;

    fn try_from(bits: u32) -> Result<Self> {
        match bits {
            8 => Ok(RelocWidth::W8),
            16 => Ok(RelocWidth::W16),
            32 => Ok(RelocWidth::W32),
            #[cfg(target_pointer_width = "64")]
            64 => Ok(RelocWidth::W64),
            _ => Err(unknown_bit_size(bits)),
        }
    }
}

/// What one pass over a table did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Stats {
    pub format: TableFormat,
    /// Number of records applied.
    pub applied: usize,
}

/// Adds `addend` to the 32-bit value at `base + target`, wrapping.
///
/// # Safety
/// `base + target` must be mapped memory of the current process.
pub unsafe fn apply_v1<P: Protect>(
    scope: &mut ProtectionScope<P>,
    base: usize,
    reloc: &RelocV1,
) -> Result<()> {
    let target = base.wrapping_add(reloc.target as usize);
    let value = unsafe { (target as *const u32).read_unaligned() }.wrapping_add(reloc.addend);
    #[cfg(feature = "log")]
    log::trace!(
        "[V1] target: 0x{:x}, addend: 0x{:x}, value: 0x{:x}",
        target,
        reloc.addend,
        value
    );
    unsafe { scope.write_memory(target, &value.to_ne_bytes()) }
}

/// Moves the value at `base + target` from the import slot at `base + sym`
/// to the address stored in that slot.
///
/// The width is checked before anything is read or written.
///
/// # Safety
/// `base + target` and `base + sym` must be mapped memory of the current
/// process, the slot holding a pointer-sized value.
pub unsafe fn apply_v2<P: Protect>(
    scope: &mut ProtectionScope<P>,
    base: usize,
    reloc: &RelocV2,
) -> Result<()> {
    let width = RelocWidth::try_from(reloc.bits())?;
    let target = base.wrapping_add(reloc.target as usize);
    let slot = base.wrapping_add(reloc.sym as usize);
    let resolved = unsafe { (slot as *const usize).read_unaligned() };
    let value = unsafe { width.load(target) }
        .wrapping_sub(slot)
        .wrapping_add(resolved);
    #[cfg(feature = "log")]
    log::trace!(
        "[V2] target: 0x{:x}, slot: 0x{:x}, resolved: 0x{:x}, bits: {}, value: 0x{:x}",
        target,
        slot,
        resolved,
        width.bits(),
        value
    );
    unsafe { width.store(scope, target, value) }
}

/// Applies every record of `table` in order, stopping at the first error.
///
/// # Safety
/// Every record must describe mapped memory relative to `base`.
pub unsafe fn apply_table<P: Protect>(
    scope: &mut ProtectionScope<P>,
    base: usize,
    table: &RelocTable<'_>,
) -> Result<Stats> {
    let mut applied = 0;
    match table {
        RelocTable::Empty => {}
        RelocTable::V1 { records, .. } => {
            for reloc in records.clone() {
                unsafe { apply_v1(scope, base, &reloc) }?;
                applied += 1;
            }
        }
        RelocTable::V2 { records } => {
            for reloc in records.clone() {
                unsafe { apply_v2(scope, base, &reloc) }?;
                applied += 1;
            }
        }
    }
    #[cfg(feature = "log")]
    log::debug!(
        "applied {} pseudo relocations ({:?}) at base 0x{:x}",
        applied,
        table.format(),
        base
    );
    Ok(Stats {
        format: table.format(),
        applied,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        Error,
        protect::{ProtFlags, RestorePolicy, mock::MockProtect},
        table::RP_VERSION_V2,
    };
    use alloc::vec::Vec;

    fn words(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_ne_bytes()).collect()
    }

    fn image(len: usize) -> (Vec<u8>, MockProtect) {
        let mut image = alloc::vec![0u8; len];
        let base = image.as_mut_ptr() as usize;
        let mock = MockProtect::new([(base, len, ProtFlags::PROT_READ)]);
        (image, mock)
    }

    fn put(image: &mut [u8], offset: usize, bytes: &[u8]) {
        image[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    #[test]
    fn v1_adds_and_wraps() {
        let (mut image, mut mock) = image(0x100);
        put(&mut image, 0x10, &5u32.to_ne_bytes());
        put(&mut image, 0x20, &0xffff_fff0u32.to_ne_bytes());
        let base = image.as_mut_ptr() as usize;
        let bytes = words(&[0x10, 0x10, 0x20, 0x20]);
        let table = RelocTable::parse(&bytes).unwrap();
        let mut scope = ProtectionScope::new(&mut mock, RestorePolicy::Batched);
        let stats = unsafe { apply_table(&mut scope, base, &table) }.unwrap();
        scope.finish().unwrap();
        assert_eq!(stats.applied, 2);
        assert_eq!(stats.format, TableFormat::V1);
        assert_eq!(&image[0x10..0x14], &0x15u32.to_ne_bytes());
        assert_eq!(&image[0x20..0x24], &0x10u32.to_ne_bytes());
        assert_eq!(mock.prot_of(base), ProtFlags::PROT_READ);
    }

    #[test]
    fn v2_rebases_each_width() {
        let (mut image, mut mock) = image(0x200);
        let base = image.as_mut_ptr() as usize;
        let slot = base + 0x100;
        let resolved = base + 0x180;
        put(&mut image, 0x100, &resolved.to_ne_bytes());

        // Displacements from the slot, as the static linker would have left them.
        put(&mut image, 0x00, &(0x10i8).to_ne_bytes());
        put(&mut image, 0x08, &(-0x20i16).to_ne_bytes());
        put(&mut image, 0x10, &((slot + 0x50) as u32).to_ne_bytes());
        let mut entries = alloc::vec![0, 0, RP_VERSION_V2, 0x100, 0x00, 8, 0x100, 0x08, 16, 0x100, 0x10, 32];
        #[cfg(target_pointer_width = "64")]
        {
            put(&mut image, 0x18, &((slot + 0x8) as u64).to_ne_bytes());
            entries.extend_from_slice(&[0x100, 0x18, 64]);
        }
        let bytes = words(&entries);
        let table = RelocTable::parse(&bytes).unwrap();
        let mut scope = ProtectionScope::new(&mut mock, RestorePolicy::Batched);
        unsafe { apply_table(&mut scope, base, &table) }.unwrap();
        drop(scope);

        let delta = resolved.wrapping_sub(slot);
        assert_eq!(image[0x00], (0x10usize.wrapping_add(delta)) as u8);
        assert_eq!(
            &image[0x08..0x0a],
            &(((-0x20isize) as usize).wrapping_add(delta) as u16).to_ne_bytes()
        );
        assert_eq!(&image[0x10..0x14], &((resolved + 0x50) as u32).to_ne_bytes());
        #[cfg(target_pointer_width = "64")]
        assert_eq!(&image[0x18..0x20], &((resolved + 0x8) as u64).to_ne_bytes());
    }

    #[test]
    fn v2_sign_extends_before_rebasing() {
        let (mut image, mut mock) = image(0x40);
        let base = image.as_mut_ptr() as usize;
        // The slot resolves to itself plus 0x10, so the result is value + 0x10.
        let slot = base + 0x20;
        put(&mut image, 0x20, &(slot + 0x10).to_ne_bytes());
        put(&mut image, 0x00, &0xf8u8.to_ne_bytes());
        let reloc = RelocV2 {
            sym: 0x20,
            target: 0,
            flags: 8,
        };
        let mut scope = ProtectionScope::new(&mut mock, RestorePolicy::Batched);
        unsafe { apply_v2(&mut scope, base, &reloc) }.unwrap();
        drop(scope);
        // -8 + 0x10 = 8
        assert_eq!(image[0], 8);
    }

    #[test]
    fn unsupported_width_touches_nothing() {
        let (mut image, mut mock) = image(0x40);
        let base = image.as_mut_ptr() as usize;
        put(&mut image, 0x20, &base.to_ne_bytes());
        for bits in [0, 1, 12, 24, 128, 255] {
            let reloc = RelocV2 {
                sym: 0x20,
                target: 0,
                flags: bits,
            };
            let mut scope = ProtectionScope::new(&mut mock, RestorePolicy::Batched);
            let err = unsafe { apply_v2(&mut scope, base, &reloc) }.unwrap_err();
            assert!(matches!(err, Error::UnknownBitSize { bits: b } if b == bits));
            assert!(scope.guards().is_empty());
        }
        assert!(mock.calls.is_empty());
        assert!(image[..0x20].iter().all(|&b| b == 0));
    }

    #[test]
    fn walk_stops_at_first_bad_record() {
        let (mut image, mut mock) = image(0x40);
        let base = image.as_mut_ptr() as usize;
        put(&mut image, 0x20, &(base + 0x20).to_ne_bytes());
        put(&mut image, 0x00, &7u32.to_ne_bytes());
        put(&mut image, 0x08, &7u32.to_ne_bytes());
        let bytes = words(&[0, 0, RP_VERSION_V2, 0x20, 0x00, 32, 0x20, 0x04, 3, 0x20, 0x08, 32]);
        let table = RelocTable::parse(&bytes).unwrap();
        let mut scope = ProtectionScope::new(&mut mock, RestorePolicy::Batched);
        let err = unsafe { apply_table(&mut scope, base, &table) }.unwrap_err();
        assert!(matches!(err, Error::UnknownBitSize { bits: 3 }));
        drop(scope);
        // Slot resolves to itself, so the first record rewrote the same value.
        assert_eq!(&image[0x00..0x04], &7u32.to_ne_bytes());
        assert_eq!(mock.calls.len(), 2);
        assert_eq!(mock.prot_of(base), ProtFlags::PROT_READ);
    }

    #[test]
    fn width_from_bits() {
        assert_eq!(RelocWidth::try_from(8).unwrap(), RelocWidth::W8);
        assert_eq!(RelocWidth::try_from(16).unwrap(), RelocWidth::W16);
        assert_eq!(RelocWidth::try_from(32).unwrap(), RelocWidth::W32);
        #[cfg(target_pointer_width = "64")]
        assert_eq!(RelocWidth::try_from(64).unwrap(), RelocWidth::W64);
        #[cfg(not(target_pointer_width = "64"))]
        assert!(RelocWidth::try_from(64).is_err());
        assert!(RelocWidth::try_from(33).is_err());
    }
}
