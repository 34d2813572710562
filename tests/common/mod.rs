#![allow(dead_code)]

use pseudo_reloc::{Protect, Region, protect::ProtFlags};
use std::sync::Once;

static LOG: Once = Once::new();

pub fn init_log() {
    LOG.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

pub fn words(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_ne_bytes()).collect()
}

/// Heap-backed stand-in for a loaded image, reported as read-only.
pub struct Image {
    pub bytes: Vec<u8>,
}

impl Image {
    pub fn new(len: usize) -> Self {
        Self {
            bytes: vec![0; len],
        }
    }

    pub fn base(&mut self) -> usize {
        self.bytes.as_mut_ptr() as usize
    }

    pub fn put(&mut self, offset: usize, bytes: &[u8]) {
        self.bytes[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    pub fn u32_at(&self, offset: usize) -> u32 {
        u32::from_ne_bytes(self.bytes[offset..offset + 4].try_into().unwrap())
    }
}

/// Pretends the whole image is one read-only region and records every
/// protection change.
pub struct ReadOnlyImage {
    pub region: Region<ProtFlags>,
    pub changes: Vec<ProtFlags>,
}

impl ReadOnlyImage {
    pub fn new(base: usize, len: usize) -> Self {
        Self {
            region: Region {
                base,
                len,
                prot: ProtFlags::PROT_READ,
            },
            changes: Vec::new(),
        }
    }
}

impl Protect for ReadOnlyImage {
    type Prot = ProtFlags;

    unsafe fn query(&mut self, addr: usize) -> pseudo_reloc::Result<Region<ProtFlags>> {
        assert!(self.region.contains(addr), "write outside the image: 0x{addr:x}");
        Ok(self.region)
    }

    fn is_writable(prot: ProtFlags) -> bool {
        prot.contains(ProtFlags::PROT_WRITE)
    }

    fn make_writable(prot: ProtFlags) -> ProtFlags {
        prot | ProtFlags::PROT_WRITE
    }

    unsafe fn protect(&mut self, base: usize, len: usize, prot: ProtFlags) -> pseudo_reloc::Result<()> {
        assert_eq!((base, len), (self.region.base, self.region.len));
        self.region.prot = prot;
        self.changes.push(prot);
        Ok(())
    }
}
