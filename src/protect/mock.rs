use super::{ProtFlags, Protect, Region};
use crate::{Result, protect_error};
use alloc::{format, vec::Vec};

/// A recording backend over plain heap memory.
pub(crate) struct MockProtect {
    pub(crate) regions: Vec<Region<ProtFlags>>,
    pub(crate) calls: Vec<(usize, usize, ProtFlags)>,
    pub(crate) queries: usize,
    pub(crate) fail_protect: bool,
}

impl MockProtect {
    pub(crate) fn new(regions: impl IntoIterator<Item = (usize, usize, ProtFlags)>) -> Self {
        Self {
            regions: regions
                .into_iter()
                .map(|(base, len, prot)| Region { base, len, prot })
                .collect(),
            calls: Vec::new(),
            queries: 0,
            fail_protect: false,
        }
    }

    pub(crate) fn prot_of(&self, addr: usize) -> ProtFlags {
        self.regions
            .iter()
            .find(|region| region.contains(addr))
            .map(|region| region.prot)
            .unwrap()
    }
}

impl Protect for MockProtect {
    type Prot = ProtFlags;

    unsafe fn query(&mut self, addr: usize) -> Result<Region<ProtFlags>> {
        self.queries += 1;
        self.regions
            .iter()
            .find(|region| region.contains(addr))
            .copied()
            .ok_or_else(|| protect_error(format!("address 0x{addr:x} is not mapped")))
    }

    fn is_writable(prot: ProtFlags) -> bool {
        super::flags_writable(prot)
    }

    fn make_writable(prot: ProtFlags) -> ProtFlags {
        super::flags_make_writable(prot)
    }

    unsafe fn protect(&mut self, base: usize, len: usize, prot: ProtFlags) -> Result<()> {
        if self.fail_protect {
            return Err(protect_error("mprotect failed"));
        }
        self.calls.push((base, len, prot));
        for region in self.regions.iter_mut().filter(|r| r.base == base) {
            region.prot = prot;
        }
        Ok(())
    }
}
