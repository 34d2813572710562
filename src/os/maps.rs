//! Region lookup through `/proc/self/maps`
use crate::protect::{ProtFlags, Region};

pub(crate) const MAPS_PATH: &core::ffi::CStr = c"/proc/self/maps";

/// Finds the mapping containing `addr` in the text of `/proc/self/maps`.
pub(crate) fn find_region(maps: &[u8], addr: usize) -> Option<Region<ProtFlags>> {
    maps.split(|&b| b == b'\n')
        .filter_map(parse_line)
        .find(|region| region.contains(addr))
}

// 7f1c2a000000-7f1c2a021000 r-xp 00000000 08:01 1234   /usr/lib/libfoo.so
fn parse_line(line: &[u8]) -> Option<Region<ProtFlags>> {
    let mut fields = line
        .split(|&b| b == b' ')
        .filter(|field| !field.is_empty());
    let range = core::str::from_utf8(fields.next()?).ok()?;
    let perms = fields.next()?;
    let (start, end) = range.split_once('-')?;
    let start = usize::from_str_radix(start, 16).ok()?;
    let end = usize::from_str_radix(end, 16).ok()?;
    let mut prot = ProtFlags::PROT_NONE;
    for (&c, flag) in perms.iter().zip([
        ProtFlags::PROT_READ,
        ProtFlags::PROT_WRITE,
        ProtFlags::PROT_EXEC,
    ]) {
        if c != b'-' {
            prot |= flag;
        }
    }
    Some(Region {
        base: start,
        len: end.checked_sub(start)?,
        prot,
    })
}
