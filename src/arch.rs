//! Checked integer conversions between on-disk widths and the host's.

use crate::result::*;

/// A checked cast from u64 to usize
///
/// We could use the `cast` crate,
/// (https://docs.rs/cast/0.2.3/cast/)
/// but this is the only one we really need.
pub fn usize<I: Into<u64>>(i: I) -> ZipResult<usize> {
    let i: u64 = i.into();
    if cfg!(target_pointer_width = "64") || i <= usize::MAX as u64 {
        Ok(i as usize)
    } else {
        Err(ZipError::InsufficientAddressSpace)
    }
}

/// True if `value` can be stored in a classic 32-bit field.
///
/// `0xFFFFFFFF` itself can't: it's the sentinel that sends readers
/// to the Zip64 extended information record. So the largest value written
/// literally is `0xFFFFFFFE`, and promotion starts at the sentinel.
pub fn fits_u32(value: u64) -> bool {
    value < u32::MAX as u64
}

/// True if `value` can be stored in a classic 16-bit field
/// (with `0xFFFF` reserved as the Zip64 sentinel).
pub fn fits_u16(value: u64) -> bool {
    value < u16::MAX as u64
}

/// Narrows `value` to 32 bits, or returns the Zip64 sentinel.
pub fn u32_or_sentinel(value: u64) -> u32 {
    if fits_u32(value) {
        value as u32
    } else {
        u32::MAX
    }
}

/// Narrows `value` to 16 bits, or returns the Zip64 sentinel.
pub fn u16_or_sentinel(value: u64) -> u16 {
    if fits_u16(value) {
        value as u16
    } else {
        u16::MAX
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sentinel_boundaries() {
        assert!(fits_u32(0xFFFF_FFFE));
        assert!(!fits_u32(0xFFFF_FFFF));
        assert!(!fits_u32(0x1_0000_0000));
        assert_eq!(u32_or_sentinel(0xFFFF_FFFE), 0xFFFF_FFFE);
        assert_eq!(u32_or_sentinel(0x1_0000_0000), u32::MAX);
        assert_eq!(u16_or_sentinel(3), 3);
        assert_eq!(u16_or_sentinel(0xFFFF), u16::MAX);
    }
}
