//! Generic register abstractions for type-safe MSR programming

use crate::error::{RegisterError, Result};

/// A contiguous bitfield inside a 64-bit register
///
/// Fields are declared as `const` items, so the layout assertion in
/// [`BitField::new`] is evaluated at compile time.
///
/// # Example
///
/// ```
/// use rdtctl_raw::BitField;
///
/// const EVENT: BitField = BitField::new("event_id", 0, 8);
///
/// let raw = EVENT.insert(0xFFFF_0000, 0x02)?;
/// assert_eq!(raw, 0xFFFF_0002);
/// assert_eq!(EVENT.extract(raw), 0x02);
/// assert!(EVENT.insert(0, 0x100).is_err());
/// # Ok::<(), rdtctl_raw::RegisterError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitField {
    pub name: &'static str,
    pub shift: u32,
    pub width: u32,
}

impl BitField {
    pub const fn new(name: &'static str, shift: u32, width: u32) -> Self {
        assert!(width > 0, "bitfield must be at least one bit wide");
        assert!(shift + width <= 64, "bitfield does not fit in 64 bits");
        Self { name, shift, width }
    }

    /// Largest value the field can hold
    pub const fn max(&self) -> u64 {
        if self.width == 64 {
            u64::MAX
        } else {
            (1u64 << self.width) - 1
        }
    }

    /// Mask of the field at its position in the register
    pub const fn mask(&self) -> u64 {
        self.max() << self.shift
    }

    pub const fn extract(&self, raw: u64) -> u64 {
        (raw >> self.shift) & self.max()
    }

    pub const fn fits(&self, value: u64) -> bool {
        value <= self.max()
    }

    /// Replace the field in `raw` with `value`, leaving other bits untouched
    pub fn insert(&self, raw: u64, value: u64) -> Result<u64> {
        if !self.fits(value) {
            return Err(RegisterError::out_of_range(self.name, value, self.max()));
        }
        Ok((raw & !self.mask()) | (value << self.shift))
    }
}

/// Trait for register layouts that can be converted to/from raw MSR values
///
/// `to_msr_value` masks every field to its width; call `validate` first when
/// the layout was built from caller input, so that oversized values are
/// rejected instead of being silently truncated.
pub trait RegisterLayout: Sized {
    /// Convert this register layout to a raw MSR value
    fn to_msr_value(&self) -> u64;

    /// Parse a raw MSR value into this register layout
    fn from_msr_value(value: u64) -> Self;

    /// Validate that the register values are within acceptable ranges
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Validate, then encode
    fn try_to_msr_value(&self) -> Result<u64> {
        self.validate()?;
        Ok(self.to_msr_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WIDE: BitField = BitField::new("wide", 0, 64);
    const HIGH: BitField = BitField::new("high", 32, 32);

    #[test]
    fn test_full_width_field() {
        assert_eq!(WIDE.max(), u64::MAX);
        assert_eq!(WIDE.mask(), u64::MAX);
        assert_eq!(WIDE.insert(0, u64::MAX).unwrap(), u64::MAX);
    }

    #[test]
    fn test_insert_preserves_other_bits() {
        let raw = HIGH.insert(0x1234_5678, 0xABCD).unwrap();
        assert_eq!(raw, 0x0000_ABCD_1234_5678);
        assert_eq!(HIGH.extract(raw), 0xABCD);
    }

    #[test]
    fn test_insert_out_of_range() {
        let err = BitField::new("rmid", 0, 10).insert(0, 1024).unwrap_err();
        assert_eq!(err, RegisterError::out_of_range("rmid", 1024, 1023));
    }
}
