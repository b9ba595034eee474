use serde::Serialize;

use crate::model::CommonFields;

/// A single named bit in the record metadata byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Flag {
    BurnAfterRead = 1 << 0,
    Hidden = 1 << 1,
}

impl Flag {
    pub const fn bit(self) -> u8 {
        self as u8
    }
}

/// Record-level metadata, stored next to the payload rather than inside it
/// so that scans can filter without decoding values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Meta(u8);

impl Meta {
    pub const EMPTY: Meta = Meta(0);

    pub const fn from_bits(bits: u8) -> Self {
        Meta(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn set(self, flag: Flag) -> Self {
        Meta(self.0 | flag.bit())
    }

    #[must_use]
    pub const fn clear(self, flag: Flag) -> Self {
        Meta(self.0 & !flag.bit())
    }

    #[must_use]
    pub const fn toggle(self, flag: Flag) -> Self {
        Meta(self.0 ^ flag.bit())
    }

    pub const fn has(self, flag: Flag) -> bool {
        self.0 & flag.bit() != 0
    }

    /// Derive the metadata byte for a write from the record's common fields.
    pub fn from_common(common: &CommonFields) -> Self {
        let mut meta = Meta::EMPTY;
        if common.burn_after_read {
            meta = meta.set(Flag::BurnAfterRead);
        }
        if common.hidden {
            meta = meta.set(Flag::Hidden);
        }
        meta
    }
}

impl From<u8> for Meta {
    fn from(bits: u8) -> Self {
        Meta(bits)
    }
}

impl From<Meta> for u8 {
    fn from(meta: Meta) -> Self {
        meta.0
    }
}

/// JSON view of a metadata byte, used by the info listing.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct MetaView {
    pub burn: bool,
    pub hidden: bool,
}

impl From<Meta> for MetaView {
    fn from(meta: Meta) -> Self {
        MetaView {
            burn: meta.has(Flag::BurnAfterRead),
            hidden: meta.has(Flag::Hidden),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_positions() {
        assert_eq!(Flag::BurnAfterRead.bit(), 0b01);
        assert_eq!(Flag::Hidden.bit(), 0b10);
    }

    #[test]
    fn test_set_clear_toggle() {
        let m = Meta::EMPTY.set(Flag::Hidden);
        assert!(m.has(Flag::Hidden));
        assert!(!m.has(Flag::BurnAfterRead));

        let m = m.set(Flag::BurnAfterRead).clear(Flag::Hidden);
        assert_eq!(m.bits(), 0b01);

        let m = m.toggle(Flag::BurnAfterRead).toggle(Flag::Hidden);
        assert_eq!(m.bits(), 0b10);
    }

    #[test]
    fn test_unknown_bits_survive() {
        let m = Meta::from_bits(0b1000_0001);
        assert!(m.has(Flag::BurnAfterRead));
        assert_eq!(m.clear(Flag::BurnAfterRead).bits(), 0b1000_0000);
    }

    #[test]
    fn test_from_common_mirrors_fields() {
        let mut c = CommonFields::default();
        assert_eq!(Meta::from_common(&c), Meta::EMPTY);

        c.burn_after_read = true;
        assert_eq!(Meta::from_common(&c).bits(), 0b01);

        c.hidden = true;
        let m = Meta::from_common(&c);
        assert!(m.has(Flag::BurnAfterRead) && m.has(Flag::Hidden));

        // ttl does not leak into the flag byte
        c.ttl = 30;
        assert_eq!(Meta::from_common(&c).bits(), 0b11);
    }
}
