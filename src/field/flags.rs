//! Per-field behaviour flags.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Bitset of per-field properties.
///
/// Flags compose with `|`:
///
/// ```
/// use framewire::FieldFlags;
///
/// let flags = FieldFlags::IS_IN_LEN | FieldFlags::IS_IN_CRC;
/// assert!(flags.contains(FieldFlags::IS_IN_LEN));
/// assert!(!flags.contains(FieldFlags::REVERSE));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FieldFlags(u8);

impl FieldFlags {
    /// No flags set.
    pub const NONE: FieldFlags = FieldFlags(0);
    /// Field byte count contributes to the LEN value.
    pub const IS_IN_LEN: FieldFlags = FieldFlags(1);
    /// Field bytes participate in the CRC window.
    pub const IS_IN_CRC: FieldFlags = FieldFlags(1 << 1);
    /// On the wire, bytes are stored in reversed order relative to the
    /// logical (little-endian) representation.
    pub const REVERSE: FieldFlags = FieldFlags(1 << 2);
    /// Present in the layout but occupies no wire bytes (reserved).
    pub const SUPPRESS: FieldFlags = FieldFlags(1 << 3);
    /// Size is fixed regardless of LEN negotiation.
    pub const CONST_SIZE: FieldFlags = FieldFlags(1 << 4);

    /// True if every flag in `other` is set in `self`.
    #[inline]
    pub const fn contains(self, other: FieldFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if no flags are set.
    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for FieldFlags {
    type Output = FieldFlags;

    fn bitor(self, rhs: FieldFlags) -> FieldFlags {
        FieldFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for FieldFlags {
    fn bitor_assign(&mut self, rhs: FieldFlags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for FieldFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("NONE");
        }
        let mut first = true;
        let mut put = |f: &mut fmt::Formatter<'_>, name: &str| -> fmt::Result {
            if !first {
                f.write_str("|")?;
            }
            first = false;
            f.write_str(name)
        };
        if self.contains(FieldFlags::IS_IN_LEN) {
            put(f, "IS_IN_LEN")?;
        }
        if self.contains(FieldFlags::IS_IN_CRC) {
            put(f, "IS_IN_CRC")?;
        }
        if self.contains(FieldFlags::REVERSE) {
            put(f, "REVERSE")?;
        }
        if self.contains(FieldFlags::SUPPRESS) {
            put(f, "SUPPRESS")?;
        }
        if self.contains(FieldFlags::CONST_SIZE) {
            put(f, "CONST_SIZE")?;
        }
        Ok(())
    }
}
