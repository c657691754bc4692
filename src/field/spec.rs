//! Field descriptors.
//!
//! A [`FieldSpec`] is the immutable, declaration-time description of one slot
//! in a frame: its name, wire representation, flags and (optionally) a
//! matcher. Specs carry no runtime state; the engines keep per-field cursors
//! separately so a layout can be shared between RX and TX.

use crate::field::{FieldFlags, FieldName, PayloadMap};

/// Result of a matcher running against container state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    /// Field accepted, advance to the next one.
    Match,
    /// More bytes are needed.
    Processing,
    /// Frame rejected, resynchronise.
    NoMatch,
}

/// Validation/computation hook attached to a field.
///
/// The same matcher drives both directions: on RX it validates the received
/// value, on TX it writes the computed one (`TypeSelect` and `Custom` are
/// RX-only checks; on TX the TYPE value is provided or inferred).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Matcher {
    /// RX: derive the DATA size from LEN. TX: write the LEN sum.
    DataLen,
    /// RX: check `ALEN == ~LEN`. TX: write `~LEN`.
    AntiLen,
    /// RX: select the active payload variant from the received type code.
    TypeSelect,
    /// RX: recompute the CRC window and compare. TX: write the CRC.
    Checksum,
    /// User hook over the completed field bytes (logical order), RX only.
    Custom(fn(&[u8]) -> MatchOutcome),
}

/// Wire representation of one field.
#[derive(Debug, Clone)]
pub enum WireKind {
    /// Fixed-width unsigned scalar, stored little-endian in the frame buffer.
    Uint {
        /// Width in bytes: 1, 2, 4 or 8.
        width: usize,
    },
    /// Fixed byte run; plain-data structs land here.
    Array {
        /// Length in bytes.
        len: usize,
    },
    /// Constant byte pattern, matched byte-by-byte on RX and emitted on TX.
    Const {
        /// The expected bytes, in logical order.
        pattern: &'static [u8],
    },
    /// Variable payload whose concrete variant is selected by the TYPE code.
    Payload(PayloadMap),
    /// Variable byte run sized by LEN, with an upper bound.
    Var {
        /// Upper bound in bytes.
        max: usize,
    },
}

/// Immutable descriptor of one field.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    name: FieldName,
    kind: WireKind,
    flags: FieldFlags,
    matcher: Option<Matcher>,
}

impl FieldSpec {
    /// Fixed-width unsigned scalar field.
    pub fn uint(name: FieldName, width: usize) -> Self {
        Self::raw(name, WireKind::Uint { width })
    }

    /// Fixed byte-run field of `len` bytes.
    pub fn array(name: FieldName, len: usize) -> Self {
        Self::raw(name, WireKind::Array { len })
    }

    /// Fixed byte-run field sized after a plain-data type.
    pub fn pod_array<T: bytemuck::NoUninit>(name: FieldName) -> Self {
        Self::array(name, std::mem::size_of::<T>())
    }

    /// Constant-pattern field.
    pub fn constant(name: FieldName, pattern: &'static [u8]) -> Self {
        Self::raw(name, WireKind::Const { pattern })
    }

    /// Variant payload field.
    pub fn payload(name: FieldName, map: PayloadMap) -> Self {
        Self::raw(name, WireKind::Payload(map))
    }

    /// Variable byte-run field bounded by `max`.
    pub fn var(name: FieldName, max: usize) -> Self {
        Self::raw(name, WireKind::Var { max })
    }

    fn raw(name: FieldName, kind: WireKind) -> Self {
        Self {
            name,
            kind,
            flags: FieldFlags::NONE,
            matcher: None,
        }
    }

    /// Replace the flag set.
    pub fn with_flags(mut self, flags: FieldFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Attach a matcher explicitly. Without this, layout construction binds
    /// the default matcher for the standard LEN/ALEN/TYPE/CRC names.
    pub fn with_matcher(mut self, matcher: Matcher) -> Self {
        self.matcher = Some(matcher);
        self
    }

    /// Field name.
    #[inline]
    pub fn name(&self) -> FieldName {
        self.name
    }

    /// Wire representation.
    #[inline]
    pub fn kind(&self) -> &WireKind {
        &self.kind
    }

    /// Flag set.
    #[inline]
    pub fn flags(&self) -> FieldFlags {
        self.flags
    }

    /// Attached matcher, if any.
    #[inline]
    pub fn matcher(&self) -> Option<Matcher> {
        self.matcher
    }

    pub(crate) fn set_matcher(&mut self, matcher: Matcher) {
        self.matcher = Some(matcher);
    }

    /// Statically known size, when the kind has one.
    pub fn fixed_size(&self) -> Option<usize> {
        match &self.kind {
            WireKind::Uint { width } => Some(*width),
            WireKind::Array { len } => Some(*len),
            WireKind::Const { pattern } => Some(pattern.len()),
            WireKind::Payload(_) | WireKind::Var { .. } => None,
        }
    }

    /// Upper bound on the wire size; used to size frame buffers.
    pub fn max_size(&self) -> usize {
        match &self.kind {
            WireKind::Uint { width } => *width,
            WireKind::Array { len } => *len,
            WireKind::Const { pattern } => pattern.len(),
            WireKind::Payload(map) => map.max_size(),
            WireKind::Var { max } => *max,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_sizes() {
        assert_eq!(FieldSpec::uint(FieldName::Len, 2).fixed_size(), Some(2));
        assert_eq!(FieldSpec::array(FieldName::Data, 19).fixed_size(), Some(19));
        assert_eq!(
            FieldSpec::constant(FieldName::Id, &[0xAA, 0xBB]).fixed_size(),
            Some(2)
        );
        assert_eq!(FieldSpec::var(FieldName::Data, 64).fixed_size(), None);
    }

    #[test]
    fn test_max_size_of_var() {
        let spec = FieldSpec::var(FieldName::Data, 128);
        assert_eq!(spec.max_size(), 128);
    }

    #[test]
    fn test_pod_array_size() {
        #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
        #[repr(C, packed)]
        struct Three {
            a: u8,
            b: u16,
        }
        let spec = FieldSpec::pod_array::<Three>(FieldName::Data);
        assert_eq!(spec.fixed_size(), Some(3));
    }

    #[test]
    fn test_builder_style() {
        let spec = FieldSpec::uint(FieldName::Crc, 2)
            .with_flags(FieldFlags::REVERSE)
            .with_matcher(Matcher::Checksum);
        assert_eq!(spec.name(), FieldName::Crc);
        assert!(spec.flags().contains(FieldFlags::REVERSE));
        assert_eq!(spec.matcher(), Some(Matcher::Checksum));
    }
}
