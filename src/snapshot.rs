//! Owned, decoded copies of received frames.

use bytes::Bytes;

use crate::field::FieldName;

/// Decoded copy of the active payload variant of one frame.
///
/// `kind_index` is the discriminant into the payload map's deduplicated kind
/// list: two type codes that map to the same payload kind share an index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadValue {
    code: u32,
    kind_index: usize,
    bytes: Bytes,
}

impl PayloadValue {
    pub(crate) fn new(code: u32, kind_index: usize, bytes: Bytes) -> Self {
        Self {
            code,
            kind_index,
            bytes,
        }
    }

    /// The type code that selected this variant.
    #[inline]
    pub fn type_code(&self) -> u32 {
        self.code
    }

    /// Index into the deduplicated kind list of the payload map.
    #[inline]
    pub fn kind_index(&self) -> usize {
        self.kind_index
    }

    /// Raw payload bytes (empty for the empty-marker kind).
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// True if the active variant carries no bytes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Decode the payload as a plain-data value. Returns `None` when the
    /// byte length does not match `T`.
    pub fn decode<T: bytemuck::AnyBitPattern>(&self) -> Option<T> {
        if self.bytes.len() != std::mem::size_of::<T>() {
            return None;
        }
        Some(bytemuck::pod_read_unaligned(&self.bytes))
    }
}

/// Decoded value of one field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Fixed-width scalar, widened to `u64`.
    Uint(u64),
    /// Raw bytes of a fixed array, constant or variable field.
    Bytes(Bytes),
    /// Active payload variant.
    Payload(PayloadValue),
}

impl FieldValue {
    /// Scalar value, if this is a scalar field.
    pub fn as_uint(&self) -> Option<u64> {
        match self {
            FieldValue::Uint(v) => Some(*v),
            _ => None,
        }
    }

    /// Raw bytes of the field, regardless of representation. Scalars return
    /// `None` (use [`as_uint`](Self::as_uint)).
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            FieldValue::Bytes(b) => Some(b),
            FieldValue::Payload(p) => Some(p.bytes()),
            FieldValue::Uint(_) => None,
        }
    }

    /// Payload variant, if this is a payload field.
    pub fn as_payload(&self) -> Option<&PayloadValue> {
        match self {
            FieldValue::Payload(p) => Some(p),
            _ => None,
        }
    }

    /// Decode the field bytes as a plain-data value.
    pub fn decode<T: bytemuck::AnyBitPattern>(&self) -> Option<T> {
        let bytes = self.as_bytes()?;
        if bytes.len() != std::mem::size_of::<T>() {
            return None;
        }
        Some(bytemuck::pod_read_unaligned(bytes))
    }
}

/// Immutable copy of all field values of one completed frame.
///
/// Snapshots own their data; subscribers and queue consumers may retain them
/// freely after the engine has reset for the next frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSnapshot {
    entries: Vec<(FieldName, FieldValue)>,
}

impl FrameSnapshot {
    pub(crate) fn new(entries: Vec<(FieldName, FieldValue)>) -> Self {
        Self { entries }
    }

    /// Value of a field by name.
    pub fn get(&self, name: FieldName) -> Option<&FieldValue> {
        self.entries
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v)
    }

    /// Iterate `(name, value)` pairs in layout order.
    pub fn iter(&self) -> impl Iterator<Item = (FieldName, &FieldValue)> {
        self.entries.iter().map(|(n, v)| (*n, v))
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the snapshot holds no fields.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_by_name() {
        let snapshot = FrameSnapshot::new(vec![
            (FieldName::Len, FieldValue::Uint(23)),
            (
                FieldName::Data,
                FieldValue::Bytes(Bytes::from_static(b"abc")),
            ),
        ]);

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get(FieldName::Len).unwrap().as_uint(), Some(23));
        assert_eq!(
            snapshot.get(FieldName::Data).unwrap().as_bytes(),
            Some(&b"abc"[..])
        );
        assert!(snapshot.get(FieldName::Crc).is_none());
    }

    #[test]
    fn test_payload_decode() {
        #[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
        #[repr(C, packed)]
        struct Pair {
            a: u8,
            b: u16,
        }

        let value = PayloadValue::new(2, 0, Bytes::from_static(&[0x07, 0x22, 0x11]));
        let decoded: Pair = value.decode().unwrap();
        assert_eq!(decoded, Pair { a: 7, b: 0x1122 });

        // Wrong size refuses to decode.
        assert!(value.decode::<u32>().is_none());
    }

    #[test]
    fn test_uint_has_no_bytes_view() {
        let value = FieldValue::Uint(42);
        assert_eq!(value.as_uint(), Some(42));
        assert!(value.as_bytes().is_none());
        assert!(value.as_payload().is_none());
    }
}
