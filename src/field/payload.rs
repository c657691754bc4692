//! Variant payload descriptions.
//!
//! A [`PayloadMap`] binds runtime type codes (the value carried by the TYPE
//! field) to payload kinds. Exactly one entry becomes *active* per frame once
//! the TYPE field has matched. Kinds are deduplicated at construction: two
//! distinct codes may map to the same kind, and snapshot values expose the
//! deduplicated kind index as the discriminant.

use std::any::TypeId;
use std::mem;

use crate::error::{FrameError, Result};

/// One payload alternative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// Fixed-size plain value with a known byte length.
    ///
    /// `type_id` is present when the entry was registered from a concrete
    /// Rust type; it lets the TX side infer the type code from a value.
    Fixed {
        /// Byte length on the wire.
        size: usize,
        /// Identity of the registering Rust type, if any.
        type_id: Option<TypeId>,
    },
    /// Variable-length byte run with an upper bound; the concrete size comes
    /// from the LEN field.
    Var {
        /// Upper bound in bytes.
        max: usize,
    },
    /// No payload bytes at all.
    Empty,
}

impl PayloadKind {
    /// Wire size when it is known without LEN negotiation.
    pub fn wire_size(&self) -> Option<usize> {
        match self {
            PayloadKind::Fixed { size, .. } => Some(*size),
            PayloadKind::Var { .. } => None,
            PayloadKind::Empty => Some(0),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct MapEntry {
    code: u32,
    kind: usize,
}

/// Ordered, deduplicated set of `(type code, payload kind)` pairs.
#[derive(Debug, Clone)]
pub struct PayloadMap {
    entries: Vec<MapEntry>,
    kinds: Vec<PayloadKind>,
}

impl PayloadMap {
    /// Start building a map.
    pub fn builder() -> PayloadMapBuilder {
        PayloadMapBuilder {
            entries: Vec::new(),
        }
    }

    /// Look up a type code; returns the deduplicated kind index and the kind.
    pub fn kind_of(&self, code: u32) -> Option<(usize, PayloadKind)> {
        self.entries
            .iter()
            .find(|e| e.code == code)
            .map(|e| (e.kind, self.kinds[e.kind]))
    }

    /// True if the map contains the given type code.
    pub fn has_code(&self, code: u32) -> bool {
        self.entries.iter().any(|e| e.code == code)
    }

    /// Type code registered for the given Rust type, if any.
    pub fn code_for_type(&self, id: TypeId) -> Option<u32> {
        self.entries.iter().find_map(|e| match self.kinds[e.kind] {
            PayloadKind::Fixed {
                type_id: Some(t), ..
            } if t == id => Some(e.code),
            _ => None,
        })
    }

    /// The code of the single [`PayloadKind::Var`] entry, if there is exactly
    /// one. Used to infer the type code for a raw byte payload.
    pub fn sole_var_code(&self) -> Option<u32> {
        let mut found = None;
        for e in &self.entries {
            if matches!(self.kinds[e.kind], PayloadKind::Var { .. }) {
                if found.is_some() {
                    return None;
                }
                found = Some(e.code);
            }
        }
        found
    }

    /// Largest possible wire size over all kinds.
    pub fn max_size(&self) -> usize {
        self.kinds
            .iter()
            .map(|k| match k {
                PayloadKind::Fixed { size, .. } => *size,
                PayloadKind::Var { max } => *max,
                PayloadKind::Empty => 0,
            })
            .max()
            .unwrap_or(0)
    }

    /// Deduplicated payload kinds, in first-seen order.
    pub fn kinds(&self) -> &[PayloadKind] {
        &self.kinds
    }

    /// Number of `(code, kind)` entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no entries were registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Builder for [`PayloadMap`].
///
/// ```
/// use framewire::PayloadMap;
///
/// let map = PayloadMap::builder()
///     .fixed_bytes(1, 19)
///     .var(2, 256)
///     .empty(3)
///     .build()
///     .unwrap();
/// assert_eq!(map.len(), 3);
/// ```
pub struct PayloadMapBuilder {
    entries: Vec<(u32, PayloadKind)>,
}

impl PayloadMapBuilder {
    /// Register a fixed-size payload from a concrete plain-data type.
    pub fn fixed<T: bytemuck::AnyBitPattern + 'static>(mut self, code: u32) -> Self {
        self.entries.push((
            code,
            PayloadKind::Fixed {
                size: mem::size_of::<T>(),
                type_id: Some(TypeId::of::<T>()),
            },
        ));
        self
    }

    /// Register a fixed-size payload by byte length only.
    pub fn fixed_bytes(mut self, code: u32, size: usize) -> Self {
        self.entries.push((
            code,
            PayloadKind::Fixed {
                size,
                type_id: None,
            },
        ));
        self
    }

    /// Register a variable-length byte payload with an upper bound.
    pub fn var(mut self, code: u32, max: usize) -> Self {
        self.entries.push((code, PayloadKind::Var { max }));
        self
    }

    /// Register an empty payload marker.
    pub fn empty(mut self, code: u32) -> Self {
        self.entries.push((code, PayloadKind::Empty));
        self
    }

    /// Validate and build the map. Duplicate codes are rejected.
    pub fn build(self) -> Result<PayloadMap> {
        let mut kinds: Vec<PayloadKind> = Vec::new();
        let mut entries: Vec<MapEntry> = Vec::new();
        for (code, kind) in self.entries {
            if entries.iter().any(|e| e.code == code) {
                return Err(FrameError::Layout(format!(
                    "duplicate payload type code {code}"
                )));
            }
            let index = match kinds.iter().position(|k| *k == kind) {
                Some(i) => i,
                None => {
                    kinds.push(kind);
                    kinds.len() - 1
                }
            };
            entries.push(MapEntry { code, kind: index });
        }
        Ok(PayloadMap { entries, kinds })
    }
}
