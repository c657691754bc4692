//! Ordered field sets.
//!
//! A [`FieldLayout`] is the validated, immutable sequence of [`FieldSpec`]s
//! that defines one direction of one protocol. Construction binds default
//! matchers for the standard LEN/ALEN/TYPE/CRC names and rejects every
//! contradiction it can detect, so that name lookup and matcher dispatch are
//! total afterwards.

use crate::error::{FrameError, Result};
use crate::field::{FieldFlags, FieldName, FieldSpec, Matcher, WireKind};

/// Widths accepted for scalar fields.
const UINT_WIDTHS: [usize; 4] = [1, 2, 4, 8];

/// Ordered sequence of field descriptors forming one frame.
#[derive(Debug, Clone)]
pub struct FieldLayout {
    fields: Vec<FieldSpec>,
    frame_capacity: usize,
}

impl FieldLayout {
    /// Validate the field sequence and build a layout.
    ///
    /// Fields named `Len`, `Alen`, `Type` and `Crc` that carry no explicit
    /// matcher get the corresponding default bound here (when the layout
    /// satisfies the matcher's prerequisites).
    pub fn new(mut fields: Vec<FieldSpec>) -> Result<Self> {
        if fields.is_empty() {
            return Err(FrameError::Layout("layout has no fields".into()));
        }

        for i in 0..fields.len() {
            for j in i + 1..fields.len() {
                if fields[i].name() == fields[j].name() {
                    return Err(FrameError::Layout(format!(
                        "duplicate field name {}",
                        fields[i].name()
                    )));
                }
            }
        }

        let has_data = fields.iter().any(|f| f.name() == FieldName::Data);
        let data_is_payload = fields
            .iter()
            .any(|f| f.name() == FieldName::Data && matches!(f.kind(), WireKind::Payload(_)));

        // Default matcher binding for the standard names.
        for field in fields.iter_mut() {
            if field.matcher().is_some() {
                continue;
            }
            match field.name() {
                FieldName::Len if has_data => field.set_matcher(Matcher::DataLen),
                FieldName::Alen => field.set_matcher(Matcher::AntiLen),
                FieldName::Type if data_is_payload => field.set_matcher(Matcher::TypeSelect),
                FieldName::Crc => field.set_matcher(Matcher::Checksum),
                _ => {}
            }
        }

        Self::validate(&fields)?;

        let frame_capacity = fields.iter().map(FieldSpec::max_size).sum();
        Ok(Self {
            fields,
            frame_capacity,
        })
    }

    fn validate(fields: &[FieldSpec]) -> Result<()> {
        let mut dynamic_count = 0usize;
        let mut len_pos: Option<usize> = None;
        let mut len_width = 0usize;

        if fields
            .iter()
            .all(|f| f.flags().contains(FieldFlags::SUPPRESS))
        {
            return Err(FrameError::Layout(
                "layout consists only of suppressed fields".into(),
            ));
        }

        for (pos, field) in fields.iter().enumerate() {
            let name = field.name();
            match field.kind() {
                WireKind::Uint { width } => {
                    if !UINT_WIDTHS.contains(width) {
                        return Err(FrameError::Layout(format!(
                            "field {name}: scalar width {width} is not 1, 2, 4 or 8"
                        )));
                    }
                }
                WireKind::Const { pattern } => {
                    if pattern.is_empty() {
                        return Err(FrameError::Layout(format!(
                            "field {name}: empty constant pattern"
                        )));
                    }
                    if field.matcher().is_some() {
                        return Err(FrameError::Layout(format!(
                            "field {name}: constant fields cannot carry a matcher"
                        )));
                    }
                }
                WireKind::Payload(map) => {
                    dynamic_count += 1;
                    if map.is_empty() {
                        return Err(FrameError::Layout(format!(
                            "field {name}: payload map has no entries"
                        )));
                    }
                }
                WireKind::Var { max } => {
                    dynamic_count += 1;
                    if *max == 0 {
                        return Err(FrameError::Layout(format!(
                            "field {name}: variable field with zero upper bound"
                        )));
                    }
                }
                WireKind::Array { .. } => {}
            }

            if matches!(field.kind(), WireKind::Payload(_) | WireKind::Var { .. }) {
                if name != FieldName::Data {
                    return Err(FrameError::Layout(format!(
                        "field {name}: variable-size fields must be named DATA"
                    )));
                }
                if field.flags().contains(FieldFlags::REVERSE) {
                    return Err(FrameError::Layout(
                        "REVERSE is only supported on fixed-size fields".into(),
                    ));
                }
                if len_pos.is_none() {
                    return Err(FrameError::Layout(
                        "dynamic DATA field requires a preceding LEN field".into(),
                    ));
                }
            }

            match field.matcher() {
                Some(Matcher::DataLen) => {
                    if !matches!(field.kind(), WireKind::Uint { .. }) {
                        return Err(FrameError::Layout(format!(
                            "field {name}: DataLen matcher requires a scalar field"
                        )));
                    }
                    if !fields.iter().any(|f| f.name() == FieldName::Data) {
                        return Err(FrameError::Layout(
                            "DataLen matcher requires a DATA field".into(),
                        ));
                    }
                    len_pos = Some(pos);
                    if let WireKind::Uint { width } = field.kind() {
                        len_width = *width;
                    }
                }
                Some(Matcher::AntiLen) => match field.kind() {
                    WireKind::Uint { width } => {
                        if len_pos.is_none() {
                            return Err(FrameError::Layout(
                                "AntiLen matcher requires a preceding LEN field".into(),
                            ));
                        }
                        if *width != len_width {
                            return Err(FrameError::Layout(format!(
                                "field {name}: ALEN width {width} differs from LEN width {len_width}"
                            )));
                        }
                    }
                    _ => {
                        return Err(FrameError::Layout(format!(
                            "field {name}: AntiLen matcher requires a scalar field"
                        )));
                    }
                },
                Some(Matcher::TypeSelect) => {
                    if !matches!(field.kind(), WireKind::Uint { width } if *width <= 4) {
                        return Err(FrameError::Layout(format!(
                            "field {name}: TypeSelect matcher requires a scalar of at most 4 bytes"
                        )));
                    }
                    let payload_data = fields.iter().any(|f| {
                        f.name() == FieldName::Data && matches!(f.kind(), WireKind::Payload(_))
                    });
                    if !payload_data {
                        return Err(FrameError::Layout(
                            "TypeSelect matcher requires a payload DATA field".into(),
                        ));
                    }
                }
                Some(Matcher::Checksum) => {
                    if !matches!(field.kind(), WireKind::Uint { width } if *width <= 4) {
                        return Err(FrameError::Layout(format!(
                            "field {name}: Checksum matcher requires a scalar of at most 4 bytes"
                        )));
                    }
                }
                Some(Matcher::Custom(_)) | None => {}
            }
        }

        if dynamic_count > 1 {
            return Err(FrameError::Layout(
                "at most one variable-size field is supported per layout".into(),
            ));
        }

        // A payload DATA field needs a TYPE field to ever select a variant.
        let payload_data = fields
            .iter()
            .any(|f| f.name() == FieldName::Data && matches!(f.kind(), WireKind::Payload(_)));
        let has_type_select = fields
            .iter()
            .any(|f| matches!(f.matcher(), Some(Matcher::TypeSelect)));
        if payload_data && !has_type_select {
            return Err(FrameError::Layout(
                "payload DATA field requires a TYPE field with a TypeSelect matcher".into(),
            ));
        }

        Ok(())
    }

    /// Number of fields.
    #[inline]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True if the layout holds no fields (never true after construction).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Look up a field by name.
    pub fn get(&self, name: FieldName) -> Result<&FieldSpec> {
        self.fields
            .iter()
            .find(|f| f.name() == name)
            .ok_or(FrameError::NoSuchField(name))
    }

    /// True if the layout contains a field with the given name.
    pub fn has(&self, name: FieldName) -> bool {
        self.fields.iter().any(|f| f.name() == name)
    }

    /// Position of a field by name.
    pub fn position(&self, name: FieldName) -> Option<usize> {
        self.fields.iter().position(|f| f.name() == name)
    }

    /// Statically known size of a field, `None` when absent or dynamic.
    pub fn size_of(&self, name: FieldName) -> Option<usize> {
        self.fields
            .iter()
            .find(|f| f.name() == name)
            .and_then(FieldSpec::fixed_size)
    }

    /// Field at a position. Panics on an out-of-range index, which cannot be
    /// produced by the engines.
    #[inline]
    pub fn field(&self, index: usize) -> &FieldSpec {
        &self.fields[index]
    }

    /// Iterate fields in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter()
    }

    /// Upper bound of a whole frame in bytes; engines size their buffers
    /// with this.
    #[inline]
    pub fn frame_capacity(&self) -> usize {
        self.frame_capacity
    }

    /// Position of the field carrying the `DataLen` matcher, if any.
    pub(crate) fn len_position(&self) -> Option<usize> {
        self.fields
            .iter()
            .position(|f| matches!(f.matcher(), Some(Matcher::DataLen)))
    }

    /// Fresh per-field runtime state for one frame.
    pub(crate) fn initial_runtime(&self) -> Vec<FieldRuntime> {
        self.fields
            .iter()
            .map(|f| FieldRuntime {
                offset: 0,
                bytes_read: 0,
                size: if f.flags().contains(FieldFlags::SUPPRESS) {
                    Some(0)
                } else {
                    f.fixed_size()
                },
            })
            .collect()
    }
}

/// Mutable per-field state during one frame.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FieldRuntime {
    /// Byte offset in the engine's frame buffer.
    pub offset: usize,
    /// Resolved size; `None` until LEN/TYPE negotiation fixes it.
    pub size: Option<usize>,
    /// RX progress inside this field.
    pub bytes_read: usize,
}

/// Read a little-endian unsigned value of up to 8 bytes.
pub(crate) fn read_uint_le(bytes: &[u8]) -> u64 {
    let mut value = 0u64;
    for &b in bytes.iter().take(8).rev() {
        value = (value << 8) | u64::from(b);
    }
    value
}

/// Write a little-endian unsigned value into `bytes`, truncating to its width.
pub(crate) fn write_uint_le(bytes: &mut [u8], value: u64) {
    for (i, b) in bytes.iter_mut().enumerate().take(8) {
        *b = (value >> (8 * i)) as u8;
    }
}

/// Mask covering `width` bytes (`width <= 8`).
pub(crate) fn width_mask(width: usize) -> u64 {
    if width >= 8 {
        u64::MAX
    } else {
        (1u64 << (8 * width)) - 1
    }
}
