//! Frame assembly and emission.
//!
//! [`TxAssembler`] takes an unordered bag of `(field name, value)` pairs,
//! resolves variable sizes and the payload type code, computes LEN/ALEN/CRC
//! and hands each field's wire bytes to the transport in declaration order.
//! Emission is a sequence of small writes; buffering is the transport's
//! concern.

use std::any::TypeId;
use std::sync::Arc;
use std::time::Duration;

use crate::crc::CrcAlgorithm;
use crate::error::{FrameError, Result};
use crate::field::{FieldFlags, FieldName, Matcher, PayloadKind, WireKind};
use crate::layout::{read_uint_le, width_mask, write_uint_le, FieldLayout, FieldRuntime};
use crate::transport::Transport;

/// Default per-field write timeout.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
enum PacketValue<'a> {
    Uint(u64),
    Bytes(&'a [u8]),
    Pod { bytes: &'a [u8], type_id: TypeId },
}

/// One user-supplied field value for [`TxAssembler::send_packet`].
///
/// Values borrow the caller's data; nothing is copied until the frame is
/// assembled.
#[derive(Debug, Clone, Copy)]
pub struct PacketField<'a> {
    name: FieldName,
    value: PacketValue<'a>,
}

impl<'a> PacketField<'a> {
    /// Scalar value for a `Uint` field.
    pub fn uint(name: FieldName, value: u64) -> Self {
        Self {
            name,
            value: PacketValue::Uint(value),
        }
    }

    /// Raw bytes for an array or variable field.
    pub fn bytes(name: FieldName, bytes: &'a [u8]) -> Self {
        Self {
            name,
            value: PacketValue::Bytes(bytes),
        }
    }

    /// Plain-data value; carries the type identity so a payload field can
    /// infer its TYPE code.
    pub fn pod<T: bytemuck::NoUninit + 'static>(name: FieldName, value: &'a T) -> Self {
        Self {
            name,
            value: PacketValue::Pod {
                bytes: bytemuck::bytes_of(value),
                type_id: TypeId::of::<T>(),
            },
        }
    }

    /// Field this value targets.
    #[inline]
    pub fn name(&self) -> FieldName {
        self.name
    }
}

impl<'a> PacketValue<'a> {
    fn bytes(&self) -> Option<&'a [u8]> {
        match *self {
            PacketValue::Bytes(b) => Some(b),
            PacketValue::Pod { bytes, .. } => Some(bytes),
            PacketValue::Uint(_) => None,
        }
    }
}

/// Builds frames for one protocol direction and emits them to a transport.
pub struct TxAssembler {
    layout: Arc<FieldLayout>,
    crc: Box<dyn CrcAlgorithm>,
    buf: Vec<u8>,
    runtime: Vec<FieldRuntime>,
    transport: Option<Arc<dyn Transport>>,
    write_timeout: Duration,
}

impl TxAssembler {
    /// Create an assembler over a validated layout with the given CRC
    /// algorithm.
    pub fn new(layout: Arc<FieldLayout>, crc: Box<dyn CrcAlgorithm>) -> Self {
        let buf = vec![0u8; layout.frame_capacity()];
        let runtime = layout.initial_runtime();
        Self {
            layout,
            crc,
            buf,
            runtime,
            transport: None,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    /// The layout this assembler emits.
    #[inline]
    pub fn layout(&self) -> &FieldLayout {
        &self.layout
    }

    /// Install the output transport (non-owning; shared).
    pub fn set_transport(&mut self, transport: Arc<dyn Transport>) {
        self.transport = Some(transport);
    }

    /// Adjust the per-field write timeout.
    pub fn set_write_timeout(&mut self, timeout: Duration) {
        self.write_timeout = timeout;
    }

    /// Assemble a frame from `fields` and write it to the transport.
    ///
    /// Returns the total number of bytes handed to the transport. On any
    /// failure the assembler is reset and ready for the next frame.
    pub fn send_packet(&mut self, fields: &[PacketField<'_>]) -> Result<usize> {
        let transport = self.transport.clone().ok_or(FrameError::NoTransport)?;
        self.construct(fields)?;
        let timeout = self.write_timeout;
        match self.for_each_span(|span| transport.write(span, timeout)) {
            Ok(total) => Ok(total),
            Err(err) => {
                self.reset();
                Err(err)
            }
        }
    }

    /// Assemble a frame and return its wire bytes without a transport.
    pub fn encode_packet(&mut self, fields: &[PacketField<'_>]) -> Result<Vec<u8>> {
        self.construct(fields)?;
        let mut out = Vec::new();
        self.for_each_span(|span| {
            out.extend_from_slice(span);
            Ok(())
        })?;
        Ok(out)
    }

    /// Reset per-field runtime state and the CRC accumulator.
    pub fn reset(&mut self) {
        self.runtime = self.layout.initial_runtime();
        self.crc.reset();
    }

    /// Walk the assembled frame in declaration order, applying `emit` to each
    /// non-empty field span in wire byte order.
    fn for_each_span(&self, mut emit: impl FnMut(&[u8]) -> Result<()>) -> Result<usize> {
        let mut total = 0usize;
        let mut scratch = Vec::new();
        for (i, field) in self.layout.iter().enumerate() {
            if field.flags().contains(FieldFlags::SUPPRESS) {
                continue;
            }
            let rt = self.runtime[i];
            let size = rt.size.unwrap_or(0);
            if size == 0 {
                continue;
            }
            let span = &self.buf[rt.offset..rt.offset + size];
            if field.flags().contains(FieldFlags::REVERSE) {
                scratch.clear();
                scratch.extend(span.iter().rev());
                emit(&scratch)?;
            } else {
                emit(span)?;
            }
            total += size;
        }
        Ok(total)
    }

    /// Resolve sizes and the payload variant, then fill the frame buffer.
    fn construct(&mut self, fields: &[PacketField<'_>]) -> Result<()> {
        self.reset();
        let layout = Arc::clone(&self.layout);

        let mut provided: Vec<Option<PacketValue<'_>>> = vec![None; layout.len()];
        for field in fields {
            let pos = layout
                .position(field.name)
                .ok_or(FrameError::NoSuchField(field.name))?;
            provided[pos] = Some(field.value);
        }

        let inferred_type = self.resolve_payload(&provided)?;

        // Size remaining variable fields and validate provided fixed ones.
        for (i, spec) in layout.iter().enumerate() {
            let name = spec.name();
            match spec.kind() {
                WireKind::Var { max } => {
                    let bytes = provided[i]
                        .as_ref()
                        .and_then(PacketValue::bytes)
                        .ok_or(FrameError::MissingField(name))?;
                    if bytes.len() > *max {
                        return Err(FrameError::PayloadTooLarge {
                            got: bytes.len(),
                            max: *max,
                        });
                    }
                    self.runtime[i].size = Some(bytes.len());
                }
                WireKind::Array { len } => {
                    if let Some(value) = &provided[i] {
                        let bytes = value.bytes().ok_or_else(|| {
                            FrameError::InvalidValue(name, "array field expects bytes".into())
                        })?;
                        if bytes.len() != *len {
                            return Err(FrameError::SizeMismatch(format!(
                                "field {name}: got {} bytes, field holds {len}",
                                bytes.len()
                            )));
                        }
                    }
                }
                WireKind::Uint { .. } => {
                    if let Some(value) = &provided[i] {
                        if !matches!(value, PacketValue::Uint(_)) {
                            return Err(FrameError::InvalidValue(
                                name,
                                "scalar field expects an unsigned value".into(),
                            ));
                        }
                    }
                }
                WireKind::Const { .. } => {
                    if provided[i].is_some() {
                        return Err(FrameError::InvalidValue(
                            name,
                            "constant fields cannot be assigned".into(),
                        ));
                    }
                }
                WireKind::Payload(_) => {}
            }
        }

        // Required-field rule: no matcher, no constant, not suppressed, not a
        // resolved-empty payload.
        for (i, spec) in layout.iter().enumerate() {
            if provided[i].is_some()
                || spec.matcher().is_some()
                || matches!(spec.kind(), WireKind::Const { .. })
                || spec.flags().contains(FieldFlags::SUPPRESS)
            {
                continue;
            }
            if matches!(spec.kind(), WireKind::Payload(_)) && self.runtime[i].size == Some(0) {
                continue;
            }
            return Err(FrameError::MissingField(spec.name()));
        }

        // First pass: offsets, user values, constants.
        let mut cursor = 0usize;
        for (i, spec) in layout.iter().enumerate() {
            let size = self.runtime[i].size.unwrap_or(0);
            self.runtime[i].offset = cursor;
            cursor += size;

            match (&provided[i], spec.kind()) {
                (Some(PacketValue::Uint(value)), WireKind::Uint { width }) => {
                    let masked = *value & width_mask(*width);
                    write_uint_le(&mut self.buf[cursor - size..cursor], masked);
                }
                (Some(value), _) => {
                    if let Some(bytes) = value.bytes() {
                        self.buf[cursor - size..cursor].copy_from_slice(&bytes[..size]);
                    }
                }
                (None, WireKind::Const { pattern }) => {
                    self.buf[cursor - size..cursor].copy_from_slice(pattern);
                }
                (None, _) => {}
            }
        }

        // Second pass: matchers write their computed values once every size
        // and every user byte is in place.
        for (i, spec) in layout.iter().enumerate() {
            let Some(matcher) = spec.matcher() else {
                continue;
            };
            match matcher {
                Matcher::DataLen => self.write_len(i),
                Matcher::AntiLen => self.write_alen(i),
                Matcher::Checksum => self.write_crc(i),
                Matcher::TypeSelect => {
                    if provided[i].is_none() {
                        if let Some(code) = inferred_type {
                            let rt = self.runtime[i];
                            let size = rt.size.unwrap_or(0);
                            write_uint_le(
                                &mut self.buf[rt.offset..rt.offset + size],
                                u64::from(code) & width_mask(size),
                            );
                        }
                    }
                }
                Matcher::Custom(_) => {}
            }
        }

        Ok(())
    }

    /// Resolve the payload variant (and the TYPE code to write when the
    /// caller did not provide one).
    fn resolve_payload(&mut self, provided: &[Option<PacketValue<'_>>]) -> Result<Option<u32>> {
        let layout = Arc::clone(&self.layout);
        let Some(data_pos) = layout.position(FieldName::Data) else {
            return Ok(None);
        };
        let WireKind::Payload(map) = layout.field(data_pos).kind() else {
            return Ok(None);
        };

        let type_pos = layout.position(FieldName::Type);
        let provided_type = type_pos.and_then(|pos| match provided[pos] {
            Some(PacketValue::Uint(value)) => Some(value as u32),
            _ => None,
        });

        let code = match (provided_type, &provided[data_pos]) {
            (Some(code), _) => code,
            (None, Some(PacketValue::Pod { type_id, .. })) => map
                .code_for_type(*type_id)
                .ok_or(FrameError::UnknownPayloadType(0))?,
            (None, Some(PacketValue::Bytes(_))) => map
                .sole_var_code()
                .ok_or(FrameError::UnknownPayloadType(0))?,
            (None, Some(PacketValue::Uint(_))) => {
                return Err(FrameError::InvalidValue(
                    FieldName::Data,
                    "payload field expects bytes".into(),
                ));
            }
            (None, None) => return Err(FrameError::MissingField(FieldName::Type)),
        };

        let (_, kind) = map
            .kind_of(code)
            .ok_or(FrameError::UnknownPayloadType(code))?;
        let data_bytes = provided[data_pos].as_ref().and_then(PacketValue::bytes);

        match kind {
            PayloadKind::Fixed { size, .. } => {
                let bytes = data_bytes.ok_or(FrameError::MissingField(FieldName::Data))?;
                if bytes.len() != size {
                    return Err(FrameError::SizeMismatch(format!(
                        "payload type {code} holds {size} bytes, got {}",
                        bytes.len()
                    )));
                }
                self.runtime[data_pos].size = Some(size);
            }
            PayloadKind::Var { max } => {
                let bytes = data_bytes.ok_or(FrameError::MissingField(FieldName::Data))?;
                if bytes.len() > max {
                    return Err(FrameError::PayloadTooLarge {
                        got: bytes.len(),
                        max,
                    });
                }
                self.runtime[data_pos].size = Some(bytes.len());
            }
            PayloadKind::Empty => {
                if data_bytes.is_some_and(|b| !b.is_empty()) {
                    return Err(FrameError::SizeMismatch(format!(
                        "payload type {code} carries no bytes"
                    )));
                }
                self.runtime[data_pos].size = Some(0);
            }
        }

        Ok(if provided_type.is_none() {
            Some(code)
        } else {
            None
        })
    }

    /// Sum of every `IS_IN_LEN` field size, written into the LEN field.
    fn write_len(&mut self, idx: usize) {
        let layout = Arc::clone(&self.layout);
        let mut len = 0u64;
        for (i, field) in layout.iter().enumerate() {
            if field.flags().contains(FieldFlags::IS_IN_LEN) {
                len += self.runtime[i].size.unwrap_or(0) as u64;
            }
        }
        let rt = self.runtime[idx];
        let width = rt.size.unwrap_or(0);
        write_uint_le(
            &mut self.buf[rt.offset..rt.offset + width],
            len & width_mask(width),
        );
    }

    /// `~LEN`, truncated to the field width.
    fn write_alen(&mut self, idx: usize) {
        let Some(len_pos) = self.layout.len_position() else {
            return;
        };
        let len_rt = self.runtime[len_pos];
        let len = read_uint_le(&self.buf[len_rt.offset..len_rt.offset + len_rt.size.unwrap_or(0)]);
        let rt = self.runtime[idx];
        let width = rt.size.unwrap_or(0);
        write_uint_le(
            &mut self.buf[rt.offset..rt.offset + width],
            !len & width_mask(width),
        );
    }

    /// CRC over every `IS_IN_CRC` field, truncated to the field width.
    fn write_crc(&mut self, idx: usize) {
        let layout = Arc::clone(&self.layout);
        self.crc.reset();
        let mut state = 0u32;
        for (i, field) in layout.iter().enumerate() {
            if field.flags().contains(FieldFlags::IS_IN_CRC) {
                let rt = self.runtime[i];
                let size = rt.size.unwrap_or(0);
                state = self.crc.append(state, &self.buf[rt.offset..rt.offset + size]);
            }
        }
        let rt = self.runtime[idx];
        let width = rt.size.unwrap_or(0);
        write_uint_le(
            &mut self.buf[rt.offset..rt.offset + width],
            u64::from(state) & width_mask(width),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crc::Crc32Soft;
    use crate::field::{FieldSpec, PayloadMap};
    use crate::transport::{EchoTransport, Transport};

    #[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
    #[repr(C, packed)]
    struct Telemetry {
        u8_: u8,
        u16_: u16,
        u32_: u32,
        f32_: f32,
        f64_: f64,
    }

    fn simple_layout() -> Arc<FieldLayout> {
        Arc::new(
            FieldLayout::new(vec![
                FieldSpec::constant(FieldName::Id, &[0xAA, 0xBB, 0xCC]),
                FieldSpec::uint(FieldName::Len, 1)
                    .with_flags(FieldFlags::IS_IN_LEN | FieldFlags::IS_IN_CRC),
                FieldSpec::uint(FieldName::Alen, 1)
                    .with_flags(FieldFlags::IS_IN_LEN | FieldFlags::IS_IN_CRC),
                FieldSpec::pod_array::<Telemetry>(FieldName::Data)
                    .with_flags(FieldFlags::IS_IN_LEN | FieldFlags::IS_IN_CRC),
                FieldSpec::uint(FieldName::Crc, 2).with_flags(FieldFlags::IS_IN_LEN),
            ])
            .unwrap(),
        )
    }

    fn telemetry() -> Telemetry {
        Telemetry {
            u8_: 1,
            u16_: 2,
            u32_: 3,
            f32_: 4.0,
            f64_: 2.718281828459045,
        }
    }

    #[test]
    fn test_simple_frame_layout_and_len() {
        let mut tx = TxAssembler::new(simple_layout(), Box::new(Crc32Soft::new()));
        let payload = telemetry();
        let frame = tx
            .encode_packet(&[PacketField::pod(FieldName::Data, &payload)])
            .unwrap();

        assert_eq!(frame.len(), 3 + 1 + 1 + 19 + 2);
        assert_eq!(&frame[..3], &[0xAA, 0xBB, 0xCC]);
        // LEN counts every IS_IN_LEN field, its own byte included.
        assert_eq!(frame[3], (1 + 1 + 19 + 2) as u8);
        assert_eq!(frame[4], !frame[3]);

        let mut crc = Crc32Soft::new();
        let expected = (crc.calc(&frame[3..3 + 21]) & 0xFFFF) as u16;
        assert_eq!(u16::from_le_bytes([frame[24], frame[25]]), expected);
    }

    #[test]
    fn test_missing_required_field() {
        let mut tx = TxAssembler::new(simple_layout(), Box::new(Crc32Soft::new()));
        let err = tx.encode_packet(&[]).unwrap_err();
        assert!(matches!(err, FrameError::MissingField(FieldName::Data)));
    }

    #[test]
    fn test_unknown_field_name() {
        let mut tx = TxAssembler::new(simple_layout(), Box::new(Crc32Soft::new()));
        let err = tx
            .encode_packet(&[PacketField::uint(FieldName::Session, 1)])
            .unwrap_err();
        assert!(matches!(err, FrameError::NoSuchField(FieldName::Session)));
    }

    #[test]
    fn test_constant_field_rejects_value() {
        let mut tx = TxAssembler::new(simple_layout(), Box::new(Crc32Soft::new()));
        let payload = telemetry();
        let err = tx
            .encode_packet(&[
                PacketField::pod(FieldName::Data, &payload),
                PacketField::bytes(FieldName::Id, &[0x01, 0x02, 0x03]),
            ])
            .unwrap_err();
        assert!(matches!(err, FrameError::InvalidValue(FieldName::Id, _)));
    }

    #[test]
    fn test_send_without_transport() {
        let mut tx = TxAssembler::new(simple_layout(), Box::new(Crc32Soft::new()));
        let payload = telemetry();
        let err = tx
            .send_packet(&[PacketField::pod(FieldName::Data, &payload)])
            .unwrap_err();
        assert!(matches!(err, FrameError::NoTransport));
    }

    #[test]
    fn test_send_emits_field_spans() {
        let mut tx = TxAssembler::new(simple_layout(), Box::new(Crc32Soft::new()));
        let transport = Arc::new(EchoTransport::new());
        transport.open().unwrap();

        let received = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let sub: crate::transport::ReceiveSubscription = Arc::new(move |bytes: &[u8]| {
            sink.lock().unwrap().extend_from_slice(bytes);
            bytes.len()
        });
        transport.subscribe_on_received(sub.clone());
        tx.set_transport(transport);

        let payload = telemetry();
        let written = tx
            .send_packet(&[PacketField::pod(FieldName::Data, &payload)])
            .unwrap();
        let expected = tx
            .encode_packet(&[PacketField::pod(FieldName::Data, &payload)])
            .unwrap();
        assert_eq!(written, expected.len());
        assert_eq!(*received.lock().unwrap(), expected);
    }

    fn variant_layout() -> Arc<FieldLayout> {
        let map = PayloadMap::builder()
            .fixed::<Telemetry>(1)
            .var(2, 64)
            .empty(4)
            .build()
            .unwrap();
        Arc::new(
            FieldLayout::new(vec![
                FieldSpec::constant(FieldName::Id, &[0xAA, 0xBB, 0xCC]),
                FieldSpec::uint(FieldName::Len, 1)
                    .with_flags(FieldFlags::IS_IN_LEN | FieldFlags::IS_IN_CRC),
                FieldSpec::uint(FieldName::Alen, 1)
                    .with_flags(FieldFlags::IS_IN_LEN | FieldFlags::IS_IN_CRC),
                FieldSpec::uint(FieldName::Type, 1)
                    .with_flags(FieldFlags::IS_IN_LEN | FieldFlags::IS_IN_CRC),
                FieldSpec::payload(FieldName::Data, map).with_flags(FieldFlags::IS_IN_LEN),
                FieldSpec::uint(FieldName::Crc, 2)
                    .with_flags(FieldFlags::IS_IN_LEN | FieldFlags::REVERSE),
            ])
            .unwrap(),
        )
    }

    #[test]
    fn test_type_code_is_inferred_from_pod() {
        let mut tx = TxAssembler::new(variant_layout(), Box::new(Crc32Soft::new()));
        let payload = telemetry();
        let frame = tx
            .encode_packet(&[PacketField::pod(FieldName::Data, &payload)])
            .unwrap();
        // ID(3) LEN(1) ALEN(1) TYPE(1) DATA(19) CRC(2)
        assert_eq!(frame[5], 1);
        assert_eq!(frame.len(), 27);
    }

    #[test]
    fn test_empty_payload_needs_only_type() {
        let mut tx = TxAssembler::new(variant_layout(), Box::new(Crc32Soft::new()));
        let frame = tx
            .encode_packet(&[PacketField::uint(FieldName::Type, 4)])
            .unwrap();
        assert_eq!(frame.len(), 3 + 1 + 1 + 1 + 0 + 2);
        // LEN = LEN + ALEN + TYPE + DATA(0) + CRC = 5
        assert_eq!(frame[3], 5);
    }

    #[test]
    fn test_var_payload_bytes_infer_sole_var_code() {
        let mut tx = TxAssembler::new(variant_layout(), Box::new(Crc32Soft::new()));
        let frame = tx
            .encode_packet(&[PacketField::bytes(FieldName::Data, b"blob")])
            .unwrap();
        assert_eq!(frame[5], 2);
        assert_eq!(&frame[6..10], b"blob");
    }

    #[test]
    fn test_payload_too_large() {
        let mut tx = TxAssembler::new(variant_layout(), Box::new(Crc32Soft::new()));
        let big = vec![0u8; 65];
        let err = tx
            .encode_packet(&[
                PacketField::uint(FieldName::Type, 2),
                PacketField::bytes(FieldName::Data, &big),
            ])
            .unwrap_err();
        assert!(matches!(
            err,
            FrameError::PayloadTooLarge { got: 65, max: 64 }
        ));
    }

    #[test]
    fn test_unknown_type_code() {
        let mut tx = TxAssembler::new(variant_layout(), Box::new(Crc32Soft::new()));
        let err = tx
            .encode_packet(&[PacketField::uint(FieldName::Type, 9)])
            .unwrap_err();
        assert!(matches!(err, FrameError::UnknownPayloadType(9)));
    }

    #[test]
    fn test_reverse_crc_is_emitted_big_endian() {
        let mut tx = TxAssembler::new(variant_layout(), Box::new(Crc32Soft::new()));
        let frame = tx
            .encode_packet(&[PacketField::uint(FieldName::Type, 4)])
            .unwrap();

        let mut crc = Crc32Soft::new();
        // CRC window: LEN, ALEN, TYPE.
        let expected = (crc.calc(&frame[3..6]) & 0xFFFF) as u16;
        let on_wire = u16::from_be_bytes([frame[6], frame[7]]);
        assert_eq!(on_wire, expected);
    }
}
