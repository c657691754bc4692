//! Incremental receive engine.
//!
//! [`RxEngine`] walks a [`FieldLayout`] in declaration order and fills each
//! field from a byte stream fed through [`fill`]. Chunks may be arbitrarily
//! sized (down to single bytes); the engine keeps per-field progress between
//! calls. When a field completes, its matcher validates or updates container
//! state; a mismatch resets the frame and resumes the search for a valid
//! prefix. When the last field matches, every live subscriber receives a
//! [`FrameSnapshot`].
//!
//! Resynchronisation rules:
//! - a fresh divergence on the prefix field consumes exactly one byte and
//!   retries;
//! - a divergence after partial prefix progress consumes nothing and
//!   re-examines the same bytes as a fresh start;
//! - a mismatch on any later field consumes nothing: the failing field's
//!   bytes are re-scanned from the prefix, while bytes of earlier fields
//!   stay discarded.
//!
//! [`fill`]: RxEngine::fill

use std::fmt::Write as _;
use std::sync::{Arc, Weak};

use bytes::Bytes;

use crate::crc::CrcAlgorithm;
use crate::field::{FieldFlags, FieldName, MatchOutcome, Matcher, PayloadKind, WireKind};
use crate::layout::{read_uint_le, width_mask, FieldLayout, FieldRuntime};
use crate::snapshot::{FieldValue, FrameSnapshot, PayloadValue};

/// Subscriber callback invoked with each completed frame.
pub type SubscriberFn = dyn Fn(&FrameSnapshot) + Send + Sync;

/// Owning handle returned by [`RxEngine::subscribe`]. Dropping it
/// unsubscribes; the engine itself holds only a weak reference.
pub type Subscription = Arc<SubscriberFn>;

/// Sink for debug diagnostics (mismatch reports, broken-frame dumps).
pub type DebugHookFn = dyn Fn(&str) + Send;

#[derive(Debug, Clone, Copy)]
struct ActivePayload {
    code: u32,
    kind_index: usize,
}

/// Incremental parser for one protocol direction.
pub struct RxEngine {
    layout: Arc<FieldLayout>,
    crc: Box<dyn CrcAlgorithm>,
    buf: Vec<u8>,
    runtime: Vec<FieldRuntime>,
    cursor: usize,
    write_cursor: usize,
    active_payload: Option<ActivePayload>,
    subscribers: Vec<Weak<SubscriberFn>>,
    debug: bool,
    debug_hook: Option<Box<DebugHookFn>>,
}

impl RxEngine {
    /// Create an engine over a validated layout with the given CRC algorithm.
    pub fn new(layout: Arc<FieldLayout>, crc: Box<dyn CrcAlgorithm>) -> Self {
        let buf = vec![0u8; layout.frame_capacity()];
        let runtime = layout.initial_runtime();
        Self {
            layout,
            crc,
            buf,
            runtime,
            cursor: 0,
            write_cursor: 0,
            active_payload: None,
            subscribers: Vec::new(),
            debug: false,
            debug_hook: None,
        }
    }

    /// The layout this engine parses.
    #[inline]
    pub fn layout(&self) -> &FieldLayout {
        &self.layout
    }

    /// Enable or disable mismatch diagnostics.
    pub fn set_debug(&mut self, on: bool) {
        self.debug = on;
    }

    /// Install a sink for diagnostic text. Installing a hook implies debug
    /// output regardless of [`set_debug`](Self::set_debug).
    pub fn set_debug_hook(&mut self, hook: impl Fn(&str) + Send + 'static) {
        self.debug_hook = Some(Box::new(hook));
    }

    /// Register a completed-frame callback.
    ///
    /// The engine stores only a weak reference: keep the returned handle
    /// alive for as long as deliveries are wanted. Subscribers are invoked in
    /// reverse registration order; expired entries are pruned during
    /// delivery.
    #[must_use = "dropping the subscription immediately unsubscribes"]
    pub fn subscribe(&mut self, callback: impl Fn(&FrameSnapshot) + Send + Sync + 'static) -> Subscription {
        let callback: Subscription = Arc::new(callback);
        self.subscribers.push(Arc::downgrade(&callback));
        callback
    }

    /// Number of currently stored subscriber slots (live or not yet pruned).
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Discard any partial frame and return to the prefix search.
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.write_cursor = 0;
        self.active_payload = None;
        self.runtime = self.layout.initial_runtime();
    }

    /// Feed a chunk of input. Never blocks and never fails: corrupted input
    /// is recovered by resynchronisation.
    pub fn fill(&mut self, mut input: &[u8]) {
        while !input.is_empty() {
            let mut consumed = 0usize;
            let outcome = self.step(input, &mut consumed);
            match outcome {
                MatchOutcome::Processing => {
                    input = &input[consumed..];
                }
                MatchOutcome::Match => {
                    let rt = self.runtime[self.cursor];
                    self.write_cursor = rt.offset + rt.size.unwrap_or(0);
                    self.cursor += 1;
                    if self.cursor >= self.layout.len() {
                        self.deliver();
                        self.reset();
                    }
                    input = &input[consumed..];
                }
                MatchOutcome::NoMatch => {
                    let rt = self.runtime[self.cursor];
                    let size = rt.size.unwrap_or(0);
                    if rt.bytes_read != 0 && rt.bytes_read != size {
                        // Partial progress: re-examine these bytes from a
                        // clean state instead of dropping them.
                        consumed = 0;
                    }
                    if self.cursor != 0 {
                        consumed = 0;
                        self.dump_broken_frame();
                    }
                    self.reset();
                    input = &input[consumed..];
                }
            }
        }
    }

    /// Consume bytes for the current field; returns the field's outcome and
    /// reports how many input bytes were used via `consumed`.
    fn step(&mut self, input: &[u8], consumed: &mut usize) -> MatchOutcome {
        let layout = Arc::clone(&self.layout);
        let idx = self.cursor;
        let spec = layout.field(idx);

        self.runtime[idx].offset = self.write_cursor;
        let size = match self.runtime[idx].size {
            Some(size) => size,
            None => {
                // A dynamic field reached before LEN resolved its size; the
                // layout validation makes this unreachable for well-formed
                // layouts, but corrupted state is handled as a reject.
                self.debug_emit(|out| {
                    let _ = write!(out, "Field {} reached with unresolved size", spec.name());
                });
                return MatchOutcome::NoMatch;
            }
        };
        if size == 0 {
            return MatchOutcome::Match;
        }

        let bytes_read = self.runtime[idx].bytes_read;
        let take = input.len().min(size - bytes_read);
        let reverse = spec.flags().contains(FieldFlags::REVERSE);

        if let WireKind::Const { pattern } = spec.kind() {
            for (i, &byte) in input.iter().take(take).enumerate() {
                let expected = if reverse {
                    pattern[size - 1 - bytes_read - i]
                } else {
                    pattern[bytes_read + i]
                };
                if byte != expected {
                    *consumed += 1;
                    return MatchOutcome::NoMatch;
                }
            }
        }

        let offset = self.runtime[idx].offset;
        if reverse {
            for (i, &byte) in input.iter().take(take).enumerate() {
                self.buf[offset + size - 1 - bytes_read - i] = byte;
            }
        } else {
            self.buf[offset + bytes_read..offset + bytes_read + take]
                .copy_from_slice(&input[..take]);
        }
        *consumed += take;
        self.runtime[idx].bytes_read += take;

        if self.runtime[idx].bytes_read < size {
            return MatchOutcome::Processing;
        }

        match spec.matcher() {
            None => MatchOutcome::Match,
            Some(matcher) => self.run_matcher(idx, matcher),
        }
    }

    fn run_matcher(&mut self, idx: usize, matcher: Matcher) -> MatchOutcome {
        match matcher {
            Matcher::DataLen => self.match_data_len(idx),
            Matcher::AntiLen => self.match_anti_len(idx),
            Matcher::TypeSelect => self.match_type(idx),
            Matcher::Checksum => self.match_crc(idx),
            Matcher::Custom(check) => {
                let rt = self.runtime[idx];
                let size = rt.size.unwrap_or(0);
                check(&self.buf[rt.offset..rt.offset + size])
            }
        }
    }

    /// Little-endian value of a completed scalar field.
    fn field_uint(&self, idx: usize) -> u64 {
        let rt = self.runtime[idx];
        let size = rt.size.unwrap_or(0);
        read_uint_le(&self.buf[rt.offset..rt.offset + size])
    }

    /// LEN matcher: derive (or validate) the DATA size.
    fn match_data_len(&mut self, idx: usize) -> MatchOutcome {
        let layout = Arc::clone(&self.layout);
        let received = self.field_uint(idx);
        let data_pos = match layout.position(FieldName::Data) {
            Some(pos) => pos,
            None => return MatchOutcome::NoMatch,
        };

        let mut overhead = 0u64;
        for (i, field) in layout.iter().enumerate() {
            if i != data_pos && field.flags().contains(FieldFlags::IS_IN_LEN) {
                overhead += self.runtime[i].size.unwrap_or(0) as u64;
            }
        }

        let reject = |engine: &Self, expected: u64| {
            engine.debug_emit(|out| {
                let _ = write!(
                    out,
                    "Mismatch in length field:\n  Expected: {expected} (0x{expected:X})\n  Received: {received} (0x{received:X})"
                );
            });
            MatchOutcome::NoMatch
        };

        if received < overhead {
            return reject(self, overhead);
        }
        let data_len = (received - overhead) as usize;
        let data_spec = layout.field(data_pos);

        match data_spec.kind() {
            WireKind::Payload(map) => {
                if data_spec.flags().contains(FieldFlags::CONST_SIZE) {
                    if let Some(fixed) = self.runtime[data_pos].size {
                        if fixed != data_len {
                            return reject(self, overhead + fixed as u64);
                        }
                        return MatchOutcome::Match;
                    }
                }
                if data_len > map.max_size() {
                    return reject(self, overhead + map.max_size() as u64);
                }
                self.runtime[data_pos].size = Some(data_len);
                MatchOutcome::Match
            }
            WireKind::Var { max } => {
                if data_len > *max {
                    return reject(self, overhead + *max as u64);
                }
                self.runtime[data_pos].size = Some(data_len);
                MatchOutcome::Match
            }
            _ => {
                // Fixed DATA: LEN only validates.
                let fixed = self.runtime[data_pos].size.unwrap_or(0);
                if fixed != data_len {
                    return reject(self, overhead + fixed as u64);
                }
                MatchOutcome::Match
            }
        }
    }

    /// ALEN matcher: `ALEN == ~LEN` over the LEN width.
    fn match_anti_len(&mut self, idx: usize) -> MatchOutcome {
        let len_pos = match self.layout.len_position() {
            Some(pos) => pos,
            None => return MatchOutcome::NoMatch,
        };
        let width = self.runtime[idx].size.unwrap_or(0);
        let mask = width_mask(width);
        let len = self.field_uint(len_pos);
        let alen = self.field_uint(idx);
        let expected = !len & mask;
        if alen == expected {
            MatchOutcome::Match
        } else {
            self.debug_emit(|out| {
                let _ = write!(
                    out,
                    "Mismatch in ALEN field:\n  Expected: {expected} (0x{expected:X})\n  Received: {alen} (0x{alen:X})"
                );
            });
            MatchOutcome::NoMatch
        }
    }

    /// TYPE matcher: select the active payload variant and fix its size.
    fn match_type(&mut self, idx: usize) -> MatchOutcome {
        let layout = Arc::clone(&self.layout);
        let code = self.field_uint(idx) as u32;
        let data_pos = match layout.position(FieldName::Data) {
            Some(pos) => pos,
            None => return MatchOutcome::NoMatch,
        };
        let map = match layout.field(data_pos).kind() {
            WireKind::Payload(map) => map,
            _ => return MatchOutcome::NoMatch,
        };

        let (kind_index, kind) = match map.kind_of(code) {
            Some(entry) => entry,
            None => {
                self.debug_emit(|out| {
                    let _ = write!(out, "Incorrect type received:\n  Received type id: {code}");
                });
                return MatchOutcome::NoMatch;
            }
        };

        let previous = self.runtime[data_pos].size;
        let size_reject = |engine: &Self, expected: usize, got: usize| {
            engine.debug_emit(|out| {
                let _ = write!(
                    out,
                    "Mismatch in data field size:\n  Received type id: {code}\n  Expected size:    {expected}\n  Calculated size:  {got}"
                );
            });
            MatchOutcome::NoMatch
        };

        match kind {
            PayloadKind::Fixed { size, .. } => {
                if let Some(prev) = previous {
                    if prev != size {
                        return size_reject(self, size, prev);
                    }
                }
                self.runtime[data_pos].size = Some(size);
            }
            PayloadKind::Empty => {
                if let Some(prev) = previous {
                    if prev != 0 {
                        return size_reject(self, 0, prev);
                    }
                }
                self.runtime[data_pos].size = Some(0);
            }
            PayloadKind::Var { max } => match previous {
                Some(len) if len <= max => {}
                Some(len) => return size_reject(self, max, len),
                None => {
                    self.debug_emit(|out| {
                        let _ = write!(
                            out,
                            "Mismatch in data field size:\n  Received type id: {code}\n  variable payload has no negotiated length"
                        );
                    });
                    return MatchOutcome::NoMatch;
                }
            },
        }

        self.active_payload = Some(ActivePayload { code, kind_index });
        MatchOutcome::Match
    }

    /// CRC matcher: recompute over the `IS_IN_CRC` window and compare.
    fn match_crc(&mut self, idx: usize) -> MatchOutcome {
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

        let width = self.runtime[idx].size.unwrap_or(0);
        let mask = width_mask(width);
        let expected = u64::from(state) & mask;
        let received = self.field_uint(idx);
        if received == expected {
            MatchOutcome::Match
        } else {
            self.debug_emit(|out| {
                let _ = write!(
                    out,
                    "Mismatch in CRC field:\n  Expected: {expected} (0x{expected:X})\n  Received: {received} (0x{received:X})"
                );
            });
            MatchOutcome::NoMatch
        }
    }

    /// Build the snapshot of the completed frame and invoke subscribers,
    /// newest first, pruning expired entries.
    fn deliver(&mut self) {
        let snapshot = self.build_snapshot();
        let mut i = self.subscribers.len();
        while i > 0 {
            i -= 1;
            match self.subscribers[i].upgrade() {
                Some(callback) => callback(&snapshot),
                None => {
                    self.subscribers.remove(i);
                }
            }
        }
    }

    fn build_snapshot(&self) -> FrameSnapshot {
        let mut entries = Vec::with_capacity(self.layout.len());
        for (i, field) in self.layout.iter().enumerate() {
            let rt = self.runtime[i];
            let size = rt.size.unwrap_or(0);
            let raw = &self.buf[rt.offset..rt.offset + size];
            let value = match field.kind() {
                WireKind::Uint { .. } => FieldValue::Uint(self.field_uint(i)),
                WireKind::Payload(_) => match self.active_payload {
                    Some(active) => FieldValue::Payload(PayloadValue::new(
                        active.code,
                        active.kind_index,
                        Bytes::copy_from_slice(raw),
                    )),
                    None => FieldValue::Bytes(Bytes::copy_from_slice(raw)),
                },
                WireKind::Array { .. } | WireKind::Const { .. } | WireKind::Var { .. } => {
                    FieldValue::Bytes(Bytes::copy_from_slice(raw))
                }
            };
            entries.push((field.name(), value));
        }
        FrameSnapshot::new(entries)
    }

    /// Dump every field received so far, up to and including the one that
    /// failed.
    fn dump_broken_frame(&self) {
        if !self.debug_enabled() {
            return;
        }
        let mut out = String::new();
        out.push_str("-------------BROKEN PACKET START-------------\n");
        for (i, field) in self.layout.iter().enumerate().take(self.cursor + 1) {
            let rt = self.runtime[i];
            let size = rt.size.unwrap_or(0);
            let upto = if i < self.cursor { size } else { rt.bytes_read };
            let _ = write!(out, "Field {} received:", field.name());
            for &byte in &self.buf[rt.offset..rt.offset + upto.min(size)] {
                let _ = write!(out, " 0x{byte:02X}");
            }
            out.push('\n');
        }
        out.push_str("-------------BROKEN PACKET STOP-------------");
        self.emit(&out);
    }

    #[inline]
    fn debug_enabled(&self) -> bool {
        self.debug || self.debug_hook.is_some()
    }

    /// Build a diagnostic lazily and emit it when diagnostics are on.
    fn debug_emit(&self, build: impl FnOnce(&mut String)) {
        if !self.debug_enabled() {
            return;
        }
        let mut message = String::new();
        build(&mut message);
        self.emit(&message);
    }

    fn emit(&self, message: &str) {
        tracing::debug!(target: "framewire::rx", "{message}");
        if let Some(hook) = &self.debug_hook {
            hook(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crc::Crc32Soft;
    use crate::field::FieldSpec;
    use std::sync::Mutex;

    fn simple_layout() -> Arc<FieldLayout> {
        Arc::new(
            FieldLayout::new(vec![
                FieldSpec::constant(FieldName::Id, &[0xAA, 0xBB, 0xCC]),
                FieldSpec::uint(FieldName::Len, 1)
                    .with_flags(FieldFlags::IS_IN_LEN | FieldFlags::IS_IN_CRC),
                FieldSpec::uint(FieldName::Alen, 1)
                    .with_flags(FieldFlags::IS_IN_LEN | FieldFlags::IS_IN_CRC),
                FieldSpec::array(FieldName::Data, 4)
                    .with_flags(FieldFlags::IS_IN_LEN | FieldFlags::IS_IN_CRC),
                FieldSpec::uint(FieldName::Crc, 2).with_flags(FieldFlags::IS_IN_LEN),
            ])
            .unwrap(),
        )
    }

    /// Hand-assemble a valid frame for `simple_layout`.
    fn valid_frame(data: [u8; 4]) -> Vec<u8> {
        let len: u8 = 1 + 1 + 4 + 2;
        let alen = !len;
        let mut crc_input = vec![len, alen];
        crc_input.extend_from_slice(&data);
        let mut crc = Crc32Soft::new();
        let checksum = (crc.calc(&crc_input) & 0xFFFF) as u16;

        let mut frame = vec![0xAA, 0xBB, 0xCC, len, alen];
        frame.extend_from_slice(&data);
        frame.extend_from_slice(&checksum.to_le_bytes());
        frame
    }

    fn collecting_engine(layout: Arc<FieldLayout>) -> (RxEngine, Arc<Mutex<Vec<FrameSnapshot>>>, Subscription) {
        let mut rx = RxEngine::new(layout, Box::new(Crc32Soft::new()));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sub = rx.subscribe(move |snapshot| sink.lock().unwrap().push(snapshot.clone()));
        (rx, seen, sub)
    }

    #[test]
    fn test_whole_frame_in_one_fill() {
        let (mut rx, seen, _sub) = collecting_engine(simple_layout());
        rx.fill(&valid_frame([1, 2, 3, 4]));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].get(FieldName::Len).unwrap().as_uint(), Some(8));
        assert_eq!(
            seen[0].get(FieldName::Data).unwrap().as_bytes(),
            Some(&[1, 2, 3, 4][..])
        );
    }

    #[test]
    fn test_byte_at_a_time_equals_one_shot() {
        let frame = valid_frame([9, 8, 7, 6]);

        let (mut rx_whole, seen_whole, _s1) = collecting_engine(simple_layout());
        rx_whole.fill(&frame);

        let (mut rx_bytes, seen_bytes, _s2) = collecting_engine(simple_layout());
        for byte in &frame {
            rx_bytes.fill(std::slice::from_ref(byte));
        }

        assert_eq!(*seen_whole.lock().unwrap(), *seen_bytes.lock().unwrap());
        assert_eq!(seen_bytes.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_garbage_prefix_resync() {
        let (mut rx, seen, _sub) = collecting_engine(simple_layout());
        let mut stream = vec![0x04, 0x02, 0x06, 0x07, 0x22, 0x43, 0x2C, 0xFF, 0xFF, 0xFF, 0xAA, 0xBB];
        stream.extend_from_slice(&valid_frame([5, 5, 5, 5]));
        rx.fill(&stream);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_wrong_len_header_then_valid_frame() {
        let (mut rx, seen, _sub) = collecting_engine(simple_layout());
        rx.fill(&[0xAA, 0xBB, 0xCC, 200, 200]);
        assert!(seen.lock().unwrap().is_empty());
        rx.fill(&valid_frame([1, 1, 2, 2]));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_corrupted_crc_rejected_then_recovers() {
        let (mut rx, seen, _sub) = collecting_engine(simple_layout());
        let logs = Arc::new(Mutex::new(String::new()));
        let log_sink = Arc::clone(&logs);
        rx.set_debug_hook(move |line| log_sink.lock().unwrap().push_str(line));

        let mut broken = valid_frame([1, 2, 3, 4]);
        let last = broken.len() - 1;
        broken[last] ^= 0x5A;
        rx.fill(&broken);
        assert!(seen.lock().unwrap().is_empty());
        assert!(logs.lock().unwrap().contains("Mismatch in CRC field"));
        assert!(logs.lock().unwrap().contains("BROKEN PACKET START"));

        rx.fill(&valid_frame([1, 2, 3, 4]));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_corrupted_len_rejected() {
        let (mut rx, seen, _sub) = collecting_engine(simple_layout());
        let logs = Arc::new(Mutex::new(String::new()));
        let log_sink = Arc::clone(&logs);
        rx.set_debug_hook(move |line| log_sink.lock().unwrap().push_str(line));

        let mut broken = valid_frame([1, 2, 3, 4]);
        broken[3] ^= 0x01;
        rx.fill(&broken);
        assert!(seen.lock().unwrap().is_empty());
        assert!(logs.lock().unwrap().contains("Mismatch in length field"));
    }

    #[test]
    fn test_corrupted_alen_rejected() {
        let (mut rx, seen, _sub) = collecting_engine(simple_layout());
        let logs = Arc::new(Mutex::new(String::new()));
        let log_sink = Arc::clone(&logs);
        rx.set_debug_hook(move |line| log_sink.lock().unwrap().push_str(line));

        let mut broken = valid_frame([1, 2, 3, 4]);
        broken[4] ^= 0x01;
        rx.fill(&broken);
        assert!(seen.lock().unwrap().is_empty());
        assert!(logs.lock().unwrap().contains("Mismatch in ALEN field"));
    }

    #[test]
    fn test_partial_prefix_then_real_frame() {
        // The stream ends with a prefix fragment that turns out to belong to
        // noise; the real frame follows immediately.
        let (mut rx, seen, _sub) = collecting_engine(simple_layout());
        rx.fill(&[0xAA, 0xBB]);
        rx.fill(&valid_frame([3, 3, 3, 3]));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_dropped_subscription_stops_delivery() {
        let layout = simple_layout();
        let mut rx = RxEngine::new(layout, Box::new(Crc32Soft::new()));

        let kept_calls = Arc::new(Mutex::new(0usize));
        let kept_sink = Arc::clone(&kept_calls);
        let _kept = rx.subscribe(move |_| *kept_sink.lock().unwrap() += 1);

        let dropped_calls = Arc::new(Mutex::new(0usize));
        let dropped_sink = Arc::clone(&dropped_calls);
        let dropped = rx.subscribe(move |_| *dropped_sink.lock().unwrap() += 1);
        drop(dropped);

        rx.fill(&valid_frame([0, 0, 0, 0]));
        assert_eq!(*kept_calls.lock().unwrap(), 1);
        assert_eq!(*dropped_calls.lock().unwrap(), 0);
        // The expired slot was pruned during delivery.
        assert_eq!(rx.subscriber_count(), 1);
    }

    #[test]
    fn test_delivery_order_is_lifo() {
        let layout = simple_layout();
        let mut rx = RxEngine::new(layout, Box::new(Crc32Soft::new()));
        let order = Arc::new(Mutex::new(Vec::new()));

        let first_sink = Arc::clone(&order);
        let _first = rx.subscribe(move |_| first_sink.lock().unwrap().push("first"));
        let second_sink = Arc::clone(&order);
        let _second = rx.subscribe(move |_| second_sink.lock().unwrap().push("second"));

        rx.fill(&valid_frame([1, 1, 1, 1]));
        assert_eq!(*order.lock().unwrap(), ["second", "first"]);
    }

    #[test]
    fn test_custom_matcher_rejects() {
        fn even_only(bytes: &[u8]) -> MatchOutcome {
            if bytes[0] % 2 == 0 {
                MatchOutcome::Match
            } else {
                MatchOutcome::NoMatch
            }
        }

        let layout = Arc::new(
            FieldLayout::new(vec![
                FieldSpec::constant(FieldName::Id, &[0x7E]),
                FieldSpec::uint(FieldName::Status, 1).with_matcher(Matcher::Custom(even_only)),
            ])
            .unwrap(),
        );
        let mut rx = RxEngine::new(layout, Box::new(Crc32Soft::new()));
        let seen = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&seen);
        let _sub = rx.subscribe(move |_| *sink.lock().unwrap() += 1);

        rx.fill(&[0x7E, 0x03]); // odd status rejected
        assert_eq!(*seen.lock().unwrap(), 0);
        rx.fill(&[0x7E, 0x04]);
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn test_reset_clears_progress() {
        let (mut rx, seen, _sub) = collecting_engine(simple_layout());
        let frame = valid_frame([1, 2, 3, 4]);
        rx.fill(&frame[..6]);
        rx.reset();
        // The tail alone must not complete a frame.
        rx.fill(&frame[6..]);
        assert!(seen.lock().unwrap().is_empty());
        // A full frame afterwards parses normally.
        rx.fill(&frame);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
