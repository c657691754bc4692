//! # framewire
//!
//! Declarative binary framed protocols: one field layout drives both an
//! incremental streaming parser (RX) and a frame assembler (TX), with a
//! pluggable CRC and no heap allocation in the steady state for fixed-size
//! payloads.
//!
//! A protocol is an ordered sequence of typed fields:
//!
//! ```text
//! ┌────────────┬─────┬──────┬───────┬─────────────┬─────┐
//! │ ID (const) │ LEN │ ALEN │ TYPE? │ DATA        │ CRC │
//! └────────────┴─────┴──────┴───────┴─────────────┴─────┘
//! ```
//!
//! The library enforces `IS_IN_LEN` accounting, `ALEN == ~LEN`, TYPE-driven
//! payload selection and CRC over the `IS_IN_CRC` window; everything else is
//! up to the layout.
//!
//! ## Example
//!
//! ```
//! use std::sync::{Arc, Mutex};
//! use framewire::{Crc32Soft, FieldFlags, FieldLayout, FieldName, FieldSpec, RxEngine, TxAssembler};
//! use framewire::tx::PacketField;
//!
//! let layout = Arc::new(FieldLayout::new(vec![
//!     FieldSpec::constant(FieldName::Id, &[0xAA, 0x55]),
//!     FieldSpec::uint(FieldName::Len, 1)
//!         .with_flags(FieldFlags::IS_IN_LEN | FieldFlags::IS_IN_CRC),
//!     FieldSpec::var(FieldName::Data, 64)
//!         .with_flags(FieldFlags::IS_IN_LEN | FieldFlags::IS_IN_CRC),
//!     FieldSpec::uint(FieldName::Crc, 2),
//! ]).unwrap());
//!
//! let mut tx = TxAssembler::new(Arc::clone(&layout), Box::new(Crc32Soft::new()));
//! let frame = tx.encode_packet(&[PacketField::bytes(FieldName::Data, b"ping")]).unwrap();
//!
//! let mut rx = RxEngine::new(layout, Box::new(Crc32Soft::new()));
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = Arc::clone(&seen);
//! let _sub = rx.subscribe(move |snapshot| sink.lock().unwrap().push(snapshot.clone()));
//!
//! // Byte-at-a-time delivery parses identically to one chunk.
//! for byte in &frame {
//!     rx.fill(std::slice::from_ref(byte));
//! }
//! let seen = seen.lock().unwrap();
//! assert_eq!(seen.len(), 1);
//! assert_eq!(seen[0].get(FieldName::Data).unwrap().as_bytes(), Some(&b"ping"[..]));
//! ```

pub mod crc;
pub mod endpoint;
pub mod error;
pub mod field;
pub mod layout;
pub mod rx;
pub mod snapshot;
pub mod transport;
pub mod tx;

pub use crc::{Crc16Modbus, Crc32Soft, CrcAlgorithm};
pub use endpoint::{Endpoint, EndpointBuilder};
pub use error::{FrameError, Result};
pub use field::{
    FieldFlags, FieldName, FieldSpec, MatchOutcome, Matcher, PayloadKind, PayloadMap, WireKind,
};
pub use layout::FieldLayout;
pub use rx::RxEngine;
pub use snapshot::{FieldValue, FrameSnapshot, PayloadValue};
pub use transport::{EchoTransport, SerialTransport, Transport};
pub use tx::{PacketField, TxAssembler};
