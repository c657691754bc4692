//! Logical field identifiers.
//!
//! A [`FieldName`] is a semantic tag, not a position: the same name means the
//! same role in every layout (LEN always carries a byte count, CRC always
//! carries a checksum, and so on). Matchers are dispatched by name, so a
//! layout that wants the standard LEN/ALEN/TYPE/CRC behaviour only has to use
//! the standard names.

use std::fmt;

/// Identifiers for the standard protocol fields.
///
/// A layout may use any subset; names must be unique within one layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldName {
    /// Frame identifier, typically a constant prefix.
    Id,
    /// Secondary identifier.
    Id2,
    /// Message type selector for variant payloads.
    Type,
    /// Request type.
    ReqType,
    /// Response type.
    AnsType,
    /// Payload length.
    Len,
    /// Anti-length (`~LEN`).
    Alen,
    /// Source address.
    Source,
    /// Destination address.
    Dest,
    /// Protocol or format version.
    Version,
    /// Sequence number / counter.
    Number,
    /// Payload data.
    Data,
    /// CRC checksum.
    Crc,
    /// Session identifier.
    Session,
    /// Debug / raw dump field.
    Dump,
    /// Message header.
    Header,
    /// Binary blob.
    Bin,
    /// Timestamp.
    Time,
    /// Vertical dimension.
    Height,
    /// Horizontal dimension.
    Width,
    /// Status / state code.
    Status,
}

impl FieldName {
    /// Human-readable name, used in diagnostics and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldName::Id => "ID",
            FieldName::Id2 => "ID2",
            FieldName::Type => "TYPE",
            FieldName::ReqType => "REQ_TYPE",
            FieldName::AnsType => "ANS_TYPE",
            FieldName::Len => "LEN",
            FieldName::Alen => "ALEN",
            FieldName::Source => "SOURCE",
            FieldName::Dest => "DEST",
            FieldName::Version => "VERSION",
            FieldName::Number => "NUMBER",
            FieldName::Data => "DATA",
            FieldName::Crc => "CRC",
            FieldName::Session => "SESSION",
            FieldName::Dump => "DUMP",
            FieldName::Header => "HEADER",
            FieldName::Bin => "BIN",
            FieldName::Time => "TIME",
            FieldName::Height => "HEIGHT",
            FieldName::Width => "WIDTH",
            FieldName::Status => "STATUS",
        }
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
