//! Pluggable checksum algorithms.
//!
//! A [`CrcAlgorithm`] is a small value-semantics object with `reset` and
//! incremental `append`; it performs no I/O. The engines feed it the bytes of
//! every field flagged `IS_IN_CRC`, in declaration order, and truncate the
//! resulting state to the CRC field's wire width.

mod crc16;
mod crc32;

pub use crc16::Crc16Modbus;
pub use crc32::Crc32Soft;

/// Stateful checksum with incremental append.
pub trait CrcAlgorithm: Send {
    /// Reinitialise internal state.
    fn reset(&mut self);

    /// Fold `data` into the running checksum and return the new state.
    ///
    /// Algorithms that keep their state entirely in the returned value ignore
    /// `reset`; algorithms with internal registers may ignore `state`.
    fn append(&mut self, state: u32, data: &[u8]) -> u32;

    /// One-shot checksum: `reset` followed by `append(0, data)`.
    fn calc(&mut self, data: &[u8]) -> u32 {
        self.reset();
        self.append(0, data)
    }
}
