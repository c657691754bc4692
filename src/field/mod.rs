//! The typed field model: names, flags, wire kinds and payload maps.

mod flags;
mod name;
mod payload;
mod spec;

pub use flags::FieldFlags;
pub use name::FieldName;
pub use payload::{PayloadKind, PayloadMap, PayloadMapBuilder};
pub use spec::{FieldSpec, MatchOutcome, Matcher, WireKind};
