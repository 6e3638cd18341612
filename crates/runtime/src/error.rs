use compact_str::CompactString;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("out of memory in space '{space}' ({requested} bytes requested)")]
    OutOfMemory {
        space: CompactString,
        requested: usize,
    },
    #[error("invalid heap configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid class '{name}': {reason}")]
    InvalidClass { name: CompactString, reason: String },
    #[error("space '{space}' cannot move objects")]
    NotMovable { space: CompactString },
    #[error("large object at {address} is not page aligned")]
    LargeObjectMisaligned { address: crate::Address },
}
