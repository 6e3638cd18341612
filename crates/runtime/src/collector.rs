//! Collector implementations.

mod immune_region;
mod mark_compact;

pub use immune_region::ImmuneRegion;
pub use mark_compact::MarkCompact;
