//! A simulated managed heap and its mark-compact collector.

pub mod accounting;
pub mod class;
pub mod collector;
pub mod config;
mod error;
pub mod flags;
pub mod gc;
mod heap;
pub mod lock_word;
pub mod object;
mod ptr;
pub mod reference_processor;
pub mod roots;
pub mod space;
mod verify;

pub use class::{ClassData, ClassId, ClassKind, ReferenceKind};
pub use collector::MarkCompact;
pub use config::HeapConfig;
pub use error::Error;
pub use gc::{CollectionStats, FreedCounts, GarbageCollector};
pub use heap::{Heap, HeapLocks};
pub use lock_word::LockWord;
pub use ptr::Address;
pub use roots::{Monitor, RootSource, RuntimeRoots, ThreadRoots};
pub use space::{GcRetentionPolicy, SpaceId, SpaceKind};
