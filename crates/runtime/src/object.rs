//! Object layout and reference traversal.
//!
//! Every object starts with a lock word and a class pointer.
//! What follows depends on the class kind: arrays store their
//! length, class objects their class-table index, and reference
//! objects the referent and queue link.

use crate::Address;

pub use tern_core::constants::runtime::OBJECT_ALIGNMENT;

pub const LOCK_WORD_OFFSET: usize = 0;
pub const CLASS_OFFSET: usize = 8;
pub const HEADER_SIZE: usize = 16;

pub const CLASS_INDEX_OFFSET: usize = 16;
pub const CLASS_OBJECT_SIZE: usize = 24;

pub const ARRAY_LENGTH_OFFSET: usize = 16;
pub const ARRAY_DATA_OFFSET: usize = 24;

pub const REFERENT_OFFSET: usize = 16;
pub const QUEUE_NEXT_OFFSET: usize = 24;
pub const ZOMBIE_OFFSET: usize = 32;
pub const REFERENCE_OBJECT_SIZE: usize = 32;
pub const FINALIZER_REFERENCE_SIZE: usize = 40;

pub fn array_size(length: usize, component_size: usize) -> usize {
    crate::ptr::round_up(ARRAY_DATA_OFFSET + length * component_size, OBJECT_ALIGNMENT)
}

/// Receives the reference slots of an object.
///
/// `slot` is the address of the field holding the reference.
/// The referent of a `java.lang.ref.Reference`-like object is
/// reported through `visit_weak_reference`.
pub trait ReferenceVisitor {
    fn visit_reference(&mut self, slot: Address);

    fn visit_weak_reference(&mut self, owner: Address, slot: Address) {
        let _ = owner;
        self.visit_reference(slot);
    }
}

/// Treats every slot, weak or not, with one closure.
pub struct FnVisitor<F>(pub F);

impl<F: FnMut(Address)> ReferenceVisitor for FnVisitor<F> {
    fn visit_reference(&mut self, slot: Address) {
        (self.0)(slot)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReferenceSlot {
    Strong(Address),
    Weak { owner: Address, slot: Address },
}

impl ReferenceSlot {
    pub fn address(self) -> Address {
        match self {
            ReferenceSlot::Strong(slot) | ReferenceSlot::Weak { slot, .. } => slot,
        }
    }

    pub fn accept(self, visitor: &mut impl ReferenceVisitor) {
        match self {
            ReferenceSlot::Strong(slot) => visitor.visit_reference(slot),
            ReferenceSlot::Weak { owner, slot } => visitor.visit_weak_reference(owner, slot),
        }
    }
}
