//! Soft, weak, finalizer and phantom reference handling.
//!
//! While marking, the collector hands every reference object
//! with a not-yet-marked referent to `delay_reference_referent`.
//! Once the strongly reachable graph is marked,
//! `process_references` decides which referents survive.

use crate::{Address, class::ReferenceKind};
use std::mem;

/// What the reference processor needs from the running collector.
pub trait ReferenceHooks {
    fn is_marked(&self, obj: Address) -> bool;
    fn mark_object(&mut self, obj: Address);
    /// Drains the collector's mark stack. References discovered
    /// while scanning are delayed on `processor`.
    fn process_mark_stack(&mut self, processor: &mut ReferenceProcessor);
    fn referent(&self, reference: Address) -> Address;
    fn set_referent(&mut self, reference: Address, referent: Address);
    fn set_zombie(&mut self, reference: Address, zombie: Address);
}

#[derive(Debug, Default)]
pub struct ReferenceProcessor {
    soft: Vec<Address>,
    weak: Vec<Address>,
    finalizer: Vec<Address>,
    phantom: Vec<Address>,
    /// References whose referent was cleared, waiting to be enqueued.
    cleared: Vec<Address>,
}

impl ReferenceProcessor {
    fn pending(&mut self, kind: ReferenceKind) -> &mut Vec<Address> {
        match kind {
            ReferenceKind::Soft => &mut self.soft,
            ReferenceKind::Weak => &mut self.weak,
            ReferenceKind::Finalizer => &mut self.finalizer,
            ReferenceKind::Phantom => &mut self.phantom,
        }
    }

    /// Queues `reference` for processing. The caller has seen
    /// that its referent is non-null and unmarked.
    pub fn delay_reference_referent(&mut self, kind: ReferenceKind, reference: Address) {
        self.pending(kind).push(reference);
    }

    pub fn has_pending(&self) -> bool {
        !(self.soft.is_empty()
            && self.weak.is_empty()
            && self.finalizer.is_empty()
            && self.phantom.is_empty())
    }

    pub fn process_references(&mut self, hooks: &mut impl ReferenceHooks, clear_soft: bool) {
        let _span = tracing::debug_span!("process references", clear_soft).entered();

        if !clear_soft {
            // Marking a soft referent may discover further soft references.
            while !self.soft.is_empty() {
                for reference in mem::take(&mut self.soft) {
                    let referent = hooks.referent(reference);
                    if !referent.is_null() && !hooks.is_marked(referent) {
                        hooks.mark_object(referent);
                    }
                }
                hooks.process_mark_stack(self);
            }
        }

        self.clear_white_references(hooks, ReferenceKind::Soft);
        self.clear_white_references(hooks, ReferenceKind::Weak);
        self.enqueue_finalizer_references(hooks);
        // Soft and weak references reachable only from finalizable objects.
        self.clear_white_references(hooks, ReferenceKind::Soft);
        self.clear_white_references(hooks, ReferenceKind::Weak);
        self.clear_white_references(hooks, ReferenceKind::Phantom);

        debug_assert!(!self.has_pending());
        tracing::debug!(cleared = self.cleared.len(), "processed references");
    }

    fn clear_white_references(&mut self, hooks: &mut impl ReferenceHooks, kind: ReferenceKind) {
        for reference in mem::take(self.pending(kind)) {
            let referent = hooks.referent(reference);
            if !referent.is_null() && !hooks.is_marked(referent) {
                hooks.set_referent(reference, Address::NULL);
                self.cleared.push(reference);
            }
        }
    }

    /// Keeps the referents of finalizer references alive in the
    /// `zombie` field so their finalizers can run.
    fn enqueue_finalizer_references(&mut self, hooks: &mut impl ReferenceHooks) {
        for reference in mem::take(&mut self.finalizer) {
            let referent = hooks.referent(reference);
            if !referent.is_null() && !hooks.is_marked(referent) {
                hooks.set_zombie(reference, referent);
                hooks.mark_object(referent);
                hooks.set_referent(reference, Address::NULL);
                self.cleared.push(reference);
            }
        }
        hooks.process_mark_stack(self);
    }

    /// Rewrites the cleared list after objects have moved.
    pub fn update_roots(&mut self, mut forward: impl FnMut(Address) -> Address) {
        for reference in &mut self.cleared {
            *reference = forward(*reference);
        }
    }

    pub fn cleared_references(&self) -> &[Address] {
        &self.cleared
    }

    pub fn take_cleared_references(&mut self) -> Vec<Address> {
        mem::take(&mut self.cleared)
    }
}
