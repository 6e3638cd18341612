//! Sliding mark-compact collection of the bump-pointer space.
//!
//! A cycle marks everything reachable, sweeps the non-moving and
//! large-object spaces, then slides the live objects of the target
//! space towards its start. Forwarding addresses are stored in the
//! lock word, so any monitor or hash state an object carries is
//! saved in a FIFO while the object is forwarded and written back
//! once it has moved. Both passes walk the space in ascending
//! address order, so the queue needs no keys.

use crate::{
    Address, Error, Heap,
    accounting::{MarkStack, SpaceBitmap},
    collector::ImmuneRegion,
    flags,
    gc::{CollectionStats, GarbageCollector},
    heap::HeapLocks,
    lock_word::LockWord,
    object::{FnVisitor, OBJECT_ALIGNMENT, REFERENT_OFFSET, ReferenceVisitor, ZOMBIE_OFFSET},
    reference_processor::{ReferenceHooks, ReferenceProcessor},
    roots::RootSource,
    space::{GcRetentionPolicy, SpaceId},
};
use smallvec::SmallVec;
use std::{collections::VecDeque, mem, time::Instant};

pub struct MarkCompact<'h> {
    heap: &'h mut Heap,
    /// The space being compacted.
    space: Option<SpaceId>,
    immune_region: ImmuneRegion,
    mark_stack: MarkStack,
    reference_processor: ReferenceProcessor,
    /// Marked objects of the target space, by their pre-compaction address.
    objects_before_forwarding: SpaceBitmap<OBJECT_ALIGNMENT>,
    /// Objects whose lock word was saved in `lock_words_to_restore`.
    objects_with_lockword: SpaceBitmap<OBJECT_ALIGNMENT>,
    lock_words_to_restore: VecDeque<LockWord>,
    bump_pointer: Address,
    live_objects_in_space: usize,
    clear_soft_references: bool,
    stats: CollectionStats,
}

impl<'h> MarkCompact<'h> {
    pub fn new(heap: &'h mut Heap) -> Self {
        Self {
            heap,
            space: None,
            immune_region: ImmuneRegion::default(),
            mark_stack: MarkStack::new(0),
            reference_processor: ReferenceProcessor::default(),
            objects_before_forwarding: SpaceBitmap::empty(),
            objects_with_lockword: SpaceBitmap::empty(),
            lock_words_to_restore: VecDeque::new(),
            bump_pointer: Address::NULL,
            live_objects_in_space: 0,
            clear_soft_references: false,
            stats: CollectionStats::default(),
        }
    }

    /// Selects the space to compact.
    pub fn set_space(&mut self, space: SpaceId) -> Result<(), Error> {
        let target = self.heap.space(space);
        if !target.can_move_objects() {
            return Err(Error::NotMovable {
                space: target.name().into(),
            });
        }
        self.space = Some(space);
        Ok(())
    }

    pub fn set_clear_soft_references(&mut self, clear: bool) {
        self.clear_soft_references = clear;
    }

    pub fn immune_region(&self) -> &ImmuneRegion {
        &self.immune_region
    }

    fn target(&self) -> SpaceId {
        match self.space {
            Some(space) => space,
            None => panic!("mark-compact cycle started without a target space"),
        }
    }

    /// Makes the never-collected and full-collect spaces immune.
    pub fn bind_bitmaps(&mut self) {
        let locks = self.heap.locks();
        let _bitmaps = locks.heap_bitmap.write();
        for (id, space) in self.heap.spaces.iter() {
            if matches!(
                space.retention_policy(),
                GcRetentionPolicy::NeverCollect | GcRetentionPolicy::FullCollect
            ) {
                assert!(
                    self.immune_region.add_continuous_space(id, space),
                    "failed to add space '{}' to the immune region",
                    space.name()
                );
            }
        }
    }

    fn initialize_phase(&mut self) {
        let target = self.heap.space(self.target());
        self.bump_pointer = target.begin();
        self.live_objects_in_space = 0;
        self.immune_region.reset();
        self.lock_words_to_restore.clear();
        self.stats = CollectionStats::default();

        self.mark_stack = self.heap.take_mark_stack();
        self.mark_stack.reset();
        self.reference_processor = mem::take(&mut self.heap.reference_processor);
    }

    fn marking_phase(&mut self, roots: &mut dyn RootSource, locks: &HeapLocks) {
        let _span = tracing::debug_span!("marking phase").entered();

        {
            let _bitmaps = locks.heap_bitmap.write();
            let target = self.heap.space(self.target());
            self.objects_before_forwarding = SpaceBitmap::new(target.begin(), target.capacity());
            self.objects_with_lockword = SpaceBitmap::new(target.begin(), target.capacity());
        }
        self.bind_bitmaps();

        self.heap.process_cards();
        self.heap.card_table.clear_card_table();

        {
            let _bitmaps = locks.heap_bitmap.write();
            self.mark_roots(roots);
            self.update_and_mark_mod_union();
            self.process_mark_stack();
        }

        {
            let _bitmaps = locks.heap_bitmap.write();
            self.process_references();
        }

        {
            let _bitmaps = locks.heap_bitmap.read();
            roots.sweep_system_weaks(&mut |obj| self.is_marked(obj).then_some(obj));
        }

        tracing::debug!(
            mark_stack_capacity = self.mark_stack.capacity(),
            cleared_references = self.reference_processor.cleared_references().len(),
            "marked reachable objects"
        );
    }

    fn mark_roots(&mut self, roots: &mut dyn RootSource) {
        roots.visit_roots(&mut |root| self.mark_object(*root));
        // Cleared by an earlier cycle and not yet taken by the runtime.
        for reference in self.reference_processor.cleared_references().to_vec() {
            self.mark_object(reference);
        }
    }

    /// Marks through the references held by immune spaces.
    fn update_and_mark_mod_union(&mut self) {
        let immune: SmallVec<[SpaceId; 2]> = self
            .heap
            .spaces
            .keys()
            .filter(|&id| self.immune_region.contains_space(id))
            .collect();
        for id in immune {
            let slots = if self.heap.mod_union_table(id).is_some() {
                self.heap.mod_union_reference_slots(id)
            } else {
                self.heap
                    .objects_in(id)
                    .into_iter()
                    .flat_map(|obj| self.heap.reference_slots(obj))
                    .collect()
            };
            let mut visitor = MarkObjectVisitor { collector: self };
            for slot in slots {
                slot.accept(&mut visitor);
            }
        }
    }

    fn mark_object(&mut self, obj: Address) {
        if obj.is_null() || self.immune_region.contains_object(obj) {
            return;
        }

        let already_marked = if self.objects_before_forwarding.has_address(obj) {
            self.objects_before_forwarding.set(obj)
        } else if self.heap.large_objects.has_address(obj) {
            match self.heap.large_objects.test_and_set_mark(obj) {
                Ok(marked) => marked,
                Err(e) => panic!("marking a corrupt reference: {e}"),
            }
        } else {
            let bitmap = match self.heap.space_of(obj) {
                Some(id) => self.heap.spaces[id].mark_bitmap_mut(),
                None => None,
            };
            match bitmap {
                Some(bitmap) => bitmap.set(obj),
                None => panic!("object {obj} is not in a collected space"),
            }
        };

        if !already_marked {
            self.mark_stack.push(obj);
        }
    }

    fn is_marked(&self, obj: Address) -> bool {
        if self.immune_region.contains_object(obj) {
            true
        } else if self.objects_before_forwarding.has_address(obj) {
            self.objects_before_forwarding.test(obj)
        } else if self.heap.large_objects.has_address(obj) {
            self.heap.large_objects.is_marked(obj)
        } else {
            self.heap
                .space_of(obj)
                .and_then(|id| self.heap.space(id).mark_bitmap())
                .is_some_and(|bitmap| bitmap.test(obj))
        }
    }

    fn process_mark_stack(&mut self) {
        while let Some(obj) = self.mark_stack.pop() {
            self.scan_object(obj);
        }
    }

    fn scan_object(&mut self, obj: Address) {
        let slots = self.heap.reference_slots(obj);
        let mut visitor = MarkObjectVisitor { collector: self };
        for slot in slots {
            slot.accept(&mut visitor);
        }
    }

    /// Defers a reference object with an unmarked referent to the
    /// reference processor.
    fn delay_reference_referent(&mut self, reference: Address, slot: Address) {
        let referent = self.heap.read_reference(slot);
        if referent.is_null() || self.is_marked(referent) {
            return;
        }
        let Some(kind) = self.heap.reference_kind(reference) else {
            panic!("weak slot in {reference}, which is not a reference object");
        };
        self.reference_processor
            .delay_reference_referent(kind, reference);
    }

    fn process_references(&mut self) {
        let mut processor = mem::take(&mut self.reference_processor);
        let clear_soft = self.clear_soft_references;
        processor.process_references(self, clear_soft);
        self.reference_processor = processor;
    }

    fn reclaim_phase(&mut self, roots: &mut dyn RootSource, locks: &HeapLocks) {
        let _span = tracing::debug_span!("reclaim phase").entered();
        {
            let _bitmaps = locks.heap_bitmap.write();
            self.sweep();
        }
        {
            let _bitmaps = locks.heap_bitmap.read();
            self.compact(roots);
        }
    }

    /// Frees unmarked objects outside the target and immune spaces.
    fn sweep(&mut self) {
        let _span = tracing::debug_span!("sweep").entered();
        let target = self.target();
        let spaces: SmallVec<[SpaceId; 4]> = self
            .heap
            .spaces
            .keys()
            .filter(|&id| id != target && !self.immune_region.contains_space(id))
            .collect();
        for id in spaces {
            let (objects, bytes) = self.heap.sweep_space(id);
            tracing::debug!(
                space = self.heap.space(id).name(),
                freed_objects = objects,
                freed_bytes = bytes,
                "swept space"
            );
            self.stats.swept += (objects, bytes);
        }

        let (objects, bytes) = self.heap.large_objects.sweep();
        tracing::debug!(
            freed_objects = objects,
            freed_bytes = bytes,
            "swept large objects"
        );
        self.stats.large_objects += (objects, bytes);
    }

    fn compact(&mut self, roots: &mut dyn RootSource) {
        let _span = tracing::debug_span!("compact").entered();
        self.calculate_object_forwarding_addresses();
        self.update_references(roots);
        self.move_objects();

        let target = self.target();
        let space = &mut self.heap.spaces[target];
        let old_end = space.end();
        let freed_objects = space.objects_allocated() - self.live_objects_in_space;
        let freed_bytes = old_end.distance_from(self.bump_pointer);
        space.record_free(freed_objects, freed_bytes);
        space.set_end(self.bump_pointer);
        self.heap.zero_range(self.bump_pointer, old_end);

        tracing::info!(
            space = self.heap.space(target).name(),
            live_objects = self.live_objects_in_space,
            freed_objects,
            freed_bytes,
            "compacted space"
        );
        self.stats.compacted += (freed_objects, freed_bytes);
        self.stats.live_objects_in_space = self.live_objects_in_space;
    }

    fn objects_before_forwarding(&self) -> Vec<Address> {
        let target = self.heap.space(self.target());
        self.objects_before_forwarding
            .iter_marked(target.begin(), target.end())
            .collect()
    }

    /// Assigns each marked object of the target space its address
    /// after compaction, in ascending address order.
    fn calculate_object_forwarding_addresses(&mut self) {
        for obj in self.objects_before_forwarding() {
            self.forward_object(obj);
        }
    }

    fn forward_object(&mut self, obj: Address) {
        let size = self.heap.size_of(obj).next_multiple_of(OBJECT_ALIGNMENT);
        let lock_word = self.heap.lock_word(obj);
        if lock_word != LockWord::Unlocked {
            self.objects_with_lockword.set(obj);
            self.lock_words_to_restore.push_back(lock_word);
            if flags::log_objects() {
                tracing::trace!(%obj, ?lock_word, "saved lock word");
            }
        }
        if flags::log_objects() {
            tracing::trace!(%obj, to = %self.bump_pointer, size, "forwarding object");
        }
        self.heap.set_lock_word(
            obj,
            LockWord::Forwarded {
                address: self.bump_pointer,
            },
        );
        self.bump_pointer = self.bump_pointer.offset(size);
        self.live_objects_in_space += 1;
    }

    fn forward_address(&self, obj: Address) -> Address {
        match self.heap.lock_word(obj).forwarding_address() {
            Some(address) if !address.is_null() => address,
            _ => panic!("live object {obj} has no forwarding address"),
        }
    }

    /// The post-compaction address of `obj`.
    fn forwarded(&self, obj: Address) -> Address {
        if !obj.is_null() && self.objects_before_forwarding.has_address(obj) {
            self.forward_address(obj)
        } else {
            obj
        }
    }

    fn update_heap_reference(&mut self, slot: Address) {
        let obj = self.heap.read_reference(slot);
        let new = self.forwarded(obj);
        if new != obj {
            self.heap.write_reference(slot, new);
        }
    }

    fn update_object_references(&mut self, obj: Address) {
        let slots = self.heap.reference_slots(obj);
        let mut visitor = FnVisitor(|slot| self.update_heap_reference(slot));
        for slot in slots {
            slot.accept(&mut visitor);
        }
    }

    /// Points every reference into the target space at the
    /// referent's forwarding address.
    fn update_references(&mut self, roots: &mut dyn RootSource) {
        let _span = tracing::debug_span!("update references").entered();
        let target = self.target();

        // Reference processing may have stored into immune objects.
        self.heap.process_cards();

        roots.visit_roots(&mut |root| {
            if !self.heap.is_class(*root) {
                *root = self.forwarded(*root);
            }
        });

        let spaces: SmallVec<[SpaceId; 4]> =
            self.heap.spaces.keys().filter(|&id| id != target).collect();
        for id in spaces {
            if self.immune_region.contains_space(id) && self.heap.mod_union_table(id).is_some() {
                for slot in self.heap.mod_union_reference_slots(id) {
                    self.update_heap_reference(slot.address());
                }
            } else if self.heap.space(id).live_bitmap().is_some() {
                for obj in self.heap.objects_in(id) {
                    self.update_object_references(obj);
                }
            }
        }

        roots.sweep_system_weaks(&mut |obj| Some(self.forwarded(obj)));

        for obj in self.objects_before_forwarding() {
            if !self.heap.is_class(obj) {
                self.update_object_references(obj);
            }
        }

        let large_objects: Vec<Address> = self.heap.large_objects.live_objects().collect();
        for obj in large_objects {
            self.update_object_references(obj);
        }

        let mut processor = mem::take(&mut self.reference_processor);
        processor.update_roots(|obj| self.forwarded(obj));
        self.reference_processor = processor;

        roots.visit_class_roots(&mut |root| *root = self.forwarded(*root));
    }

    fn move_objects(&mut self) {
        let _span = tracing::debug_span!("move objects").entered();
        for obj in self.objects_before_forwarding() {
            self.move_object(obj);
        }
        assert!(
            self.lock_words_to_restore.is_empty(),
            "{} saved lock words were never restored",
            self.lock_words_to_restore.len()
        );
    }

    fn move_object(&mut self, obj: Address) {
        let dest = self.forward_address(obj);
        let size = self.heap.size_of(obj);
        if flags::log_objects() {
            tracing::trace!(from = %obj, to = %dest, size, "moving object");
        }
        self.heap.move_memory(obj, dest, size);

        let lock_word = if self.objects_with_lockword.test(obj) {
            match self.lock_words_to_restore.pop_front() {
                Some(lock_word) => lock_word,
                None => panic!("no saved lock word left for {obj}"),
            }
        } else {
            LockWord::Unlocked
        };
        self.heap.set_lock_word(dest, lock_word);
    }

    fn finish_phase(&mut self, locks: &HeapLocks) {
        let _span = tracing::debug_span!("finish phase").entered();

        let mark_stack = mem::replace(&mut self.mark_stack, MarkStack::new(0));
        assert!(mark_stack.is_empty(), "mark stack returned with work left");
        self.heap.return_mark_stack(mark_stack);
        self.heap.reference_processor = mem::take(&mut self.reference_processor);

        let _bitmaps = locks.heap_bitmap.write();
        self.objects_before_forwarding = SpaceBitmap::empty();
        self.objects_with_lockword = SpaceBitmap::empty();
        self.heap.clear_marked_objects();
    }

    fn verify_heap(&self, roots: &mut dyn RootSource, when: &str) {
        let problems = self.heap.verify(roots);
        if !problems.is_empty() {
            panic!("heap corrupted {when} collection:\n{}", problems.join("\n"));
        }
    }
}

impl GarbageCollector for MarkCompact<'_> {
    fn name(&self) -> &str {
        "mark compact"
    }

    fn run_phases(&mut self, roots: &mut dyn RootSource) -> CollectionStats {
        let start = Instant::now();
        let target = self.target();
        let _span = tracing::debug_span!(
            "GC cycle",
            collector = self.name(),
            space = self.heap.space(target).name()
        )
        .entered();

        let locks = self.heap.locks();
        {
            let _mutator = locks.mutator.write();
            self.initialize_phase();
            if flags::verify_heap() {
                self.verify_heap(roots, "before");
            }
            self.marking_phase(roots, &locks);
            self.reclaim_phase(roots, &locks);
            if flags::verify_heap() {
                self.verify_heap(roots, "after");
            }
        }
        self.finish_phase(&locks);

        self.stats.duration = start.elapsed();
        tracing::debug!(
            freed_objects = self.stats.freed_objects(),
            freed_bytes = self.stats.freed_bytes(),
            duration = ?self.stats.duration,
            "collected"
        );
        self.stats.clone()
    }
}

impl ReferenceHooks for MarkCompact<'_> {
    fn is_marked(&self, obj: Address) -> bool {
        MarkCompact::is_marked(self, obj)
    }

    fn mark_object(&mut self, obj: Address) {
        MarkCompact::mark_object(self, obj);
    }

    fn process_mark_stack(&mut self, processor: &mut ReferenceProcessor) {
        // References found while draining go to `processor`.
        mem::swap(&mut self.reference_processor, processor);
        MarkCompact::process_mark_stack(self);
        mem::swap(&mut self.reference_processor, processor);
    }

    fn referent(&self, reference: Address) -> Address {
        self.heap.get_reference(reference, REFERENT_OFFSET)
    }

    fn set_referent(&mut self, reference: Address, referent: Address) {
        self.heap
            .write_reference(reference.offset(REFERENT_OFFSET), referent);
    }

    fn set_zombie(&mut self, reference: Address, zombie: Address) {
        self.heap.set_reference(reference, ZOMBIE_OFFSET, zombie);
    }
}

/// Marks strong referents and defers weak ones.
struct MarkObjectVisitor<'a, 'h> {
    collector: &'a mut MarkCompact<'h>,
}

impl ReferenceVisitor for MarkObjectVisitor<'_, '_> {
    fn visit_reference(&mut self, slot: Address) {
        let obj = self.collector.heap.read_reference(slot);
        self.collector.mark_object(obj);
    }

    fn visit_weak_reference(&mut self, owner: Address, slot: Address) {
        self.collector.delay_reference_referent(owner, slot);
    }
}
