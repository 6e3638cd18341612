//! Regions of the heap that objects are allocated in.

use crate::{Address, accounting::SpaceBitmap, object::OBJECT_ALIGNMENT};
use compact_str::CompactString;
use std::collections::BTreeMap;
use tern_core::entity_ref;

pub mod large_object;

pub use large_object::LargeObjectSpace;

entity_ref! {
    pub struct SpaceId;
}

/// When a space's objects may be reclaimed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum GcRetentionPolicy {
    NeverCollect,
    AlwaysCollect,
    /// Only collected by a full collection that includes the zygote.
    FullCollect,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SpaceKind {
    Image,
    Zygote,
    NonMoving,
    BumpPointer,
}

/// A contiguous address range `[begin, limit)`. Objects occupy
/// `[begin, end)`.
#[derive(Debug)]
pub struct ContinuousSpace {
    name: CompactString,
    kind: SpaceKind,
    begin: Address,
    end: Address,
    limit: Address,
    /// Absent for the bump-pointer space, which is walked linearly.
    live_bitmap: Option<SpaceBitmap<OBJECT_ALIGNMENT>>,
    mark_bitmap: Option<SpaceBitmap<OBJECT_ALIGNMENT>>,
    /// Freed chunks by exact size, for spaces that sweep.
    free_chunks: BTreeMap<usize, Vec<Address>>,
    objects_allocated: usize,
    bytes_allocated: usize,
}

impl ContinuousSpace {
    pub fn new(
        name: impl Into<CompactString>,
        kind: SpaceKind,
        begin: Address,
        capacity: usize,
    ) -> Self {
        let has_live_bitmap = kind != SpaceKind::BumpPointer;
        let has_mark_bitmap = kind == SpaceKind::NonMoving;
        Self {
            name: name.into(),
            kind,
            begin,
            end: begin,
            limit: begin.offset(capacity),
            live_bitmap: has_live_bitmap.then(|| SpaceBitmap::new(begin, capacity)),
            mark_bitmap: has_mark_bitmap.then(|| SpaceBitmap::new(begin, capacity)),
            free_chunks: BTreeMap::new(),
            objects_allocated: 0,
            bytes_allocated: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SpaceKind {
        self.kind
    }

    pub fn retention_policy(&self) -> GcRetentionPolicy {
        match self.kind {
            SpaceKind::Image => GcRetentionPolicy::NeverCollect,
            SpaceKind::Zygote => GcRetentionPolicy::FullCollect,
            SpaceKind::NonMoving | SpaceKind::BumpPointer => GcRetentionPolicy::AlwaysCollect,
        }
    }

    pub fn can_move_objects(&self) -> bool {
        self.kind == SpaceKind::BumpPointer
    }

    pub fn begin(&self) -> Address {
        self.begin
    }

    pub fn end(&self) -> Address {
        self.end
    }

    pub fn limit(&self) -> Address {
        self.limit
    }

    pub fn capacity(&self) -> usize {
        self.limit.distance_from(self.begin)
    }

    pub fn has_address(&self, addr: Address) -> bool {
        addr >= self.begin && addr < self.limit
    }

    pub fn live_bitmap(&self) -> Option<&SpaceBitmap<OBJECT_ALIGNMENT>> {
        self.live_bitmap.as_ref()
    }

    pub fn mark_bitmap(&self) -> Option<&SpaceBitmap<OBJECT_ALIGNMENT>> {
        self.mark_bitmap.as_ref()
    }

    pub(crate) fn mark_bitmap_mut(&mut self) -> Option<&mut SpaceBitmap<OBJECT_ALIGNMENT>> {
        self.mark_bitmap.as_mut()
    }

    pub fn objects_allocated(&self) -> usize {
        self.objects_allocated
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    /// Reserves `size` bytes, reusing a freed chunk of exactly
    /// that size when one exists.
    pub(crate) fn alloc(&mut self, size: usize) -> Option<Address> {
        debug_assert_eq!(size % OBJECT_ALIGNMENT, 0);
        let reused = self.free_chunks.get_mut(&size).and_then(Vec::pop);
        let addr = match reused {
            Some(addr) => addr,
            None => {
                if self.limit.distance_from(self.end) < size {
                    return None;
                }
                let addr = self.end;
                self.end = self.end.offset(size);
                addr
            }
        };
        if let Some(live) = &mut self.live_bitmap {
            live.set(addr);
        }
        self.objects_allocated += 1;
        self.bytes_allocated += size;
        Some(addr)
    }

    /// Returns an object's memory to the space. The caller clears it.
    pub(crate) fn free(&mut self, addr: Address, size: usize) {
        if let Some(live) = &mut self.live_bitmap {
            live.clear(addr);
        }
        self.free_chunks.entry(size).or_default().push(addr);
        self.record_free(1, size);
    }

    pub(crate) fn record_free(&mut self, objects: usize, bytes: usize) {
        self.objects_allocated -= objects;
        self.bytes_allocated -= bytes;
    }

    pub(crate) fn set_end(&mut self, end: Address) {
        debug_assert!(end >= self.begin && end <= self.limit);
        self.end = end;
    }

    pub(crate) fn clear_mark_bitmap(&mut self) {
        if let Some(mark) = &mut self.mark_bitmap {
            mark.clear_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_allocation_respects_limit() {
        let mut space = ContinuousSpace::new("bump", SpaceKind::BumpPointer, Address(0x1000), 64);
        assert_eq!(space.alloc(32), Some(Address(0x1000)));
        assert_eq!(space.alloc(32), Some(Address(0x1020)));
        assert_eq!(space.alloc(8), None);
        assert_eq!(space.objects_allocated(), 2);
        assert!(space.live_bitmap().is_none());
        assert!(space.can_move_objects());
    }

    #[test]
    fn freed_chunks_are_reused_by_size() {
        let mut space =
            ContinuousSpace::new("non moving", SpaceKind::NonMoving, Address(0x2000), 4096);
        let a = space.alloc(24).unwrap();
        let b = space.alloc(16).unwrap();
        space.free(a, 24);
        assert!(!space.live_bitmap().unwrap().test(a));
        assert_eq!(space.alloc(16), Some(b.offset(16)));
        assert_eq!(space.alloc(24), Some(a));
        assert_eq!(space.objects_allocated(), 3);
        assert_eq!(space.bytes_allocated(), 56);
    }
}
