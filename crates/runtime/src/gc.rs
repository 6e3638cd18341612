use crate::roots::RootSource;
use std::{ops::AddAssign, time::Duration};

/// A garbage collection algorithm for the heap.
///
/// Implementations run one complete cycle per call to
/// `run_phases`, with every mutator stopped for its duration.
pub trait GarbageCollector {
    fn name(&self) -> &str;

    /// Runs a full cycle: marking, reclaiming, and finishing.
    fn run_phases(&mut self, roots: &mut dyn RootSource) -> CollectionStats;
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct FreedCounts {
    pub objects: usize,
    pub bytes: usize,
}

impl AddAssign<(usize, usize)> for FreedCounts {
    fn add_assign(&mut self, (objects, bytes): (usize, usize)) {
        self.objects += objects;
        self.bytes += bytes;
    }
}

/// Results of one collection.
#[derive(Debug, Clone, Default)]
pub struct CollectionStats {
    /// Freed by sweeping the non-moving spaces.
    pub swept: FreedCounts,
    /// Freed by compacting the target space.
    pub compacted: FreedCounts,
    pub large_objects: FreedCounts,
    /// Objects left in the compacted space.
    pub live_objects_in_space: usize,
    pub duration: Duration,
}

impl CollectionStats {
    pub fn freed_objects(&self) -> usize {
        self.swept.objects + self.compacted.objects + self.large_objects.objects
    }

    pub fn freed_bytes(&self) -> usize {
        self.swept.bytes + self.compacted.bytes + self.large_objects.bytes
    }
}
