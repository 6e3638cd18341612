use crate::{Address, Error, config::PAGE_SIZE, ptr::round_up};
use std::collections::{BTreeMap, BTreeSet};

/// Page-aligned objects kept outside the continuous spaces.
///
/// The allocated objects form the live set; the mark set is
/// filled by the collector and cleared after each cycle.
#[derive(Debug)]
pub struct LargeObjectSpace {
    begin: Address,
    limit: Address,
    next: Address,
    objects: BTreeMap<Address, Box<[u64]>>,
    marked: BTreeSet<Address>,
}

impl LargeObjectSpace {
    pub fn new(begin: Address, capacity: usize) -> Self {
        Self {
            begin,
            limit: begin.offset(capacity),
            next: begin,
            objects: BTreeMap::new(),
            marked: BTreeSet::new(),
        }
    }

    pub fn has_address(&self, addr: Address) -> bool {
        addr >= self.begin && addr < self.limit
    }

    pub(crate) fn alloc(&mut self, size: usize) -> Option<Address> {
        let size = round_up(size, PAGE_SIZE);
        if self.limit.distance_from(self.next) < size {
            return None;
        }
        let addr = self.next;
        self.next = self.next.offset(size);
        self.objects
            .insert(addr, vec![0; size / 8].into_boxed_slice());
        Some(addr)
    }

    fn object_containing(&self, addr: Address) -> Option<(Address, &[u64])> {
        let (&start, words) = self.objects.range(..=addr).next_back()?;
        (addr.distance_from(start) < words.len() * 8).then_some((start, &words[..]))
    }

    pub(crate) fn word(&self, addr: Address) -> Option<u64> {
        let (start, words) = self.object_containing(addr)?;
        Some(words[addr.distance_from(start) / 8])
    }

    pub(crate) fn set_word(&mut self, addr: Address, value: u64) -> Option<()> {
        let (&start, words) = self.objects.range_mut(..=addr).next_back()?;
        let index = addr.distance_from(start) / 8;
        *words.get_mut(index)? = value;
        Some(())
    }

    pub fn contains_object(&self, addr: Address) -> bool {
        self.objects.contains_key(&addr)
    }

    pub fn live_objects(&self) -> impl Iterator<Item = Address> + '_ {
        self.objects.keys().copied()
    }

    /// Marks `addr`, returning whether it was already marked.
    pub fn test_and_set_mark(&mut self, addr: Address) -> Result<bool, Error> {
        if !addr.is_aligned(PAGE_SIZE) {
            return Err(Error::LargeObjectMisaligned { address: addr });
        }
        Ok(!self.marked.insert(addr))
    }

    pub fn is_marked(&self, addr: Address) -> bool {
        self.marked.contains(&addr)
    }

    /// Frees every unmarked object. Returns the freed object and byte counts.
    pub(crate) fn sweep(&mut self) -> (usize, usize) {
        let mut freed_objects = 0;
        let mut freed_bytes = 0;
        let marked = &self.marked;
        self.objects.retain(|addr, words| {
            let live = marked.contains(addr);
            if !live {
                freed_objects += 1;
                freed_bytes += words.len() * 8;
                if crate::flags::log_objects() {
                    tracing::trace!(%addr, "freeing large object");
                }
            }
            live
        });
        (freed_objects, freed_bytes)
    }

    pub(crate) fn clear_marks(&mut self) {
        self.marked.clear();
    }

    pub fn bytes_allocated(&self) -> usize {
        self.objects.values().map(|words| words.len() * 8).sum()
    }
}
