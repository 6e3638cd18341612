use crate::Address;
use std::iter;

/// One bit per `ALIGN` bytes over `[begin, begin + capacity)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpaceBitmap<const ALIGN: usize> {
    begin: Address,
    capacity: usize,
    words: Vec<u64>,
}

impl<const ALIGN: usize> SpaceBitmap<ALIGN> {
    pub fn new(begin: Address, capacity: usize) -> Self {
        let bits = capacity.div_ceil(ALIGN);
        Self {
            begin,
            capacity,
            words: vec![0; bits.div_ceil(64)],
        }
    }

    /// A bitmap covering no addresses.
    pub fn empty() -> Self {
        Self::new(Address::NULL, 0)
    }

    pub fn begin(&self) -> Address {
        self.begin
    }

    pub fn end(&self) -> Address {
        self.begin.offset(self.capacity)
    }

    pub fn has_address(&self, addr: Address) -> bool {
        addr >= self.begin && addr < self.end()
    }

    fn locate(&self, addr: Address) -> (usize, u64) {
        debug_assert!(
            self.has_address(addr),
            "{addr} outside bitmap [{}, {})",
            self.begin,
            self.end()
        );
        debug_assert!(addr.is_aligned(ALIGN));
        let bit = addr.distance_from(self.begin) / ALIGN;
        (bit / 64, 1 << (bit % 64))
    }

    /// Sets the bit for `addr`, returning its previous value.
    pub fn set(&mut self, addr: Address) -> bool {
        let (word, mask) = self.locate(addr);
        let old = self.words[word] & mask != 0;
        self.words[word] |= mask;
        old
    }

    /// Clears the bit for `addr`, returning its previous value.
    pub fn clear(&mut self, addr: Address) -> bool {
        let (word, mask) = self.locate(addr);
        let old = self.words[word] & mask != 0;
        self.words[word] &= !mask;
        old
    }

    pub fn test(&self, addr: Address) -> bool {
        let (word, mask) = self.locate(addr);
        self.words[word] & mask != 0
    }

    pub fn clear_all(&mut self) {
        self.words.fill(0);
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Addresses with their bit set in `[begin, end)`, ascending.
    pub fn iter_marked(&self, begin: Address, end: Address) -> impl Iterator<Item = Address> + '_ {
        let first = self.bit_floor(begin.max(self.begin));
        let last = self.bit_ceil(end.min(self.end()).max(self.begin));
        (first / 64..last.div_ceil(64)).flat_map(move |w| {
            let lo = w * 64;
            let mut bits = self.words[w];
            if first > lo {
                bits &= !0 << (first - lo);
            }
            if last < lo + 64 {
                bits &= (1 << (last - lo)) - 1;
            }
            iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let bit = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                Some(self.begin.offset((lo + bit) * ALIGN))
            })
        })
    }

    fn bit_floor(&self, addr: Address) -> usize {
        addr.distance_from(self.begin) / ALIGN
    }

    fn bit_ceil(&self, addr: Address) -> usize {
        addr.distance_from(self.begin).div_ceil(ALIGN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Address = Address(0x1000);

    #[test]
    fn set_reports_previous_value() {
        let mut bitmap = SpaceBitmap::<8>::new(BASE, 1024);
        assert!(!bitmap.set(BASE.offset(16)));
        assert!(bitmap.set(BASE.offset(16)));
        assert!(bitmap.test(BASE.offset(16)));
        assert!(!bitmap.test(BASE.offset(24)));
        assert!(bitmap.clear(BASE.offset(16)));
        assert!(bitmap.is_empty());
    }

    #[test]
    fn range_visits_in_address_order() {
        let mut bitmap = SpaceBitmap::<4>::new(BASE, 4096);
        for offset in [4092, 0, 12, 256, 260, 1024] {
            bitmap.set(BASE.offset(offset));
        }
        let all: Vec<_> = bitmap.iter_marked(BASE, bitmap.end()).collect();
        assert_eq!(
            all,
            [0, 12, 256, 260, 1024, 4092].map(|o| BASE.offset(o)).to_vec()
        );

        let window: Vec<_> = bitmap
            .iter_marked(BASE.offset(12), BASE.offset(260))
            .collect();
        assert_eq!(window, vec![BASE.offset(12), BASE.offset(256)]);
    }

    #[test]
    fn has_address_is_half_open() {
        let bitmap = SpaceBitmap::<8>::new(BASE, 64);
        assert!(bitmap.has_address(BASE));
        assert!(bitmap.has_address(BASE.offset(56)));
        assert!(!bitmap.has_address(BASE.offset(64)));
        assert!(!SpaceBitmap::<8>::empty().has_address(BASE));
    }
}
