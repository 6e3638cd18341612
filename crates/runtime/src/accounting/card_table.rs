use crate::Address;

pub use tern_core::constants::runtime::CARD_SIZE;
pub const CARD_SHIFT: u32 = CARD_SIZE.trailing_zeros();

const CARD_CLEAN: u8 = 0;
const CARD_DIRTY: u8 = 0x70;

/// One byte per card over the continuous spaces. The write
/// barrier dirties the card holding the start of the written object.
#[derive(Debug, Clone)]
pub struct CardTable {
    begin: Address,
    cards: Vec<u8>,
}

impl CardTable {
    pub fn new(begin: Address, size: usize) -> Self {
        Self {
            begin,
            cards: vec![CARD_CLEAN; size.div_ceil(CARD_SIZE)],
        }
    }

    fn index(&self, addr: Address) -> Option<usize> {
        if addr < self.begin {
            return None;
        }
        let index = addr.distance_from(self.begin) >> CARD_SHIFT;
        (index < self.cards.len()).then_some(index)
    }

    pub fn card_start(&self, addr: Address) -> Address {
        Address(addr.0 & !(CARD_SIZE - 1))
    }

    /// Dirties the card of `addr`. Addresses outside the
    /// continuous spaces have no card.
    pub fn mark_card(&mut self, addr: Address) {
        if let Some(index) = self.index(addr) {
            self.cards[index] = CARD_DIRTY;
        }
    }

    pub fn is_dirty(&self, addr: Address) -> bool {
        self.index(addr)
            .is_some_and(|index| self.cards[index] == CARD_DIRTY)
    }

    /// Start addresses of the dirty cards within `[begin, end)`.
    pub fn dirty_cards(&self, begin: Address, end: Address) -> impl Iterator<Item = Address> + '_ {
        let first = self.index(begin).unwrap_or(self.cards.len());
        let last = if end <= begin {
            first
        } else {
            self.index(Address(end.0 - 1)).map_or(self.cards.len(), |i| i + 1)
        };
        (first..last)
            .filter(|&i| self.cards[i] == CARD_DIRTY)
            .map(|i| self.begin.offset(i << CARD_SHIFT))
    }

    pub fn clear_card_table(&mut self) {
        self.cards.fill(CARD_CLEAN);
    }
}
