use crate::{Address, accounting::CardTable, space::SpaceId};
use std::collections::BTreeSet;

/// Remembers every card of an immune space that was ever dirtied,
/// so the collector can find the space's outgoing references
/// without scanning all of it.
#[derive(Debug, Clone)]
pub struct ModUnionTable {
    space: SpaceId,
    cleared_cards: BTreeSet<Address>,
}

impl ModUnionTable {
    pub fn new(space: SpaceId) -> Self {
        Self {
            space,
            cleared_cards: BTreeSet::new(),
        }
    }

    pub fn space(&self) -> SpaceId {
        self.space
    }

    /// Moves the dirty cards of `[begin, end)` into the cache.
    /// The card table itself is cleared by the caller afterwards.
    pub fn process_cards(&mut self, card_table: &CardTable, begin: Address, end: Address) {
        self.cleared_cards
            .extend(card_table.dirty_cards(begin, end));
    }

    /// Start addresses of the cached cards, ascending.
    pub fn cards(&self) -> impl Iterator<Item = Address> + '_ {
        self.cleared_cards.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cranelift_entity::EntityRef;

    #[test]
    fn keeps_cards_after_the_table_is_cleared() {
        let base = Address(0x8000);
        let mut cards = CardTable::new(base, 1024);
        let mut table = ModUnionTable::new(SpaceId::new(0));

        cards.mark_card(base.offset(300));
        table.process_cards(&cards, base, base.offset(1024));
        cards.clear_card_table();

        cards.mark_card(base.offset(10));
        table.process_cards(&cards, base, base.offset(1024));

        assert_eq!(
            table.cards().collect::<Vec<_>>(),
            vec![base, base.offset(256)]
        );
    }
}
