use super::{NO_VALUE, ValueName};
use bumpalo::Bump;
use tern_core::HashMap;

/// Interns `(op, operand1, operand2, modifier)` tuples as value names.
///
/// Value names are handed out in increasing order starting at 1;
/// 0 is never allocated and stands for "initial state"
/// wherever a version is expected.
pub struct ValueTable<'a> {
    values: HashMap<u64, ValueName, &'a Bump>,
    /// Saturates at `NO_VALUE`.
    last_value: u32,
    allow_new: bool,
}

impl<'a> ValueTable<'a> {
    pub fn new_in(arena: &'a Bump) -> Self {
        Self {
            values: HashMap::new_in(arena),
            last_value: 0,
            allow_new: true,
        }
    }

    #[inline]
    pub const fn build_key(op: u16, operand1: u16, operand2: u16, modifier: u16) -> u64 {
        ((op as u64) << 48)
            | ((operand1 as u64) << 32)
            | ((operand2 as u64) << 16)
            | modifier as u64
    }

    /// Returns the value name for the key, allocating a new one on a miss.
    pub fn lookup_or_create(
        &mut self,
        op: u16,
        operand1: u16,
        operand2: u16,
        modifier: u16,
    ) -> ValueName {
        let key = Self::build_key(op, operand1, operand2, modifier);
        if let Some(&value) = self.values.get(&key) {
            return value;
        }
        debug_assert!(
            self.allow_new,
            "value numbering allocated a new value name for key {key:#018x} after discovery"
        );
        let value = self.new_value_name();
        self.values.insert(key, value);
        value
    }

    /// Records a known value for a key.
    ///
    /// Re-storing an existing key must not change its value.
    pub fn store_exact(
        &mut self,
        op: u16,
        operand1: u16,
        operand2: u16,
        modifier: u16,
        value: ValueName,
    ) {
        let key = Self::build_key(op, operand1, operand2, modifier);
        let previous = self.values.insert(key, value);
        debug_assert!(
            previous.is_none_or(|previous| previous == value) || !self.is_good(),
            "store of value {value} contradicts existing value {previous:?} for key {key:#018x}"
        );
    }

    /// Whether the key is known to hold exactly `value`.
    pub fn has_value(
        &self,
        op: u16,
        operand1: u16,
        operand2: u16,
        modifier: u16,
        value: ValueName,
    ) -> bool {
        debug_assert!(value != 0 || !self.is_good());
        debug_assert!(u32::from(value) <= self.last_value || !self.is_good());
        let key = Self::build_key(op, operand1, operand2, modifier);
        self.values.get(&key) == Some(&value)
    }

    pub fn value_exists(&self, op: u16, operand1: u16, operand2: u16, modifier: u16) -> bool {
        self.values
            .contains_key(&Self::build_key(op, operand1, operand2, modifier))
    }

    /// False once the value-name space has been exhausted.
    pub fn is_good(&self) -> bool {
        self.last_value < u32::from(NO_VALUE)
    }

    pub fn last_value(&self) -> u32 {
        self.last_value
    }

    /// Any later miss in `lookup_or_create` is a bug.
    pub(crate) fn forbid_new_values(&mut self) {
        self.allow_new = false;
    }

    /// Once the names run out every miss yields `NO_VALUE` and
    /// `is_good` stays false.
    fn new_value_name(&mut self) -> ValueName {
        self.last_value = (self.last_value + 1).min(u32::from(NO_VALUE));
        self.last_value as ValueName
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_key_is_injective_over_fields() {
        let a = ValueTable::build_key(1, 2, 3, 4);
        assert_eq!(a, 0x0001_0002_0003_0004);
        assert_ne!(a, ValueTable::build_key(1, 2, 4, 3));
        assert_ne!(
            ValueTable::build_key(0xffff, 0, 0, 0),
            ValueTable::build_key(0, 0, 0, 0xffff)
        );
    }

    #[test]
    fn lookup_is_deterministic() {
        let arena = Bump::new();
        let mut table = ValueTable::new_in(&arena);
        let a = table.lookup_or_create(10, 1, 2, 3);
        let b = table.lookup_or_create(10, 1, 2, 4);
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(table.lookup_or_create(10, 1, 2, 3), a);
        assert_eq!(table.last_value(), 2);
    }

    #[test]
    fn store_and_has_value() {
        let arena = Bump::new();
        let mut table = ValueTable::new_in(&arena);
        let v = table.lookup_or_create(1, 0, 0, 0);
        assert!(!table.value_exists(2, 0, 0, 0));
        table.store_exact(2, 0, 0, 0, v);
        assert!(table.value_exists(2, 0, 0, 0));
        assert!(table.has_value(2, 0, 0, 0, v));
        // Storing the same value again is fine.
        table.store_exact(2, 0, 0, 0, v);
        let w = table.lookup_or_create(3, 0, 0, 0);
        assert!(!table.has_value(2, 0, 0, 0, w));
        assert_eq!(table.lookup_or_create(2, 0, 0, 0), v);
    }

    #[test]
    #[should_panic]
    #[cfg(debug_assertions)]
    fn contradicting_store_panics_in_debug() {
        let arena = Bump::new();
        let mut table = ValueTable::new_in(&arena);
        let v = table.lookup_or_create(1, 0, 0, 0);
        let w = table.lookup_or_create(1, 1, 0, 0);
        table.store_exact(1, 0, 0, 0, w);
        let _ = v;
    }

    #[test]
    fn overflow_is_detected() {
        let arena = Bump::new();
        let mut table = ValueTable::new_in(&arena);
        for i in 0..u32::from(NO_VALUE) - 1 {
            table.lookup_or_create(0, (i >> 16) as u16, i as u16, 0);
        }
        assert!(table.is_good());
        table.lookup_or_create(1, 0, 0, 0);
        assert!(!table.is_good());

        // Exhausted names saturate instead of wrapping back to 0.
        let late = table.lookup_or_create(2, 0, 0, 0);
        assert_eq!(late, NO_VALUE);
        assert_eq!(table.lookup_or_create(3, 0, 0, 0), NO_VALUE);
        assert_eq!(table.last_value(), u32::from(NO_VALUE));
        table.store_exact(2, 0, 0, 0, 1);
        assert!(!table.has_value(4, 0, 0, 0, late));
    }
}
