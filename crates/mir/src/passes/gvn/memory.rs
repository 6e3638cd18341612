//! Versioned model of heap memory for value numbering.
//!
//! A memory version is itself a value name. Versions are only compared
//! for equality and through `max`, which relies on later writes along
//! any path receiving larger names.

use super::{NO_VALUE, ValueName};
use crate::ir::AccessType;
use bumpalo::Bump;
use tern_core::{HashMap, HashSet};

/// A storage location class: the base object (or `NO_VALUE` for
/// "any object"/static storage), the field id (or `NO_VALUE` for array
/// elements) and the access type.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct MemoryKey {
    pub base: ValueName,
    pub field: u16,
    pub access: AccessType,
}

impl MemoryKey {
    pub fn new(base: ValueName, field: u16, access: AccessType) -> Self {
        Self {
            base,
            field,
            access,
        }
    }

    /// The key an access through an unknown alias would use.
    pub fn aliased(self) -> Self {
        Self {
            base: NO_VALUE,
            ..self
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryVersions<'a> {
    versions: HashMap<MemoryKey, ValueName, &'a Bump>,
    global: ValueName,
    unresolved_ifield: [ValueName; AccessType::COUNT],
    unresolved_sfield: [ValueName; AccessType::COUNT],
}

impl<'a> MemoryVersions<'a> {
    /// Memory as observed on method entry; every version is 0.
    pub fn new_in(arena: &'a Bump) -> Self {
        Self {
            versions: HashMap::new_in(arena),
            global: 0,
            unresolved_ifield: [0; AccessType::COUNT],
            unresolved_sfield: [0; AccessType::COUNT],
        }
    }

    /// Memory about which nothing is known except that it is
    /// at least as new as `version`.
    pub fn reset_in(arena: &'a Bump, version: ValueName) -> Self {
        Self {
            versions: HashMap::new_in(arena),
            global: version,
            unresolved_ifield: [version; AccessType::COUNT],
            unresolved_sfield: [version; AccessType::COUNT],
        }
    }

    /// The version a load through `key.base` observes.
    ///
    /// A load through a unique base only sees writes through that base.
    /// Any other base also observes writes through unknown aliases and
    /// calls.
    pub fn get_version(&self, key: MemoryKey, unique_base: bool) -> ValueName {
        let specific = self.versions.get(&key).copied().unwrap_or(0);
        if key.base != NO_VALUE && unique_base {
            return specific;
        }
        let aliased = self.versions.get(&key.aliased()).copied().unwrap_or(0);
        specific.max(aliased).max(self.global)
    }

    /// Records a write producing `version`. Writes through a base that
    /// may be aliased also bump the aliased key.
    pub fn advance_version(
        &mut self,
        key: MemoryKey,
        unique_base: bool,
        version: ValueName,
    ) -> ValueName {
        self.versions.insert(key, version);
        if !unique_base {
            self.versions.insert(key.aliased(), version);
        }
        version
    }

    /// A call may have written anything not reachable only
    /// through a unique reference.
    pub fn advance_global(&mut self, version: ValueName) {
        self.global = version;
    }

    pub fn global_version(&self) -> ValueName {
        self.global
    }

    pub fn unresolved_ifield_version(&self, access: AccessType) -> ValueName {
        self.unresolved_ifield[access.index()]
    }

    pub fn unresolved_sfield_version(&self, access: AccessType) -> ValueName {
        self.unresolved_sfield[access.index()]
    }

    pub fn set_unresolved_ifield_version(&mut self, access: AccessType, version: ValueName) {
        self.unresolved_ifield[access.index()] = version;
    }

    pub fn set_unresolved_sfield_version(&mut self, access: AccessType, version: ValueName) {
        self.unresolved_sfield[access.index()] = version;
    }

    /// Combines the memory states at the ends of several predecessors.
    /// Every component on which they disagree becomes `merge_version`.
    pub fn merge(arena: &'a Bump, states: &[&Self], merge_version: ValueName) -> Self {
        let Some((first, rest)) = states.split_first() else {
            return Self::new_in(arena);
        };

        let pick = |get: &dyn Fn(&Self) -> ValueName| {
            let v = get(*first);
            if rest.iter().all(|s| get(*s) == v) {
                v
            } else {
                merge_version
            }
        };

        let mut merged = Self::new_in(arena);
        merged.global = pick(&|s| s.global);
        for i in 0..AccessType::COUNT {
            merged.unresolved_ifield[i] = pick(&|s| s.unresolved_ifield[i]);
            merged.unresolved_sfield[i] = pick(&|s| s.unresolved_sfield[i]);
        }

        let mut keys: HashSet<MemoryKey, &Bump> = HashSet::new_in(arena);
        for state in states {
            keys.extend(state.versions.keys().copied());
        }
        for key in keys {
            let version = pick(&|s| s.versions.get(&key).copied().unwrap_or(0));
            if version != 0 {
                merged.versions.insert(key, version);
            }
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIELD: u16 = 3;

    fn key(base: ValueName) -> MemoryKey {
        MemoryKey::new(base, FIELD, AccessType::Normal)
    }

    #[test]
    fn aliased_write_is_visible_through_other_bases() {
        let arena = Bump::new();
        let mut memory = MemoryVersions::new_in(&arena);
        assert_eq!(memory.get_version(key(10), false), 0);

        memory.advance_version(key(10), false, 20);
        assert_eq!(memory.get_version(key(10), false), 20);
        // Unknown relationship between 11 and 10.
        assert_eq!(memory.get_version(key(11), false), 20);
        // Other fields are untouched.
        assert_eq!(
            memory.get_version(MemoryKey::new(11, FIELD + 1, AccessType::Normal), false),
            0
        );
    }

    #[test]
    fn unique_bases_ignore_aliases_and_calls() {
        let arena = Bump::new();
        let mut memory = MemoryVersions::new_in(&arena);
        memory.advance_version(key(10), true, 20);
        // Written through a unique reference: no aliased bump.
        assert_eq!(memory.get_version(key(11), false), 0);

        memory.advance_global(21);
        assert_eq!(memory.get_version(key(10), true), 20);
        assert_eq!(memory.get_version(key(10), false), 21);
        assert_eq!(memory.get_version(key(11), false), 21);
    }

    #[test]
    fn static_keys_observe_global() {
        let arena = Bump::new();
        let mut memory = MemoryVersions::new_in(&arena);
        memory.advance_version(key(NO_VALUE), false, 5);
        assert_eq!(memory.get_version(key(NO_VALUE), true), 5);
        memory.advance_global(6);
        assert_eq!(memory.get_version(key(NO_VALUE), true), 6);
    }

    #[test]
    fn merge_keeps_agreeing_components() {
        let arena = Bump::new();
        let mut a = MemoryVersions::new_in(&arena);
        let mut b = MemoryVersions::new_in(&arena);
        a.advance_version(key(10), true, 20);
        b.advance_version(key(10), true, 20);
        a.advance_version(key(11), true, 21);
        a.set_unresolved_ifield_version(AccessType::Wide, 22);

        let merged = MemoryVersions::merge(&arena, &[&a, &b], 99);
        assert_eq!(merged.get_version(key(10), true), 20);
        assert_eq!(merged.get_version(key(11), true), 99);
        assert_eq!(merged.unresolved_ifield_version(AccessType::Wide), 99);
        assert_eq!(merged.unresolved_ifield_version(AccessType::Normal), 0);
        assert_eq!(merged.global_version(), 0);
    }

    #[test]
    fn reset_hides_everything() {
        let arena = Bump::new();
        let memory = MemoryVersions::reset_in(&arena, 7);
        assert_eq!(memory.get_version(key(10), false), 7);
        assert_eq!(memory.unresolved_sfield_version(AccessType::Object), 7);
        // Objects created after the reset start from version 0.
        assert_eq!(memory.get_version(key(10), true), 0);
    }
}
