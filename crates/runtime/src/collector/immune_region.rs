use crate::{
    Address,
    space::{ContinuousSpace, SpaceId},
};
use smallvec::SmallVec;

/// A contiguous address range whose objects are treated as
/// marked and are never moved or freed during a collection.
#[derive(Debug, Default)]
pub struct ImmuneRegion {
    begin: Address,
    end: Address,
    spaces: SmallVec<[SpaceId; 2]>,
}

impl ImmuneRegion {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Extends the region with `space`. Fails if the space does
    /// not border the current region.
    pub fn add_continuous_space(&mut self, id: SpaceId, space: &ContinuousSpace) -> bool {
        if self.spaces.is_empty() {
            self.begin = space.begin();
            self.end = space.limit();
        } else if space.begin() == self.end {
            self.end = space.limit();
        } else if space.limit() == self.begin {
            self.begin = space.begin();
        } else {
            return false;
        }
        self.spaces.push(id);
        true
    }

    pub fn contains_space(&self, id: SpaceId) -> bool {
        self.spaces.contains(&id)
    }

    pub fn contains_object(&self, obj: Address) -> bool {
        !self.spaces.is_empty() && obj >= self.begin && obj < self.end
    }

    pub fn begin(&self) -> Address {
        self.begin
    }

    pub fn end(&self) -> Address {
        self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::SpaceKind;
    use cranelift_entity::EntityRef;

    #[test]
    fn grows_only_over_adjacent_spaces() {
        let a = ContinuousSpace::new("a", SpaceKind::Image, Address(0x1000), 0x1000);
        let b = ContinuousSpace::new("b", SpaceKind::Zygote, Address(0x2000), 0x1000);
        let far = ContinuousSpace::new("far", SpaceKind::Zygote, Address(0x8000), 0x1000);

        let mut region = ImmuneRegion::default();
        assert!(!region.contains_object(Address(0x1000)));
        assert!(region.add_continuous_space(SpaceId::new(1), &b));
        assert!(region.add_continuous_space(SpaceId::new(0), &a));
        assert!(!region.add_continuous_space(SpaceId::new(2), &far));

        assert_eq!(region.begin(), Address(0x1000));
        assert_eq!(region.end(), Address(0x3000));
        assert!(region.contains_object(Address(0x2ff8)));
        assert!(!region.contains_object(Address(0x3000)));
        assert!(!region.contains_space(SpaceId::new(2)));

        region.reset();
        assert!(!region.contains_space(SpaceId::new(0)));
    }
}
