use crate::Error;

pub use tern_core::constants::runtime::PAGE_SIZE;

/// Layout and sizing of a [`Heap`](crate::Heap).
///
/// Continuous spaces are laid out back to back starting at
/// `heap_base`, in the order image, zygote, non-moving,
/// bump-pointer. Large objects live above them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapConfig {
    pub heap_base: usize,
    pub image_capacity: usize,
    pub zygote_capacity: usize,
    pub non_moving_capacity: usize,
    pub bump_pointer_capacity: usize,
    pub large_object_capacity: usize,
    /// Arrays at least this large are allocated in the large-object space.
    pub large_object_threshold: usize,
    /// Initial mark stack capacity; the stack doubles when full.
    pub mark_stack_capacity: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            heap_base: 0x1000_0000,
            image_capacity: 16 * PAGE_SIZE,
            zygote_capacity: 16 * PAGE_SIZE,
            non_moving_capacity: 16 * PAGE_SIZE,
            bump_pointer_capacity: 64 * PAGE_SIZE,
            large_object_capacity: 256 * PAGE_SIZE,
            large_object_threshold: 3 * PAGE_SIZE,
            mark_stack_capacity: 64,
        }
    }
}

impl HeapConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.heap_base == 0 || self.heap_base % PAGE_SIZE != 0 {
            return Err(Error::InvalidConfig(format!(
                "heap base {:#x} must be non-null and page aligned",
                self.heap_base
            )));
        }
        for (name, capacity) in [
            ("image", self.image_capacity),
            ("zygote", self.zygote_capacity),
            ("non-moving", self.non_moving_capacity),
            ("bump-pointer", self.bump_pointer_capacity),
            ("large-object", self.large_object_capacity),
        ] {
            if capacity == 0 || capacity % PAGE_SIZE != 0 {
                return Err(Error::InvalidConfig(format!(
                    "{name} capacity {capacity} must be a non-zero multiple of {PAGE_SIZE}"
                )));
            }
        }
        if self.large_object_threshold == 0 {
            return Err(Error::InvalidConfig(
                "large object threshold must be non-zero".to_owned(),
            ));
        }
        if self.mark_stack_capacity == 0 {
            return Err(Error::InvalidConfig(
                "mark stack capacity must be non-zero".to_owned(),
            ));
        }
        Ok(())
    }

    /// Total size of the continuous spaces.
    pub(crate) fn continuous_capacity(&self) -> usize {
        self.image_capacity
            + self.zygote_capacity
            + self.non_moving_capacity
            + self.bump_pointer_capacity
    }
}
