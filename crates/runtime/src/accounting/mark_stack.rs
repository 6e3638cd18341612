use crate::Address;

/// Work list of marked objects whose references are not yet scanned.
///
/// Pushing onto a full stack doubles its capacity instead of
/// failing the collection.
#[derive(Debug, Clone)]
pub struct MarkStack {
    items: Vec<Address>,
}

impl MarkStack {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity.max(1)),
        }
    }

    pub fn push(&mut self, obj: Address) {
        if self.items.len() == self.items.capacity() {
            self.grow();
        }
        self.items.push(obj);
    }

    fn grow(&mut self) {
        let old_capacity = self.items.capacity();
        self.items.reserve_exact(old_capacity);
        tracing::trace!(
            old_capacity,
            new_capacity = self.items.capacity(),
            "growing mark stack"
        );
    }

    pub fn pop(&mut self) -> Option<Address> {
        self.items.pop()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn capacity(&self) -> usize {
        self.items.capacity()
    }

    /// Empties the stack, keeping its capacity.
    pub fn reset(&mut self) {
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_by_doubling() {
        let mut stack = MarkStack::new(2);
        for i in 1..=5 {
            stack.push(Address(i * 8));
        }
        assert_eq!(stack.len(), 5);
        // 2, then 4, then 8.
        assert!(stack.capacity() >= 8);
        assert_eq!(stack.pop(), Some(Address(40)));

        let grown = stack.capacity();
        stack.reset();
        assert!(stack.is_empty());
        assert_eq!(stack.capacity(), grown);
        assert_eq!(stack.pop(), None);
    }
}
