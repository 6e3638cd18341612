use crate::{Address, Heap, lock_word::LockWord, roots::RootSource};
use tern_core::HashSet;

impl Heap {
    /// Checks that every root and every reference slot of every
    /// allocated object is null or points at an allocated object.
    /// Returns a description of each violation.
    pub fn verify(&self, roots: &mut dyn RootSource) -> Vec<String> {
        let objects = self.live_objects();
        let live: HashSet<Address> = objects.iter().copied().collect();
        let mut problems = Vec::new();

        roots.visit_roots(&mut |root| {
            if !live.contains(&*root) {
                problems.push(format!("root points at {root}, which is not an object"));
            }
        });

        for &obj in &objects {
            if let LockWord::Forwarded { address } = self.lock_word(obj) {
                problems.push(format!("{obj} is still forwarded to {address}"));
            }
            for slot in self.reference_slots(obj) {
                let target = self.read_reference(slot.address());
                if !target.is_null() && !live.contains(&target) {
                    problems.push(format!(
                        "slot {} of {obj} points at {target}, which is not an object",
                        slot.address()
                    ));
                }
            }
        }

        if !problems.is_empty() {
            tracing::warn!(problems = problems.len(), "heap verification failed");
        }
        problems
    }
}
