use crate::Address;

/// The runtime's side of root enumeration.
///
/// Visitors receive each root slot and may rewrite it in place.
pub trait RootSource {
    /// Visits every strong root: thread stacks, JNI locals,
    /// globals and class roots. Null slots are skipped.
    fn visit_roots(&mut self, visit: &mut dyn FnMut(&mut Address));

    /// Visits only the class roots.
    fn visit_class_roots(&mut self, visit: &mut dyn FnMut(&mut Address));

    /// Sweeps the weak system tables. `is_marked` returns the
    /// object's current address if it is live; entries for dead
    /// objects are dropped.
    fn sweep_system_weaks(&mut self, is_marked: &mut dyn FnMut(Address) -> Option<Address>);
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadRoots {
    pub thread_id: u16,
    pub stack: Vec<Address>,
    pub jni_locals: Vec<Address>,
}

/// An inflated monitor and the object it guards.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Monitor {
    pub id: u32,
    pub object: Address,
}

/// In-process root set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeRoots {
    pub threads: Vec<ThreadRoots>,
    pub globals: Vec<Address>,
    pub class_roots: Vec<Address>,
    /// Weakly held interned strings.
    pub intern_table: Vec<Address>,
    /// Weakly held monitors.
    pub monitors: Vec<Monitor>,
}

fn visit_slots<'a>(
    slots: impl IntoIterator<Item = &'a mut Address>,
    visit: &mut dyn FnMut(&mut Address),
) {
    for slot in slots {
        if !slot.is_null() {
            visit(slot);
        }
    }
}

impl RootSource for RuntimeRoots {
    fn visit_roots(&mut self, visit: &mut dyn FnMut(&mut Address)) {
        for thread in &mut self.threads {
            visit_slots(&mut thread.stack, visit);
            visit_slots(&mut thread.jni_locals, visit);
        }
        visit_slots(&mut self.globals, visit);
        visit_slots(&mut self.class_roots, visit);
    }

    fn visit_class_roots(&mut self, visit: &mut dyn FnMut(&mut Address)) {
        visit_slots(&mut self.class_roots, visit);
    }

    fn sweep_system_weaks(&mut self, is_marked: &mut dyn FnMut(Address) -> Option<Address>) {
        self.intern_table.retain_mut(|obj| match is_marked(*obj) {
            Some(new) => {
                *obj = new;
                true
            }
            None => false,
        });
        self.monitors
            .retain_mut(|monitor| match is_marked(monitor.object) {
                Some(new) => {
                    monitor.object = new;
                    true
                }
                None => false,
            });
    }
}
