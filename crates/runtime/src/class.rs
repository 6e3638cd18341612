use crate::{
    Address, Error,
    object::{
        CLASS_OBJECT_SIZE, FINALIZER_REFERENCE_SIZE, HEADER_SIZE, OBJECT_ALIGNMENT,
        REFERENCE_OBJECT_SIZE,
    },
};
use compact_str::CompactString;
use cranelift_entity::PrimaryMap;
use smallvec::SmallVec;
use tern_core::{HashMap, entity_ref};

entity_ref! {
    /// Index of a class in a heap's `ClassTable`. Stored in
    /// word 2 of the class object.
    pub struct ClassId;
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ReferenceKind {
    Soft,
    Weak,
    Finalizer,
    Phantom,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ClassKind {
    /// Instances are themselves classes.
    Class,
    Instance,
    ObjectArray,
    PrimitiveArray { component_size: usize },
    Reference(ReferenceKind),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassData {
    pub name: CompactString,
    pub kind: ClassKind,
    /// Size of an instance including the header. Unused for arrays.
    pub instance_size: usize,
    /// Byte offsets of the reference fields declared by the class.
    pub reference_offsets: SmallVec<[usize; 4]>,
    /// The class object representing this class in the heap.
    pub object: Address,
}

impl ClassData {
    /// First byte available to declared fields.
    fn fields_start(&self) -> usize {
        match self.kind {
            ClassKind::Reference(ReferenceKind::Finalizer) => FINALIZER_REFERENCE_SIZE,
            ClassKind::Reference(_) => REFERENCE_OBJECT_SIZE,
            _ => HEADER_SIZE,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        let invalid = |reason: String| {
            Err(Error::InvalidClass {
                name: self.name.clone(),
                reason,
            })
        };
        match self.kind {
            ClassKind::Class if self.instance_size != CLASS_OBJECT_SIZE => {
                return invalid(format!("class objects are {CLASS_OBJECT_SIZE} bytes"));
            }
            ClassKind::PrimitiveArray { component_size }
                if !matches!(component_size, 1 | 2 | 4 | 8) =>
            {
                return invalid(format!("unsupported component size {component_size}"));
            }
            ClassKind::Instance | ClassKind::Reference(_) => {
                if self.instance_size < self.fields_start()
                    || self.instance_size % OBJECT_ALIGNMENT != 0
                {
                    return invalid(format!(
                        "instance size {} must be aligned and at least {}",
                        self.instance_size,
                        self.fields_start()
                    ));
                }
            }
            _ => {}
        }

        let has_fields = matches!(self.kind, ClassKind::Instance | ClassKind::Reference(_));
        if !has_fields && !self.reference_offsets.is_empty() {
            return invalid("only instances declare reference fields".to_owned());
        }
        for &offset in &self.reference_offsets {
            if offset < self.fields_start()
                || offset >= self.instance_size
                || offset % OBJECT_ALIGNMENT != 0
            {
                return invalid(format!("reference field at bad offset {offset}"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ClassTable {
    classes: PrimaryMap<ClassId, ClassData>,
    by_name: HashMap<CompactString, ClassId>,
}

impl ClassTable {
    pub fn push(&mut self, data: ClassData) -> ClassId {
        let name = data.name.clone();
        let id = self.classes.push(data);
        self.by_name.insert(name, id);
        id
    }

    pub fn get(&self, id: ClassId) -> Option<&ClassData> {
        self.classes.get(id)
    }

    pub fn by_name(&self, name: &str) -> Option<ClassId> {
        self.by_name.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl std::ops::Index<ClassId> for ClassTable {
    type Output = ClassData;

    fn index(&self, id: ClassId) -> &ClassData {
        &self.classes[id]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn class(kind: ClassKind, instance_size: usize, offsets: &[usize]) -> ClassData {
        ClassData {
            name: "Test".into(),
            kind,
            instance_size,
            reference_offsets: offsets.iter().copied().collect(),
            object: Address::NULL,
        }
    }

    #[test]
    fn validates_field_offsets() {
        assert_eq!(class(ClassKind::Instance, 32, &[16, 24]).validate(), Ok(()));
        assert!(class(ClassKind::Instance, 32, &[8]).validate().is_err());
        assert!(class(ClassKind::Instance, 32, &[32]).validate().is_err());
        assert!(class(ClassKind::Instance, 28, &[]).validate().is_err());
    }

    #[test]
    fn references_reserve_their_own_fields() {
        let weak = ClassKind::Reference(ReferenceKind::Weak);
        assert_eq!(class(weak, 32, &[]).validate(), Ok(()));
        assert!(class(weak, 40, &[16]).validate().is_err());
        let finalizer = ClassKind::Reference(ReferenceKind::Finalizer);
        assert!(class(finalizer, 32, &[]).validate().is_err());
        assert_eq!(class(finalizer, 48, &[40]).validate(), Ok(()));
    }

    #[test]
    fn arrays_have_no_declared_fields() {
        let ints = ClassKind::PrimitiveArray { component_size: 4 };
        assert_eq!(class(ints, 0, &[]).validate(), Ok(()));
        assert!(class(ClassKind::PrimitiveArray { component_size: 3 }, 0, &[]).validate().is_err());
        let mut objects = class(ClassKind::ObjectArray, 0, &[]);
        objects.reference_offsets = smallvec![16];
        assert!(objects.validate().is_err());
    }

    #[test]
    fn looks_up_by_name() {
        let mut table = ClassTable::default();
        let id = table.push(class(ClassKind::Instance, 16, &[]));
        assert_eq!(table.by_name("Test"), Some(id));
        assert_eq!(table[id].instance_size, 16);
        assert_eq!(table.by_name("Other"), None);
    }
}
