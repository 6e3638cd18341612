use crate::{
    Address, Error,
    accounting::{CardTable, MarkStack, ModUnionTable, card_table::CARD_SIZE},
    class::{ClassData, ClassId, ClassKind, ClassTable, ReferenceKind},
    collector::MarkCompact,
    config::HeapConfig,
    gc::{CollectionStats, GarbageCollector},
    lock_word::LockWord,
    object::{
        self, ARRAY_DATA_OFFSET, ARRAY_LENGTH_OFFSET, CLASS_INDEX_OFFSET, CLASS_OBJECT_SIZE,
        CLASS_OFFSET, LOCK_WORD_OFFSET, OBJECT_ALIGNMENT, QUEUE_NEXT_OFFSET, REFERENT_OFFSET,
        ReferenceSlot, ReferenceVisitor, ZOMBIE_OFFSET,
    },
    reference_processor::ReferenceProcessor,
    roots::RootSource,
    space::{ContinuousSpace, LargeObjectSpace, SpaceId, SpaceKind},
};
use compact_str::CompactString;
use cranelift_entity::{EntityRef, PrimaryMap};
use parking_lot::RwLock;
use smallvec::SmallVec;
use std::{mem, sync::Arc};

/// Locks a collection takes while it runs.
#[derive(Debug, Default)]
pub struct HeapLocks {
    /// Held exclusively by the collector for the whole pause.
    pub mutator: RwLock<()>,
    /// Guards the live and mark bitmaps.
    pub heap_bitmap: RwLock<()>,
}

/// A simulated managed heap.
///
/// All continuous spaces share one word-addressed backing store
/// starting at `heap_base`; large objects are stored separately
/// above it. Addresses are only meaningful to the heap that
/// produced them.
pub struct Heap {
    config: HeapConfig,
    memory: Vec<u64>,
    pub(crate) spaces: PrimaryMap<SpaceId, ContinuousSpace>,
    image_space: SpaceId,
    zygote_space: SpaceId,
    non_moving_space: SpaceId,
    bump_pointer_space: SpaceId,
    pub(crate) large_objects: LargeObjectSpace,
    pub(crate) card_table: CardTable,
    pub(crate) mod_union_tables: Vec<ModUnionTable>,
    classes: ClassTable,
    class_class: ClassId,
    mark_stack: MarkStack,
    pub(crate) reference_processor: ReferenceProcessor,
    locks: Arc<HeapLocks>,
}

impl Heap {
    pub fn new(config: HeapConfig) -> Result<Self, Error> {
        config.validate()?;

        let base = Address(config.heap_base);
        let continuous_capacity = config.continuous_capacity();

        let mut spaces = PrimaryMap::new();
        let mut next = base;
        let mut add_space = |name: &str, kind, capacity| {
            let id = spaces.push(ContinuousSpace::new(name, kind, next, capacity));
            next = next.offset(capacity);
            id
        };
        let image_space = add_space("image space", SpaceKind::Image, config.image_capacity);
        let zygote_space = add_space("zygote space", SpaceKind::Zygote, config.zygote_capacity);
        let non_moving_space = add_space(
            "non moving space",
            SpaceKind::NonMoving,
            config.non_moving_capacity,
        );
        let bump_pointer_space = add_space(
            "bump pointer space",
            SpaceKind::BumpPointer,
            config.bump_pointer_capacity,
        );

        let large_objects = LargeObjectSpace::new(
            base.offset(continuous_capacity),
            config.large_object_capacity,
        );

        let mut heap = Self {
            memory: vec![0; continuous_capacity / 8],
            spaces,
            image_space,
            zygote_space,
            non_moving_space,
            bump_pointer_space,
            large_objects,
            card_table: CardTable::new(base, continuous_capacity),
            mod_union_tables: vec![
                ModUnionTable::new(image_space),
                ModUnionTable::new(zygote_space),
            ],
            classes: ClassTable::default(),
            class_class: ClassId::new(0),
            mark_stack: MarkStack::new(config.mark_stack_capacity),
            reference_processor: ReferenceProcessor::default(),
            locks: Arc::default(),
            config,
        };

        // The class of all classes is its own class.
        let object = heap.alloc_raw(image_space, CLASS_OBJECT_SIZE)?;
        heap.class_class = heap.classes.push(ClassData {
            name: "java.lang.Class".into(),
            kind: ClassKind::Class,
            instance_size: CLASS_OBJECT_SIZE,
            reference_offsets: SmallVec::new(),
            object,
        });
        heap.init_header(object, heap.class_class);
        heap.write_word(
            object.offset(CLASS_INDEX_OFFSET),
            heap.class_class.index() as u64,
        );

        tracing::debug!(
            base = %base,
            continuous_capacity,
            large_object_capacity = heap.config.large_object_capacity,
            "created heap"
        );
        Ok(heap)
    }

    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    pub fn locks(&self) -> Arc<HeapLocks> {
        Arc::clone(&self.locks)
    }

    pub fn image_space(&self) -> SpaceId {
        self.image_space
    }

    pub fn zygote_space(&self) -> SpaceId {
        self.zygote_space
    }

    pub fn non_moving_space(&self) -> SpaceId {
        self.non_moving_space
    }

    pub fn bump_pointer_space(&self) -> SpaceId {
        self.bump_pointer_space
    }

    pub fn space(&self, id: SpaceId) -> &ContinuousSpace {
        &self.spaces[id]
    }

    pub fn large_object_space(&self) -> &LargeObjectSpace {
        &self.large_objects
    }

    pub fn space_of(&self, addr: Address) -> Option<SpaceId> {
        self.spaces
            .iter()
            .find(|(_, space)| space.has_address(addr))
            .map(|(id, _)| id)
    }

    pub(crate) fn mod_union_table(&self, space: SpaceId) -> Option<&ModUnionTable> {
        self.mod_union_tables.iter().find(|t| t.space() == space)
    }

    pub(crate) fn take_mark_stack(&mut self) -> MarkStack {
        mem::replace(&mut self.mark_stack, MarkStack::new(0))
    }

    pub(crate) fn return_mark_stack(&mut self, stack: MarkStack) {
        debug_assert!(stack.is_empty());
        self.mark_stack = stack;
    }

    pub fn mark_stack_capacity(&self) -> usize {
        self.mark_stack.capacity()
    }

    pub fn classes(&self) -> &ClassTable {
        &self.classes
    }

    pub fn class_class(&self) -> ClassId {
        self.class_class
    }

    /// Registers a class and allocates its class object in the
    /// image space, where it never moves.
    pub fn define_class(
        &mut self,
        name: &str,
        kind: ClassKind,
        instance_size: usize,
        reference_offsets: &[usize],
    ) -> Result<ClassId, Error> {
        let instance_size = match kind {
            ClassKind::Class => CLASS_OBJECT_SIZE,
            _ => instance_size,
        };
        let mut data = ClassData {
            name: name.into(),
            kind,
            instance_size,
            reference_offsets: reference_offsets.iter().copied().collect(),
            object: Address::NULL,
        };
        data.validate()?;
        if self.classes.by_name(name).is_some() {
            return Err(Error::InvalidClass {
                name: name.into(),
                reason: "already defined".to_owned(),
            });
        }

        let object = self.alloc_raw(self.image_space, CLASS_OBJECT_SIZE)?;
        data.object = object;
        let id = self.classes.push(data);
        self.init_header(object, self.class_class);
        self.write_word(object.offset(CLASS_INDEX_OFFSET), id.index() as u64);
        Ok(id)
    }

    fn alloc_raw(&mut self, space: SpaceId, size: usize) -> Result<Address, Error> {
        let space = &mut self.spaces[space];
        let addr = space.alloc(size).ok_or_else(|| Error::OutOfMemory {
            space: CompactString::from(space.name()),
            requested: size,
        })?;
        self.zero_range(addr, addr.offset(size));
        Ok(addr)
    }

    fn init_header(&mut self, obj: Address, class: ClassId) {
        self.set_lock_word(obj, LockWord::Unlocked);
        let class_object = self.classes[class].object;
        self.set_reference(obj, CLASS_OFFSET, class_object);
    }

    /// Allocates an instance of an `Instance` or `Reference` class.
    pub fn alloc_object(&mut self, space: SpaceId, class: ClassId) -> Result<Address, Error> {
        let data = &self.classes[class];
        if !matches!(data.kind, ClassKind::Instance | ClassKind::Reference(_)) {
            return Err(Error::InvalidClass {
                name: data.name.clone(),
                reason: "not an instance class".to_owned(),
            });
        }
        let size = data.instance_size;
        let obj = self.alloc_raw(space, size)?;
        self.init_header(obj, class);
        Ok(obj)
    }

    /// Allocates an array. Arrays of at least
    /// `large_object_threshold` bytes go to the large-object space
    /// regardless of `space`.
    pub fn alloc_array(
        &mut self,
        space: SpaceId,
        class: ClassId,
        length: usize,
    ) -> Result<Address, Error> {
        let data = &self.classes[class];
        let component_size = match data.kind {
            ClassKind::ObjectArray => 8,
            ClassKind::PrimitiveArray { component_size } => component_size,
            _ => {
                return Err(Error::InvalidClass {
                    name: data.name.clone(),
                    reason: "not an array class".to_owned(),
                });
            }
        };
        let size = object::array_size(length, component_size);
        let obj = if size >= self.config.large_object_threshold {
            self.large_objects
                .alloc(size)
                .ok_or_else(|| Error::OutOfMemory {
                    space: "large object space".into(),
                    requested: size,
                })?
        } else {
            self.alloc_raw(space, size)?
        };
        self.init_header(obj, class);
        self.write_word(obj.offset(ARRAY_LENGTH_OFFSET), length as u64);
        Ok(obj)
    }

    fn memory_index(&self, addr: Address) -> Option<usize> {
        let base = Address(self.config.heap_base);
        if addr < base {
            return None;
        }
        let index = addr.distance_from(base) / 8;
        (index < self.memory.len()).then_some(index)
    }

    pub(crate) fn read_word(&self, addr: Address) -> u64 {
        debug_assert!(addr.is_aligned(8), "unaligned read at {addr}");
        match self.memory_index(addr) {
            Some(index) => self.memory[index],
            None => self
                .large_objects
                .word(addr)
                .unwrap_or_else(|| panic!("read of unmapped address {addr}")),
        }
    }

    pub(crate) fn write_word(&mut self, addr: Address, value: u64) {
        debug_assert!(addr.is_aligned(8), "unaligned write at {addr}");
        match self.memory_index(addr) {
            Some(index) => self.memory[index] = value,
            None => self
                .large_objects
                .set_word(addr, value)
                .unwrap_or_else(|| panic!("write to unmapped address {addr}")),
        }
    }

    pub(crate) fn zero_range(&mut self, begin: Address, end: Address) {
        if let Some(first) = self.memory_index(begin) {
            let last = first + end.distance_from(begin).div_ceil(8);
            self.memory[first..last].fill(0);
        }
    }

    /// Copies `len` bytes from `src` to `dst`. The ranges may overlap.
    pub(crate) fn move_memory(&mut self, src: Address, dst: Address, len: usize) {
        let (Some(src), Some(dst)) = (self.memory_index(src), self.memory_index(dst)) else {
            panic!("moving memory outside the continuous spaces");
        };
        self.memory.copy_within(src..src + len / 8, dst);
    }

    /// Reads the reference stored in `slot`.
    pub(crate) fn read_reference(&self, slot: Address) -> Address {
        Address(self.read_word(slot) as usize)
    }

    /// Stores into a reference slot without a write barrier.
    pub(crate) fn write_reference(&mut self, slot: Address, value: Address) {
        self.write_word(slot, value.0 as u64);
    }

    pub fn get_reference(&self, obj: Address, offset: usize) -> Address {
        self.read_reference(obj.offset(offset))
    }

    /// Stores a reference field and dirties the object's card.
    pub fn set_reference(&mut self, obj: Address, offset: usize, value: Address) {
        self.write_reference(obj.offset(offset), value);
        self.card_table.mark_card(obj);
    }

    pub fn get_field(&self, obj: Address, offset: usize) -> u64 {
        self.read_word(obj.offset(offset))
    }

    pub fn set_field(&mut self, obj: Address, offset: usize, value: u64) {
        self.write_word(obj.offset(offset), value);
    }

    pub fn array_length(&self, array: Address) -> usize {
        self.read_word(array.offset(ARRAY_LENGTH_OFFSET)) as usize
    }

    pub fn get_element(&self, array: Address, index: usize) -> Address {
        debug_assert!(index < self.array_length(array));
        self.get_reference(array, ARRAY_DATA_OFFSET + index * 8)
    }

    pub fn set_element(&mut self, array: Address, index: usize, value: Address) {
        debug_assert!(index < self.array_length(array));
        self.set_reference(array, ARRAY_DATA_OFFSET + index * 8, value);
    }

    pub fn lock_word(&self, obj: Address) -> LockWord {
        LockWord::decode(self.read_word(obj.offset(LOCK_WORD_OFFSET)))
    }

    pub fn set_lock_word(&mut self, obj: Address, lock_word: LockWord) {
        self.write_word(obj.offset(LOCK_WORD_OFFSET), lock_word.encode());
    }

    pub fn class_of(&self, obj: Address) -> ClassId {
        let class_object = self.read_reference(obj.offset(CLASS_OFFSET));
        ClassId::new(self.read_word(class_object.offset(CLASS_INDEX_OFFSET)) as usize)
    }

    pub fn class_data(&self, obj: Address) -> &ClassData {
        &self.classes[self.class_of(obj)]
    }

    pub fn is_class(&self, obj: Address) -> bool {
        self.class_of(obj) == self.class_class
    }

    pub fn reference_kind(&self, obj: Address) -> Option<ReferenceKind> {
        match self.class_data(obj).kind {
            ClassKind::Reference(kind) => Some(kind),
            _ => None,
        }
    }

    /// Size of the object in bytes.
    pub fn size_of(&self, obj: Address) -> usize {
        let class = self.class_data(obj);
        match class.kind {
            ClassKind::Class => CLASS_OBJECT_SIZE,
            ClassKind::Instance | ClassKind::Reference(_) => class.instance_size,
            ClassKind::ObjectArray => object::array_size(self.array_length(obj), 8),
            ClassKind::PrimitiveArray { component_size } => {
                object::array_size(self.array_length(obj), component_size)
            }
        }
    }

    /// The object's bytes, header included.
    pub fn object_bytes(&self, obj: Address) -> &[u8] {
        let size = self.size_of(obj);
        match self.memory_index(obj) {
            Some(index) => {
                let words: &[u64] = &self.memory[index..index + size.div_ceil(8)];
                &bytemuck::cast_slice(words)[..size]
            }
            None => {
                panic!("object_bytes only supports objects in continuous spaces, not {obj}")
            }
        }
    }

    /// Reference slots of `obj`, starting with its class pointer.
    pub fn reference_slots(&self, obj: Address) -> SmallVec<[ReferenceSlot; 8]> {
        let mut slots = SmallVec::new();
        slots.push(ReferenceSlot::Strong(obj.offset(CLASS_OFFSET)));
        let class = self.class_data(obj);
        match class.kind {
            ClassKind::Class | ClassKind::PrimitiveArray { .. } => {}
            ClassKind::Instance => {}
            ClassKind::Reference(kind) => {
                slots.push(ReferenceSlot::Weak {
                    owner: obj,
                    slot: obj.offset(REFERENT_OFFSET),
                });
                slots.push(ReferenceSlot::Strong(obj.offset(QUEUE_NEXT_OFFSET)));
                if kind == ReferenceKind::Finalizer {
                    slots.push(ReferenceSlot::Strong(obj.offset(ZOMBIE_OFFSET)));
                }
            }
            ClassKind::ObjectArray => {
                let data = obj.offset(ARRAY_DATA_OFFSET);
                slots.extend(
                    (0..self.array_length(obj)).map(|i| ReferenceSlot::Strong(data.offset(i * 8))),
                );
            }
        }
        slots.extend(
            class
                .reference_offsets
                .iter()
                .map(|&offset| ReferenceSlot::Strong(obj.offset(offset))),
        );
        slots
    }

    pub fn visit_references(&self, obj: Address, visitor: &mut impl ReferenceVisitor) {
        for slot in self.reference_slots(obj) {
            slot.accept(visitor);
        }
    }

    /// Objects currently allocated in a continuous space, ascending.
    pub fn objects_in(&self, space: SpaceId) -> Vec<Address> {
        let space = &self.spaces[space];
        match space.live_bitmap() {
            Some(live) => live.iter_marked(space.begin(), space.end()).collect(),
            None => {
                let mut objects = Vec::new();
                let mut addr = space.begin();
                while addr < space.end() {
                    objects.push(addr);
                    addr = addr.offset(self.size_of(addr)).align_up(OBJECT_ALIGNMENT);
                }
                objects
            }
        }
    }

    /// Every allocated object, in all spaces.
    pub fn live_objects(&self) -> Vec<Address> {
        let mut objects: Vec<Address> = self
            .spaces
            .keys()
            .flat_map(|space| self.objects_in(space))
            .collect();
        objects.extend(self.large_objects.live_objects());
        objects
    }

    /// Moves the dirty cards of each immune space into its mod-union table.
    pub(crate) fn process_cards(&mut self) {
        for table in &mut self.mod_union_tables {
            let space = &self.spaces[table.space()];
            table.process_cards(&self.card_table, space.begin(), space.end());
        }
    }

    /// Reference slots of the objects starting in the cards a
    /// mod-union table has cached.
    pub(crate) fn mod_union_reference_slots(&self, space: SpaceId) -> Vec<ReferenceSlot> {
        let Some(table) = self.mod_union_table(space) else {
            return Vec::new();
        };
        let Some(live) = self.spaces[space].live_bitmap() else {
            return Vec::new();
        };
        table
            .cards()
            .flat_map(move |card| live.iter_marked(card, card.offset(CARD_SIZE)))
            .flat_map(|obj| self.reference_slots(obj))
            .collect()
    }

    /// Frees the objects of `space` that are live but unmarked.
    /// Returns the freed object and byte counts.
    pub(crate) fn sweep_space(&mut self, space: SpaceId) -> (usize, usize) {
        let (Some(live), Some(mark)) = (
            self.spaces[space].live_bitmap(),
            self.spaces[space].mark_bitmap(),
        ) else {
            return (0, 0);
        };
        let begin = self.spaces[space].begin();
        let end = self.spaces[space].end();
        let dead: Vec<Address> = live
            .iter_marked(begin, end)
            .filter(|&obj| !mark.test(obj))
            .collect();

        let mut freed_bytes = 0;
        for &obj in &dead {
            let size = self.size_of(obj).next_multiple_of(OBJECT_ALIGNMENT);
            if crate::flags::log_objects() {
                tracing::trace!(%obj, size, "freeing object");
            }
            self.spaces[space].free(obj, size);
            self.zero_range(obj, obj.offset(size));
            freed_bytes += size;
        }
        (dead.len(), freed_bytes)
    }

    pub(crate) fn clear_marked_objects(&mut self) {
        for space in self.spaces.values_mut() {
            space.clear_mark_bitmap();
        }
        self.large_objects.clear_marks();
    }

    pub fn cleared_references(&self) -> &[Address] {
        self.reference_processor.cleared_references()
    }

    pub fn take_cleared_references(&mut self) -> Vec<Address> {
        self.reference_processor.take_cleared_references()
    }

    /// Runs a mark-compact collection that compacts the
    /// bump-pointer space.
    pub fn collect_garbage(
        &mut self,
        roots: &mut dyn RootSource,
        clear_soft_references: bool,
    ) -> Result<CollectionStats, Error> {
        let target = self.bump_pointer_space;
        let mut collector = MarkCompact::new(self);
        collector.set_space(target)?;
        collector.set_clear_soft_references(clear_soft_references);
        Ok(collector.run_phases(roots))
    }
}
