use tern_core::entity_ref;

entity_ref! {
    /// Identity of the dex file declaring a field.
    pub struct DexFileId;
}

entity_ref! {
    /// Index into a graph's instance or static field annotation table.
    pub struct FieldInfoId;
}

/// Resolution facts about the field accessed by one instruction,
/// as computed by the front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldInfo {
    /// `None` when the declaring class could not be resolved.
    pub declaring_file: Option<DexFileId>,
    pub declaring_field_idx: u32,
    pub is_volatile: bool,
}

impl FieldInfo {
    pub fn resolved(file: DexFileId, field_idx: u32) -> Self {
        Self {
            declaring_file: Some(file),
            declaring_field_idx: field_idx,
            is_volatile: false,
        }
    }

    pub fn resolved_volatile(file: DexFileId, field_idx: u32) -> Self {
        Self {
            is_volatile: true,
            ..Self::resolved(file, field_idx)
        }
    }

    /// Unresolved fields are always treated as volatile.
    pub fn unresolved() -> Self {
        Self {
            declaring_file: None,
            declaring_field_idx: 0,
            is_volatile: true,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.declaring_file.is_some()
    }
}
