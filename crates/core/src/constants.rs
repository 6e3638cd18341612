pub mod runtime {
    /// Every heap object starts on a multiple of this many bytes.
    pub const OBJECT_ALIGNMENT: usize = 8;
    /// Granularity of the heap card table.
    pub const CARD_SIZE: usize = 128;
    /// Large objects are allocated on page boundaries.
    pub const PAGE_SIZE: usize = 4096;
}

pub mod mir {
    /// Sentinel value name; also marks value-name space exhaustion.
    pub const NO_VALUE: u16 = 0xFFFF;
}
