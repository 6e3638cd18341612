pub mod constants;
pub mod sexpr;

use allocator_api2::alloc::Global;

#[doc(hidden)]
pub use cranelift_entity;

pub type HashMap<K, V, A = Global> = hashbrown::HashMap<K, V, hashbrown::DefaultHashBuilder, A>;
pub type HashSet<T, A = Global> = hashbrown::HashSet<T, hashbrown::DefaultHashBuilder, A>;

pub type IndexMap<K, V> = indexmap::IndexMap<K, V, hashbrown::DefaultHashBuilder>;
pub type IndexSet<T> = indexmap::IndexSet<T, hashbrown::DefaultHashBuilder>;

/// Defines a 32-bit entity reference usable as a key
/// in `cranelift_entity` maps.
///
/// Crates invoking this macro must depend on `bytemuck`.
#[macro_export]
macro_rules! entity_ref {
    {
        $(#[$attr:meta])*
        pub struct $ident:ident;
    } => {
        #[derive(
            Copy, Clone, Debug, PartialEq, Eq, Hash, Default, PartialOrd, Ord,
            bytemuck::Pod, bytemuck::Zeroable,
        )]
        #[repr(transparent)]
        $(#[$attr])*
        pub struct $ident(u32);

        impl $crate::cranelift_entity::EntityRef for $ident {
            fn new(i: usize) -> Self {
                if i >= u32::MAX as usize {
                    // u32::MAX is a reserved value
                    panic!(concat!("too many entities refs of type ", stringify!($ident)));
                }
                Self(i as u32)
            }

            fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl $crate::cranelift_entity::packed_option::ReservedValue for $ident {
            fn is_reserved_value(&self) -> bool {
                self.0 == u32::MAX
            }

            fn reserved_value() -> Self {
                Self(u32::MAX)
            }
        }
    };
}

/// Like [`entity_ref!`], but backed by a `u16`.
#[macro_export]
macro_rules! entity_ref_16bit {
    {
        $(#[$attr:meta])*
        pub struct $ident:ident;
    } => {
        #[derive(
            Copy, Clone, Debug, PartialEq, Eq, Hash, Default, PartialOrd, Ord,
            bytemuck::Pod, bytemuck::Zeroable,
        )]
        #[repr(transparent)]
        $(#[$attr])*
        pub struct $ident(u16);

        impl $crate::cranelift_entity::EntityRef for $ident {
            fn new(i: usize) -> Self {
                if i >= u16::MAX as usize {
                    // u16::MAX is a reserved value
                    panic!(concat!("too many entities refs of type ", stringify!($ident)));
                }
                Self(i as u16)
            }

            fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl $crate::cranelift_entity::packed_option::ReservedValue for $ident {
            fn is_reserved_value(&self) -> bool {
                self.0 == u16::MAX
            }

            fn reserved_value() -> Self {
                Self(u16::MAX)
            }
        }
    };
}
