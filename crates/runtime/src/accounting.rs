//! Side structures the collector keeps about the heap:
//! bitmaps, cards, and the mark stack.

pub mod card_table;
pub mod mark_stack;
pub mod mod_union;
pub mod space_bitmap;

pub use card_table::CardTable;
pub use mark_stack::MarkStack;
pub use mod_union::ModUnionTable;
pub use space_bitmap::SpaceBitmap;
