//! Storage used by the runtime: the generational program arena and per-program string heaps.

pub mod arena;
pub mod strings;

pub use arena::{Arena, ArenaHandle};
pub use strings::StringHeap;
