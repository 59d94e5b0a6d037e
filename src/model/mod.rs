//! Heap object model: decoded allocator structures, traversal, snapshots and diffs.
//!
//! Everything here is expressed against [`crate::process::AddressSpace`] and the
//! layout schemas in [`crate::layout`]; no module in this tree touches `/proc`
//! directly. The central type is [`HeapInspector`], which decodes arena, tcache,
//! chunk and bin state on demand and can freeze all of it into a [`HeapSnapshot`]
//! for offline comparison ([`diff`]) and integrity auditing ([`audit`]).

mod arena;
mod check;
mod chunk;
mod diff;
mod inspector;
mod snapshot;

pub use arena::{ArenaState, TcacheState};
pub use check::{audit, Finding};
pub use chunk::{ChunkFlags, ChunkHeader, SIZE_FLAG_MASK};
pub use diff::{diff, ChangeSet, ChunkChange};
pub use inspector::HeapInspector;
pub use snapshot::HeapSnapshot;
