use std::collections::BTreeMap;

use crate::{
    model::{
        arena::{ArenaState, TcacheState},
        chunk::ChunkHeader,
    },
    process::{ProcessBases, ProcessRanges},
    profile::{Arch, LibcVersion},
};

/// A frozen, self-contained observation of one heap at one instant.
///
/// Snapshots are plain values: nothing in one references the target, so snapshots
/// outlive the process that produced them and two snapshots taken at different times
/// can be compared offline with [`crate::model::diff`]. Equality is structural, which
/// makes "nothing changed between captures" a direct `==`.
#[derive(Debug, Clone, PartialEq)]
pub struct HeapSnapshot {
    /// The inspected pid, `None` for non-process address-space sources
    pub pid: Option<i32>,
    /// The target's executable path, empty when the source cannot know it
    pub exe: String,
    /// Path of the mapped libc image, if one was found
    pub libc_path: Option<String>,
    /// Target pointer width
    pub arch: Arch,
    /// Detected glibc version, `None` when the image carries no version banner
    pub version: Option<LibcVersion>,
    /// Whether the resolved profile has a per-thread cache
    pub tcache_enabled: bool,
    /// Base address of the libc image at capture time
    pub libc_base: u64,
    /// Base address of the `[heap]` region at capture time
    pub heap_base: u64,
    /// The decoded main arena
    pub arena: ArenaState,
    /// The decoded per-thread cache, `None` when the profile has no tcache
    pub tcache: Option<TcacheState>,
    /// Every chunk on the linear heap walk, in address order, top chunk last
    pub heap_chunks: Vec<ChunkHeader>,
    /// Non-empty fastbin lists keyed by size class
    pub fastbins: BTreeMap<usize, Vec<ChunkHeader>>,
    /// Non-empty tcache lists keyed by size class
    pub tcache_chunks: BTreeMap<usize, Vec<ChunkHeader>>,
    /// Chunks on the unsorted bin, oldest first
    pub unsorted_bins: Vec<ChunkHeader>,
    /// Non-empty small bins keyed by bin index
    pub small_bins: BTreeMap<usize, Vec<ChunkHeader>>,
    /// Non-empty large bins keyed by bin index
    pub large_bins: BTreeMap<usize, Vec<ChunkHeader>>,
    /// Classified region intervals at capture time
    pub ranges: ProcessRanges,
    /// Per-category base addresses at capture time
    pub bases: ProcessBases,
}

impl HeapSnapshot {
    /// The top (wilderness) chunk, which the linear walk always visits last.
    #[must_use]
    pub fn top_chunk(&self) -> Option<&ChunkHeader> {
        self.heap_chunks.last()
    }

    /// Whether `addr` falls inside the `[heap]` region this snapshot captured.
    #[must_use]
    pub fn in_heap(&self, addr: u64) -> bool {
        self.ranges
            .contains(&crate::process::RegionKind::Heap, addr)
    }
}
