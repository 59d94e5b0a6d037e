use std::{
    collections::{BTreeMap, HashSet},
    ops::Range,
};

use crate::{
    layout::{glibc, StructSchema},
    model::{
        arena::{ArenaState, TcacheState},
        chunk::{ChunkHeader, SIZE_FLAG_MASK},
        snapshot::HeapSnapshot,
    },
    process::{AddressSpace, Process, ProcessBases, ProcessRanges, RegionKind},
    profile::{AllocatorProfile, ArenaOracle, HelperOracle},
    Error, Result,
};

/// The central decoding and traversal engine for one target's heap.
///
/// An inspector binds an [`AddressSpace`] to a resolved [`AllocatorProfile`] and the
/// matching layout schemas. Every operation is a purely functional decode over bytes
/// read at call time: the inspector holds no mutable state, never writes to the
/// target, and never pauses it. Results are therefore best-effort observations of a
/// moving target (see the crate-level consistency notes).
///
/// # Examples
///
/// ```rust,no_run
/// use heapscope::HeapInspector;
///
/// let inspector = HeapInspector::attach(1234)?;
/// for chunk in inspector.heap_chunks()? {
///     println!("{:#x}: size {:#x}", chunk.addr, chunk.usable_size());
/// }
/// let snapshot = inspector.capture()?;
/// # Ok::<(), heapscope::Error>(())
/// ```
pub struct HeapInspector<S: AddressSpace> {
    space: S,
    profile: AllocatorProfile,
    arena_schema: StructSchema,
    chunk_schema: StructSchema,
    tcache_schema: StructSchema,
}

impl HeapInspector<Process> {
    /// Attach to a live process, resolving its allocator profile with the bundled
    /// helper binaries (located through `HEAPSCOPE_HELPERS`).
    ///
    /// # Errors
    /// - [`crate::Error::ProcessUnavailable`] if the process cannot be inspected
    /// - [`crate::Error::UnsupportedArchitecture`] for an unrecognized target machine
    /// - [`crate::Error::ProfileResolution`] if the libc cannot be profiled
    pub fn attach(pid: i32) -> Result<Self> {
        Self::attach_with(pid, &HelperOracle::from_env())
    }

    /// Attach to a live process with a caller-supplied arena oracle.
    ///
    /// # Errors
    /// Same as [`HeapInspector::attach`].
    pub fn attach_with(pid: i32, oracle: &dyn ArenaOracle) -> Result<Self> {
        let process = Process::attach(pid)?;
        let libc = process.libc_path()?;
        let ld = process.ld_path()?;
        let profile = AllocatorProfile::resolve(&libc, &ld, oracle)?;
        Ok(Self::with_space(process, profile))
    }
}

impl<S: AddressSpace> HeapInspector<S> {
    /// Bind an already-resolved profile to any address-space source.
    ///
    /// This is the entry point for debugger-extension and emulator front ends, which
    /// bring their own [`AddressSpace`] implementation.
    #[must_use]
    pub fn with_space(space: S, profile: AllocatorProfile) -> Self {
        let arch = profile.arch;
        HeapInspector {
            space,
            arena_schema: glibc::arena_schema(profile.version, arch),
            chunk_schema: glibc::chunk_schema(arch),
            tcache_schema: glibc::tcache_schema(arch),
            profile,
        }
    }

    /// The resolved allocator profile this inspector decodes with.
    #[must_use]
    pub fn profile(&self) -> &AllocatorProfile {
        &self.profile
    }

    /// The underlying address space.
    #[must_use]
    pub fn space(&self) -> &S {
        &self.space
    }

    /// Classified region intervals, re-read live from the target.
    ///
    /// # Errors
    /// Fails when the target's region table cannot be obtained.
    pub fn ranges(&self) -> Result<ProcessRanges> {
        let regions = self.space.regions()?;
        Ok(ProcessRanges::from_regions(&regions, &self.space.exe()))
    }

    /// Per-category base addresses, re-read live from the target.
    ///
    /// # Errors
    /// Fails when the target's region table cannot be obtained.
    pub fn bases(&self) -> Result<ProcessBases> {
        let regions = self.space.regions()?;
        Ok(ProcessBases::from_regions(&regions, &self.space.exe()))
    }

    fn word(&self) -> u64 {
        self.profile.word()
    }

    fn heap_range(&self) -> Result<(u64, u64)> {
        self.ranges()?
            .first(&RegionKind::Heap)
            .ok_or(Error::HeapUnmapped)
    }

    fn arena_addr(&self) -> Result<u64> {
        let libc_base = self
            .bases()?
            .get(&RegionKind::Libc)
            .ok_or_else(|| Error::ProfileResolution("no libc mapping in target".into()))?;
        Ok(libc_base + self.profile.main_arena_offset)
    }

    // Best-effort word read; unmapped addresses decode as zero.
    fn read_word(&self, addr: u64) -> u64 {
        let width = self.profile.arch.word();
        let bytes = self.space.read(addr, width);
        let mut value = 0u64;
        for (i, byte) in bytes.iter().take(width).enumerate() {
            value |= u64::from(*byte) << (8 * i);
        }
        value
    }

    fn chunk_at(&self, addr: u64, window: usize) -> Result<ChunkHeader> {
        let bytes = self.space.read(addr, window);
        ChunkHeader::from_view(&self.chunk_schema.bind(&bytes, addr))
    }

    /// Decode the main arena.
    ///
    /// # Errors
    /// Fails when the region table is unavailable or no libc mapping exists. A short
    /// read of the arena bytes themselves is absorbed: missing bytes decode as zero.
    pub fn arena(&self) -> Result<ArenaState> {
        let addr = self.arena_addr()?;
        let bytes = self.space.read(addr, self.arena_schema.size_of());
        ArenaState::from_view(&self.arena_schema.bind(&bytes, addr))
    }

    /// Decode the per-thread cache, `None` when the target's libc has no tcache.
    ///
    /// Some 32-bit heaps start with an extra alignment pad, so the structure's base is
    /// probed rather than assumed: a zero word at `heap + word` pushes the base from
    /// `heap + 2*word` to `heap + 4*word`.
    ///
    /// # Errors
    /// Returns [`crate::Error::HeapUnmapped`] before the target's first allocation.
    pub fn tcache(&self) -> Result<Option<TcacheState>> {
        if !self.profile.tcache_enabled {
            return Ok(None);
        }
        let (heap_base, heap_end) = self.heap_range()?;
        let w = self.word();
        let base = if self.read_word(heap_base + w) == 0 {
            heap_base + 4 * w
        } else {
            heap_base + 2 * w
        };
        if base >= heap_end {
            return Err(corrupt_error!(
                "tcache base {:#x} lies past the heap end {:#x}",
                base,
                heap_end
            ));
        }
        let bytes = self.space.read(base, self.tcache_schema.size_of());
        TcacheState::from_view(&self.tcache_schema.bind(&bytes, base)).map(Some)
    }

    /// Walk the heap's linear chunk list from the heap base to the top.
    ///
    /// The walk is defensive: a zero-sized header is treated as an alignment pad and
    /// skipped by two words (an artifact confirmed on some 32-bit captures, applied
    /// uniformly here), and a header smaller than the minimum chunk size ends the walk
    /// instead of looping. Re-walking an unchanged heap yields an identical sequence.
    ///
    /// # Errors
    /// Returns [`crate::Error::HeapUnmapped`] before the target's first allocation.
    pub fn heap_chunks(&self) -> Result<Vec<ChunkHeader>> {
        let (start, end) = self.heap_range()?;
        let mem = self.space.read(start, (end - start) as usize);
        walk_heap(&self.chunk_schema, &mem, start)
    }

    /// All non-empty fastbins, keyed by size class.
    ///
    /// Class `i` nominally holds chunks of usable size `2*word*(i+2)`. Each list is a
    /// singly-linked `fd` chase with cycle protection.
    ///
    /// # Errors
    /// Fails when the arena itself cannot be located.
    pub fn fastbins(&self) -> Result<BTreeMap<usize, Vec<ChunkHeader>>> {
        let arena = self.arena()?;
        let mut out = BTreeMap::new();
        for (class, &head) in arena.fastbin_heads.iter().enumerate() {
            let list = self.chase_forward(head, 0);
            if !list.is_empty() {
                out.insert(class, list);
            }
        }
        Ok(out)
    }

    /// All non-empty tcache lists, keyed by size class.
    ///
    /// Class `i` holds chunks of usable size `4*word + i*0x10`. Entry pointers
    /// reference user data, so each header is materialized two words lower.
    ///
    /// # Errors
    /// Returns [`crate::Error::HeapUnmapped`] before the target's first allocation.
    pub fn tcache_chunks(&self) -> Result<BTreeMap<usize, Vec<ChunkHeader>>> {
        let Some(tcache) = self.tcache()? else {
            return Ok(BTreeMap::new());
        };
        let back = 2 * self.word();
        let mut out = BTreeMap::new();
        for (class, &entry) in tcache.entries.iter().enumerate() {
            let list = self.chase_forward(entry, back);
            if !list.is_empty() {
                out.insert(class, list);
            }
        }
        Ok(out)
    }

    /// Non-empty circular doubly-linked bins in `indices`, keyed by bin index.
    ///
    /// Index 0 is the unsorted bin, `1..=62` are small bins, `63..=126` large bins.
    /// `window` is the per-chunk read size; large bins need the six-word window to
    /// cover their nextsize links.
    ///
    /// # Errors
    /// Fails when the arena cannot be located or an index is out of range.
    pub fn bins(
        &self,
        indices: Range<usize>,
        window: usize,
    ) -> Result<BTreeMap<usize, Vec<ChunkHeader>>> {
        let arena_addr = self.arena_addr()?;
        let w = self.word();
        let mut out = BTreeMap::new();
        for index in indices {
            let head =
                arena_addr + self.arena_schema.offset_of("bins", index * 2)? as u64 - 2 * w;
            let list = self.chase_backward(head, window);
            if !list.is_empty() {
                out.insert(index, list);
            }
        }
        Ok(out)
    }

    /// Chunks on the unsorted bin.
    ///
    /// # Errors
    /// Fails when the arena cannot be located.
    pub fn unsorted_bins(&self) -> Result<Vec<ChunkHeader>> {
        let w = self.word() as usize;
        Ok(self
            .bins(glibc::UNSORTED_BIN..glibc::UNSORTED_BIN + 1, 4 * w)?
            .remove(&glibc::UNSORTED_BIN)
            .unwrap_or_default())
    }

    /// All non-empty small bins.
    ///
    /// # Errors
    /// Fails when the arena cannot be located.
    pub fn small_bins(&self) -> Result<BTreeMap<usize, Vec<ChunkHeader>>> {
        let w = self.word() as usize;
        self.bins(glibc::FIRST_SMALL_BIN..glibc::FIRST_LARGE_BIN, 4 * w)
    }

    /// All non-empty large bins, read with the wider six-word window.
    ///
    /// # Errors
    /// Fails when the arena cannot be located.
    pub fn large_bins(&self) -> Result<BTreeMap<usize, Vec<ChunkHeader>>> {
        let w = self.word() as usize;
        self.bins(glibc::FIRST_LARGE_BIN..glibc::BIN_COUNT, 6 * w)
    }

    /// Freeze the complete heap state into an immutable [`HeapSnapshot`].
    ///
    /// Arena, tcache, the linear chunk list and all bin collections are evaluated in
    /// sequence against the live target; nothing is paused, so fields read later may
    /// be inconsistent with fields read earlier if the target allocates mid-capture.
    /// That imprecision is inherent to lock-free observation, not a defect of the
    /// snapshot.
    ///
    /// # Errors
    /// Fails when the arena cannot be located or the heap is not mapped yet.
    pub fn capture(&self) -> Result<HeapSnapshot> {
        let regions = self.space.regions()?;
        let exe = self.space.exe();
        let ranges = ProcessRanges::from_regions(&regions, &exe);
        let bases = ProcessBases::from_regions(&regions, &exe);
        let libc_path = regions
            .iter()
            .find(|r| RegionKind::classify(&r.name, &exe) == RegionKind::Libc)
            .map(|r| r.name.clone());

        Ok(HeapSnapshot {
            pid: self.space.pid(),
            exe,
            libc_path,
            arch: self.profile.arch,
            version: self.profile.version,
            tcache_enabled: self.profile.tcache_enabled,
            libc_base: bases.get(&RegionKind::Libc).unwrap_or(0),
            heap_base: bases.get(&RegionKind::Heap).unwrap_or(0),
            arena: self.arena()?,
            tcache: self.tcache()?,
            heap_chunks: self.heap_chunks()?,
            fastbins: self.fastbins()?,
            tcache_chunks: self.tcache_chunks()?,
            unsorted_bins: self.unsorted_bins()?,
            small_bins: self.small_bins()?,
            large_bins: self.large_bins()?,
            ranges,
            bases,
        })
    }

    // Singly-linked fd chase with cycle protection. `back` shifts each visited
    // pointer down to the chunk header (tcache entries reference user data).
    fn chase_forward(&self, head: u64, back: u64) -> Vec<ChunkHeader> {
        let window = 4 * self.profile.arch.word();
        let mut visited = HashSet::new();
        let mut out = Vec::new();
        let mut ptr = head;
        while ptr != 0 {
            // sole corruption guard: a repeated address means the list loops
            if !visited.insert(ptr) {
                break;
            }
            let Ok(chunk) = self.chunk_at(ptr.wrapping_sub(back), window) else {
                break;
            };
            ptr = chunk.fd;
            out.push(chunk);
        }
        out
    }

    // Circular bk chase from a bin sentinel. Terminates on return to the head or,
    // defensively, on a null link or a repeated non-head address.
    fn chase_backward(&self, head: u64, window: usize) -> Vec<ChunkHeader> {
        let mut visited = HashSet::new();
        let mut out = Vec::new();
        let Ok(mut chunk) = self.chunk_at(head, window) else {
            return out;
        };
        while chunk.bk != head && chunk.bk != 0 {
            let ptr = chunk.bk;
            if !visited.insert(ptr) {
                break;
            }
            let Ok(next) = self.chunk_at(ptr, window) else {
                break;
            };
            chunk = next;
            out.push(chunk.clone());
        }
        out
    }
}

// Pure linear walk over one captured heap image. Kept free of the inspector so the
// same bytes always produce the same sequence.
fn walk_heap(schema: &StructSchema, mem: &[u8], base: u64) -> Result<Vec<ChunkHeader>> {
    let arch = schema.arch();
    let w = arch.word() as u64;
    let align = arch.chunk_align();
    let len = mem.len() as u64;
    let mut out = Vec::new();
    let mut pos = 0u64;
    while pos < len {
        let usable = word_at(mem, pos + w, arch.word()) & !SIZE_FLAG_MASK;
        if usable == 0 {
            // alignment pad (leading pad on some 32-bit heaps reads as a zero probe)
            pos += 2 * w;
            continue;
        }
        // saturating arithmetic: a corrupted giant size must end the walk, not wrap
        let block_end = pos.saturating_add(usable).min(len) as usize;
        let view = schema.bind(&mem[pos as usize..block_end], base + pos);
        out.push(ChunkHeader::from_view(&view)?);
        if usable < 2 * w {
            break; // malformed or top-adjacent header ends the walk
        }
        pos = pos.saturating_add(usable) & !(align - 1);
    }
    Ok(out)
}

// Little-endian word at `offset`, zero-filled past the end of the buffer.
fn word_at(mem: &[u8], offset: u64, width: usize) -> u64 {
    let mut value = 0u64;
    for i in 0..width {
        let index = offset as usize + i;
        if index < mem.len() {
            value |= u64::from(mem[index]) << (8 * i);
        }
    }
    value
}
