//! End-to-end traversal tests against a synthetic in-memory target.
//!
//! The fake address space below plays the role a live process normally does: a libc
//! segment holding a crafted `main_arena` and a `[heap]` segment holding crafted
//! chunks. Everything the engine decodes here goes through the same code paths a
//! `/proc`-backed inspection uses.

use heapscope::{
    layout::glibc,
    model::{audit, diff, HeapInspector},
    prelude::*,
    profile::{AllocatorProfile, Arch, LibcVersion},
};

const LIBC_BASE: u64 = 0x7f00_0000_0000;
const ARENA_OFFSET: u64 = 0x1000;
const HEAP_BASE: u64 = 0x60_2000;
const HEAP_END: u64 = 0x62_3000;

struct FakeSpace {
    regions: Vec<MemoryRegion>,
    segments: Vec<(u64, Vec<u8>)>,
}

impl AddressSpace for FakeSpace {
    fn read(&self, addr: u64, len: usize) -> Vec<u8> {
        for (start, bytes) in &self.segments {
            let end = start + bytes.len() as u64;
            if addr >= *start && addr < end {
                let offset = (addr - start) as usize;
                let take = len.min(bytes.len() - offset);
                return bytes[offset..offset + take].to_vec();
            }
        }
        Vec::new()
    }

    fn regions(&self) -> Result<Vec<MemoryRegion>> {
        Ok(self.regions.clone())
    }

    fn exe(&self) -> String {
        "/usr/bin/target".to_string()
    }
}

fn put_word(bytes: &mut [u8], offset: u64, value: u64) {
    let offset = offset as usize;
    bytes[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

fn profile() -> AllocatorProfile {
    AllocatorProfile {
        arch: Arch::Bits64,
        version: Some(LibcVersion::new(2, 27)),
        tcache_enabled: true,
        main_arena_offset: ARENA_OFFSET,
    }
}

struct Target {
    libc: Vec<u8>,
    heap: Vec<u8>,
}

impl Target {
    /// A fresh 2.27-style target: tcache chunk first, then an exhausting top chunk.
    fn new() -> Self {
        let schema = glibc::arena_schema(Some(LibcVersion::new(2, 27)), Arch::Bits64);
        let mut libc = vec![0u8; (ARENA_OFFSET as usize) + schema.size_of()];
        let mut heap = vec![0u8; (HEAP_END - HEAP_BASE) as usize];

        // the tcache lives in the heap's first chunk, 0x240 bytes of payload
        put_word(&mut heap, 0x8, 0x251);
        // top chunk fills the rest of the region
        let top = HEAP_BASE + 0x250;
        put_word(&mut heap, 0x258, (HEAP_END - top) | 1);

        let top_off = schema.offset_of("top", 0).unwrap() as u64;
        put_word(&mut libc, ARENA_OFFSET + top_off, top);

        // empty bins point at their own sentinels, as malloc_init_state leaves them
        let bins_off = schema.offset_of("bins", 0).unwrap() as u64;
        for index in 0..glibc::BIN_COUNT as u64 {
            let sentinel = LIBC_BASE + ARENA_OFFSET + bins_off + 2 * index * 8 - 0x10;
            put_word(&mut libc, ARENA_OFFSET + bins_off + 2 * index * 8, sentinel);
            put_word(&mut libc, ARENA_OFFSET + bins_off + (2 * index + 1) * 8, sentinel);
        }

        Target { libc, heap }
    }

    fn arena_addr(&self) -> u64 {
        LIBC_BASE + ARENA_OFFSET
    }

    fn bins_offset(&self) -> u64 {
        let schema = glibc::arena_schema(Some(LibcVersion::new(2, 27)), Arch::Bits64);
        schema.offset_of("bins", 0).unwrap() as u64
    }

    fn fastbins_offset(&self, class: usize) -> u64 {
        let schema = glibc::arena_schema(Some(LibcVersion::new(2, 27)), Arch::Bits64);
        schema.offset_of("fastbinsY", class).unwrap() as u64
    }

    /// Sentinel address of doubly-linked bin `index`, as the allocator lays it out.
    fn sentinel(&self, index: u64) -> u64 {
        self.arena_addr() + self.bins_offset() + 2 * index * 8 - 0x10
    }

    /// Carve a free chunk into the heap and link it onto the unsorted bin alone.
    fn free_on_unsorted(&mut self, heap_offset: u64, size: u64) {
        let addr = HEAP_BASE + heap_offset;
        let sentinel = self.sentinel(0);
        let bins = self.bins_offset();
        put_word(&mut self.heap, heap_offset + 0x8, size);
        put_word(&mut self.heap, heap_offset + 0x10, sentinel); // fd
        put_word(&mut self.heap, heap_offset + 0x18, sentinel); // bk
        put_word(&mut self.libc, ARENA_OFFSET + bins, addr);
        put_word(&mut self.libc, ARENA_OFFSET + bins + 8, addr);
    }

    fn space(self) -> FakeSpace {
        FakeSpace {
            regions: vec![
                MemoryRegion {
                    start: 0x40_0000,
                    end: 0x40_b000,
                    perms: "r-xp".to_string(),
                    name: "/usr/bin/target".to_string(),
                },
                MemoryRegion {
                    start: HEAP_BASE,
                    end: HEAP_END,
                    perms: "rw-p".to_string(),
                    name: "[heap]".to_string(),
                },
                MemoryRegion {
                    start: LIBC_BASE,
                    end: LIBC_BASE + self.libc.len() as u64,
                    perms: "r-xp".to_string(),
                    name: "/lib/x86_64-linux-gnu/libc-2.27.so".to_string(),
                },
            ],
            segments: vec![(HEAP_BASE, self.heap), (LIBC_BASE, self.libc)],
        }
    }
}

#[test]
fn linear_walk_sees_every_chunk_up_to_the_top() {
    let mut target = Target::new();
    // split the top: a 0x30 free chunk, then the new top
    target.free_on_unsorted(0x250, 0x31);
    let top = HEAP_BASE + 0x280;
    put_word(&mut target.heap, 0x288, (HEAP_END - top) | 1);
    put_word(
        &mut target.libc,
        ARENA_OFFSET
            + glibc::arena_schema(Some(LibcVersion::new(2, 27)), Arch::Bits64)
                .offset_of("top", 0)
                .unwrap() as u64,
        top,
    );

    let inspector = HeapInspector::with_space(target.space(), profile());
    let chunks = inspector.heap_chunks().unwrap();
    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks[0].addr, HEAP_BASE);
    assert_eq!(chunks[0].usable_size(), 0x250);
    assert_eq!(chunks[1].addr, HEAP_BASE + 0x250);
    assert_eq!(chunks[1].usable_size(), 0x30);
    assert_eq!(chunks[2].addr, top);
    assert_eq!(chunks[2].addr + chunks[2].usable_size(), HEAP_END);
}

#[test]
fn unsorted_bin_traversal_finds_the_freed_chunk() {
    let mut target = Target::new();
    target.free_on_unsorted(0x250, 0x31);
    let top = HEAP_BASE + 0x280;
    put_word(&mut target.heap, 0x288, (HEAP_END - top) | 1);
    let sentinel = target.sentinel(0);

    let inspector = HeapInspector::with_space(target.space(), profile());
    let unsorted = inspector.unsorted_bins().unwrap();
    assert_eq!(unsorted.len(), 1);
    assert_eq!(unsorted[0].addr, HEAP_BASE + 0x250);
    assert_eq!(unsorted[0].fd, sentinel);
    assert_eq!(unsorted[0].bk, sentinel);
}

#[test]
fn empty_bins_stay_absent() {
    let inspector = HeapInspector::with_space(Target::new().space(), profile());
    assert!(inspector.fastbins().unwrap().is_empty());
    assert!(inspector.small_bins().unwrap().is_empty());
    assert!(inspector.large_bins().unwrap().is_empty());
    assert!(inspector.unsorted_bins().unwrap().is_empty());
    assert!(inspector.tcache_chunks().unwrap().is_empty());
}

#[test]
fn fastbin_cycle_terminates() {
    let mut target = Target::new();
    let a = HEAP_BASE + 0x400;
    let b = HEAP_BASE + 0x500;
    put_word(&mut target.heap, 0x408, 0x21);
    put_word(&mut target.heap, 0x410, b); // a.fd -> b
    put_word(&mut target.heap, 0x508, 0x21);
    put_word(&mut target.heap, 0x510, a); // b.fd -> a, closing the loop
    let fb_off = target.fastbins_offset(0);
    put_word(&mut target.libc, ARENA_OFFSET + fb_off, a);

    let inspector = HeapInspector::with_space(target.space(), profile());
    let fastbins = inspector.fastbins().unwrap();
    let list = &fastbins[&0];
    // each address is visited exactly once, the loop never records a duplicate
    assert_eq!(list.len(), 2);
    assert_eq!(list[0].addr, a);
    assert_eq!(list[1].addr, b);
}

#[test]
fn bin_bk_cycle_terminates() {
    let mut target = Target::new();
    let a = HEAP_BASE + 0x400;
    let b = HEAP_BASE + 0x500;
    put_word(&mut target.heap, 0x408, 0x91);
    put_word(&mut target.heap, 0x418, b); // a.bk -> b
    put_word(&mut target.heap, 0x508, 0x91);
    put_word(&mut target.heap, 0x518, a); // b.bk -> a, never returning to the head
    let bins = target.bins_offset();
    put_word(&mut target.libc, ARENA_OFFSET + bins + 8, a);

    let inspector = HeapInspector::with_space(target.space(), profile());
    let unsorted = inspector.unsorted_bins().unwrap();
    assert_eq!(unsorted.len(), 2);
    assert_eq!(unsorted[0].addr, a);
    assert_eq!(unsorted[1].addr, b);
}

#[test]
fn tcache_base_probe_skips_the_leading_pad() {
    let mut target = Target::new();
    // zero probe word: the tcache starts four words into the heap
    put_word(&mut target.heap, 0x8, 0);
    let tcache_base = HEAP_BASE + 0x20;
    let chunk = HEAP_BASE + 0x400;
    put_word(&mut target.heap, 0x408, 0x21);
    target.heap[(tcache_base - HEAP_BASE) as usize] = 1; // counts[0]
    let schema = glibc::tcache_schema(Arch::Bits64);
    let entries_off = schema.offset_of("entries", 0).unwrap() as u64;
    put_word(
        &mut target.heap,
        tcache_base - HEAP_BASE + entries_off,
        chunk + 0x10, // entry points at user data
    );

    let inspector = HeapInspector::with_space(target.space(), profile());
    let tcache = inspector.tcache().unwrap().unwrap();
    assert_eq!(tcache.addr, tcache_base);
    assert_eq!(tcache.counts[0], 1);

    let lists = inspector.tcache_chunks().unwrap();
    assert_eq!(lists[&0].len(), 1);
    assert_eq!(lists[&0][0].addr, chunk);
    assert_eq!(lists[&0][0].usable_size(), 0x20);
}

#[test]
fn capture_freezes_identity_and_state() {
    let mut target = Target::new();
    target.free_on_unsorted(0x250, 0x31);
    let top = HEAP_BASE + 0x280;
    put_word(&mut target.heap, 0x288, (HEAP_END - top) | 1);

    let inspector = HeapInspector::with_space(target.space(), profile());
    let snapshot = inspector.capture().unwrap();
    assert_eq!(snapshot.pid, None);
    assert_eq!(snapshot.exe, "/usr/bin/target");
    assert_eq!(
        snapshot.libc_path.as_deref(),
        Some("/lib/x86_64-linux-gnu/libc-2.27.so")
    );
    assert_eq!(snapshot.arch, Arch::Bits64);
    assert_eq!(snapshot.version, Some(LibcVersion::new(2, 27)));
    assert_eq!(snapshot.libc_base, LIBC_BASE);
    assert_eq!(snapshot.heap_base, HEAP_BASE);
    assert_eq!(snapshot.heap_chunks.len(), 3);
    assert_eq!(snapshot.unsorted_bins.len(), 1);
    assert!(snapshot.tcache.is_some());
    assert_eq!(snapshot.top_chunk().unwrap().addr, top);
}

#[test]
fn diffing_a_snapshot_with_itself_is_empty() {
    let mut target = Target::new();
    target.free_on_unsorted(0x250, 0x31);
    let top = HEAP_BASE + 0x280;
    put_word(&mut target.heap, 0x288, (HEAP_END - top) | 1);

    let inspector = HeapInspector::with_space(target.space(), profile());
    let first = inspector.capture().unwrap();
    let second = inspector.capture().unwrap();
    assert_eq!(first, second);
    assert!(diff(&first, &second).is_empty());
}

#[test]
fn audit_passes_on_a_consistent_heap() {
    let mut target = Target::new();
    target.free_on_unsorted(0x250, 0x31);
    let top = HEAP_BASE + 0x280;
    put_word(&mut target.heap, 0x288, (HEAP_END - top) | 1);

    let inspector = HeapInspector::with_space(target.space(), profile());
    let snapshot = inspector.capture().unwrap();
    assert_eq!(audit(&snapshot), Vec::new());
}

#[test]
fn audit_flags_a_hijacked_fastbin_link() {
    let mut target = Target::new();
    let a = HEAP_BASE + 0x400;
    put_word(&mut target.heap, 0x408, 0x21);
    // fd points outside the heap, the classic fastbin-dup target
    put_word(&mut target.heap, 0x410, LIBC_BASE + 0x500);
    let fb_off = target.fastbins_offset(0);
    put_word(&mut target.libc, ARENA_OFFSET + fb_off, a);

    let inspector = HeapInspector::with_space(target.space(), profile());
    let snapshot = inspector.capture().unwrap();
    let findings = audit(&snapshot);
    assert!(findings
        .iter()
        .any(|f| matches!(f, Finding::FastbinOutsideHeap { class: 0, .. })));
}

#[test]
fn heap_unmapped_before_first_allocation() {
    let target = Target::new();
    let mut space = target.space();
    space.regions.retain(|r| r.name != "[heap]");
    space.segments.remove(0);

    let inspector = HeapInspector::with_space(space, profile());
    assert!(matches!(inspector.heap_chunks(), Err(Error::HeapUnmapped)));
    assert!(matches!(inspector.tcache(), Err(Error::HeapUnmapped)));
}
