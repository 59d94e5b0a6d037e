use std::fmt;

use crate::model::{chunk::ChunkHeader, snapshot::HeapSnapshot};

/// One integrity violation found while auditing a snapshot.
///
/// Findings are observations, not verdicts: a racing target can produce transient
/// inconsistencies that look identical to deliberate corruption, so callers decide
/// what a finding means in their context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finding {
    /// A chunk header sits at an address the allocator could never have produced
    ChunkMisaligned {
        /// The misaligned header address
        addr: u64,
    },
    /// A fastbin link points outside the heap
    FastbinOutsideHeap {
        /// Fastbin size class
        class: usize,
        /// The offending header address
        addr: u64,
    },
    /// A fastbin holds a chunk whose size does not match its class
    FastbinSizeMismatch {
        /// Fastbin size class
        class: usize,
        /// The offending header address
        addr: u64,
        /// Usable size the class requires
        expect: u64,
        /// Usable size actually found
        actual: u64,
    },
    /// A tcache link points outside the heap
    TcacheOutsideHeap {
        /// Tcache size class
        class: usize,
        /// The offending header address
        addr: u64,
    },
    /// A tcache list holds a chunk whose size does not match its class
    TcacheSizeMismatch {
        /// Tcache size class
        class: usize,
        /// The offending header address
        addr: u64,
        /// Usable size the class requires
        expect: u64,
        /// Usable size actually found
        actual: u64,
    },
    /// A doubly-linked bin entry sits outside the heap
    BinOutsideHeap {
        /// Bin index (0 unsorted, 1..=62 small, 63..=126 large)
        index: usize,
        /// The offending header address
        addr: u64,
    },
    /// A doubly-linked bin entry's `fd` does not point back where it should
    BinLinkBroken {
        /// Bin index
        index: usize,
        /// The header whose forward link is wrong
        addr: u64,
    },
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Finding::ChunkMisaligned { addr } => {
                write!(f, "chunk at {addr:#x} is misaligned")
            }
            Finding::FastbinOutsideHeap { class, addr } => {
                write!(f, "fastbin[{class}] entry {addr:#x} lies outside the heap")
            }
            Finding::FastbinSizeMismatch {
                class,
                addr,
                expect,
                actual,
            } => write!(
                f,
                "fastbin[{class}] entry {addr:#x} has size {actual:#x}, class requires {expect:#x}"
            ),
            Finding::TcacheOutsideHeap { class, addr } => {
                write!(f, "tcache[{class}] entry {addr:#x} lies outside the heap")
            }
            Finding::TcacheSizeMismatch {
                class,
                addr,
                expect,
                actual,
            } => write!(
                f,
                "tcache[{class}] entry {addr:#x} has size {actual:#x}, class requires {expect:#x}"
            ),
            Finding::BinOutsideHeap { index, addr } => {
                write!(f, "bin[{index}] entry {addr:#x} lies outside the heap")
            }
            Finding::BinLinkBroken { index, addr } => {
                write!(f, "bin[{index}] entry {addr:#x} has a broken forward link")
            }
        }
    }
}

/// Audit a snapshot for the inconsistencies heap-corruption exploits leave behind.
///
/// Checks performed:
/// - every recorded chunk header is aligned to the allocator's chunk alignment
/// - fastbin and tcache entries lie inside the heap and match their size class
/// - doubly-linked bin entries lie inside the heap and keep `fd`/`bk` reciprocity
///   back to the bin's sentinel in the arena
#[must_use]
pub fn audit(snapshot: &HeapSnapshot) -> Vec<Finding> {
    let w = snapshot.arch.word() as u64;
    let align = snapshot.arch.chunk_align();
    let mut findings = Vec::new();

    let all_lists = snapshot
        .heap_chunks
        .iter()
        .chain(snapshot.fastbins.values().flatten())
        .chain(snapshot.tcache_chunks.values().flatten())
        .chain(snapshot.unsorted_bins.iter())
        .chain(snapshot.small_bins.values().flatten())
        .chain(snapshot.large_bins.values().flatten());
    for chunk in all_lists {
        if chunk.addr % align != 0 {
            findings.push(Finding::ChunkMisaligned { addr: chunk.addr });
        }
    }

    for (&class, list) in &snapshot.fastbins {
        let expect = 2 * w * (class as u64 + 2);
        for chunk in list {
            if !snapshot.in_heap(chunk.addr) {
                findings.push(Finding::FastbinOutsideHeap {
                    class,
                    addr: chunk.addr,
                });
            }
            if chunk.usable_size() != expect {
                findings.push(Finding::FastbinSizeMismatch {
                    class,
                    addr: chunk.addr,
                    expect,
                    actual: chunk.usable_size(),
                });
            }
        }
    }

    for (&class, list) in &snapshot.tcache_chunks {
        let expect = 4 * w + 0x10 * class as u64;
        for chunk in list {
            if !snapshot.in_heap(chunk.addr) {
                findings.push(Finding::TcacheOutsideHeap {
                    class,
                    addr: chunk.addr,
                });
            }
            if chunk.usable_size() != expect {
                findings.push(Finding::TcacheSizeMismatch {
                    class,
                    addr: chunk.addr,
                    expect,
                    actual: chunk.usable_size(),
                });
            }
        }
    }

    audit_bin(snapshot, 0, &snapshot.unsorted_bins, &mut findings);
    for (&index, list) in &snapshot.small_bins {
        audit_bin(snapshot, index, list, &mut findings);
    }
    for (&index, list) in &snapshot.large_bins {
        audit_bin(snapshot, index, list, &mut findings);
    }

    findings
}

// A consistent circular bin satisfies, walking `bk`-wards from the sentinel:
// the first chunk's `fd` points at the sentinel, each later chunk's `fd` points at
// its predecessor, and the final chunk's `bk` closes the ring.
fn audit_bin(
    snapshot: &HeapSnapshot,
    index: usize,
    list: &[ChunkHeader],
    findings: &mut Vec<Finding>,
) {
    let w = snapshot.arch.word() as u64;
    let sentinel = snapshot.arena.bin_sentinel(index, w);
    let mut expected_fd = sentinel;
    for chunk in list {
        if !snapshot.in_heap(chunk.addr) {
            findings.push(Finding::BinOutsideHeap {
                index,
                addr: chunk.addr,
            });
        }
        if chunk.fd != expected_fd {
            findings.push(Finding::BinLinkBroken {
                index,
                addr: chunk.addr,
            });
        }
        expected_fd = chunk.addr;
    }
    if let Some(last) = list.last() {
        if last.bk != sentinel {
            findings.push(Finding::BinLinkBroken {
                index,
                addr: last.addr,
            });
        }
    }
}
