use crate::model::{chunk::ChunkHeader, snapshot::HeapSnapshot};

/// How one chunk address differs between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkChange {
    /// The address carries a chunk header in the new snapshot but not the old one
    New,
    /// The address carried a chunk header in the old snapshot but no longer does
    /// (typically absorbed by a neighbor or the top chunk)
    Merged,
    /// Same address, different size
    SizeChanged {
        /// The size field in the old snapshot
        old_size: u64,
    },
    /// Same address and size, different `prev_size`
    PrevSizeChanged {
        /// The `prev_size` field in the old snapshot
        old_prev_size: u64,
    },
    /// Same address, both `size` and `prev_size` changed
    HeaderChanged {
        /// The size field in the old snapshot
        old_size: u64,
        /// The `prev_size` field in the old snapshot
        old_prev_size: u64,
    },
}

/// The differences between two snapshots of the same heap.
///
/// Each entry pairs the affected chunk header (the new one, except for
/// [`ChunkChange::Merged`] where only the old header exists) with what changed.
/// Entries appear in address order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// The changed chunks, in address order
    pub chunks: Vec<(ChunkHeader, ChunkChange)>,
}

impl ChangeSet {
    /// Whether nothing changed between the two snapshots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Compare the linear chunk lists of two snapshots of the same heap.
///
/// Both lists are already in address order, so a single merge pass classifies every
/// address: present only in `old` is a merge, present only in `new` is an allocation
/// (or split), and a shared address is compared field by field. Comparing a snapshot
/// with itself yields an empty change set.
#[must_use]
pub fn diff(old: &HeapSnapshot, new: &HeapSnapshot) -> ChangeSet {
    diff_chunks(&old.heap_chunks, &new.heap_chunks)
}

fn diff_chunks(old: &[ChunkHeader], new: &[ChunkHeader]) -> ChangeSet {
    let mut changes = Vec::new();
    let mut i = 0;
    let mut j = 0;
    while i < old.len() && j < new.len() {
        let a = &old[i];
        let b = &new[j];
        if a.addr < b.addr {
            changes.push((a.clone(), ChunkChange::Merged));
            i += 1;
        } else if a.addr > b.addr {
            changes.push((b.clone(), ChunkChange::New));
            j += 1;
        } else {
            match (a.size != b.size, a.prev_size != b.prev_size) {
                (true, true) => changes.push((
                    b.clone(),
                    ChunkChange::HeaderChanged {
                        old_size: a.size,
                        old_prev_size: a.prev_size,
                    },
                )),
                (true, false) => {
                    changes.push((b.clone(), ChunkChange::SizeChanged { old_size: a.size }));
                }
                (false, true) => changes.push((
                    b.clone(),
                    ChunkChange::PrevSizeChanged {
                        old_prev_size: a.prev_size,
                    },
                )),
                (false, false) => {}
            }
            i += 1;
            j += 1;
        }
    }
    for a in &old[i..] {
        changes.push((a.clone(), ChunkChange::Merged));
    }
    for b in &new[j..] {
        changes.push((b.clone(), ChunkChange::New));
    }
    ChangeSet { chunks: changes }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(addr: u64, prev_size: u64, size: u64) -> ChunkHeader {
        ChunkHeader {
            addr,
            prev_size,
            size,
            fd: 0,
            bk: 0,
            fd_nextsize: 0,
            bk_nextsize: 0,
        }
    }

    #[test]
    fn identical_lists_produce_no_changes() {
        let chunks = vec![chunk(0x1000, 0, 0x21), chunk(0x1020, 0, 0x31)];
        assert!(diff_chunks(&chunks, &chunks).is_empty());
    }

    #[test]
    fn allocation_appears_as_new() {
        let old = vec![chunk(0x1000, 0, 0x21)];
        let new = vec![chunk(0x1000, 0, 0x21), chunk(0x1020, 0, 0x31)];
        let changes = diff_chunks(&old, &new).chunks;
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].0.addr, 0x1020);
        assert_eq!(changes[0].1, ChunkChange::New);
    }

    #[test]
    fn absorbed_chunk_appears_as_merged() {
        let old = vec![chunk(0x1000, 0, 0x21), chunk(0x1020, 0, 0x31)];
        let new = vec![chunk(0x1000, 0, 0x51)];
        let changes = diff_chunks(&old, &new).chunks;
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].1, ChunkChange::SizeChanged { old_size: 0x21 });
        assert_eq!(changes[1].0.addr, 0x1020);
        assert_eq!(changes[1].1, ChunkChange::Merged);
    }

    #[test]
    fn header_field_changes_are_distinguished() {
        let old = vec![chunk(0x1000, 0, 0x20), chunk(0x2000, 0, 0x40)];
        let new = vec![chunk(0x1000, 0x10, 0x20), chunk(0x2000, 0x10, 0x50)];
        let changes = diff_chunks(&old, &new).chunks;
        assert_eq!(
            changes[0].1,
            ChunkChange::PrevSizeChanged { old_prev_size: 0 }
        );
        assert_eq!(
            changes[1].1,
            ChunkChange::HeaderChanged {
                old_size: 0x40,
                old_prev_size: 0
            }
        );
    }

    #[test]
    fn disjoint_tails_flush_in_order() {
        let old = vec![chunk(0x3000, 0, 0x20)];
        let new = vec![chunk(0x1000, 0, 0x20)];
        let changes = diff_chunks(&old, &new).chunks;
        assert_eq!(changes[0].1, ChunkChange::New);
        assert_eq!(changes[1].1, ChunkChange::Merged);
    }
}
