use crate::{layout::StructView, Result};

/// A decoded `malloc_state` (the main arena) at one instant.
///
/// Plain values only; nothing here keeps the source buffer or the target alive, so an
/// `ArenaState` can be frozen into a snapshot as-is. Field names follow the glibc
/// source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArenaState {
    /// Address of `main_arena` in the target
    pub addr: u64,
    /// Address of `bins[0]`, kept so bin sentinel addresses can be reconstructed
    /// (`sentinel(i) = bins_addr + 2*i*word - 2*word`)
    pub bins_addr: u64,
    /// The arena serialization lock word
    pub mutex: u64,
    /// Arena flags
    pub flags: u64,
    /// `have_fastchunks`, present only on 2.27+ layouts
    pub have_fastchunks: Option<u64>,
    /// Fastbin head pointers (10 or 11 slots depending on the layout variant)
    pub fastbin_heads: Vec<u64>,
    /// The top (wilderness) chunk
    pub top: u64,
    /// Remainder of the most recent small-request split
    pub last_remainder: u64,
    /// The 254 bin list-head slots (127 doubly-linked bins)
    pub bins: Vec<u64>,
    /// Bitmap of bins known to be non-empty
    pub binmap: Vec<u64>,
    /// Next arena in the circular arena list
    pub next: u64,
    /// Next free arena
    pub next_free: u64,
    /// Threads attached to this arena
    pub attached_threads: u64,
    /// Memory obtained from the system for this arena
    pub system_mem: u64,
    /// High-water mark of `system_mem`
    pub max_system_mem: u64,
}

impl ArenaState {
    /// Decode an arena from a bound `malloc_state` view.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnknownField`] only if `view` was bound through a
    /// schema that is not a `malloc_state` variant.
    pub fn from_view(view: &StructView<'_>) -> Result<Self> {
        let have_fastchunks = match view.get_word("have_fastchunks") {
            Ok(value) => Some(value),
            Err(_) => None, // pre-2.27 layouts do not carry the field
        };
        Ok(ArenaState {
            addr: view.base(),
            bins_addr: view.address_of("bins", 0)?,
            mutex: view.get_word("mutex")?,
            flags: view.get_word("flags")?,
            have_fastchunks,
            fastbin_heads: view.get_words("fastbinsY")?,
            top: view.get_word("top")?,
            last_remainder: view.get_word("last_remainder")?,
            bins: view.get_words("bins")?,
            binmap: view.get_words("binmap")?,
            next: view.get_word("next")?,
            next_free: view.get_word("next_free")?,
            attached_threads: view.get_word("attached_threads")?,
            system_mem: view.get_word("system_mem")?,
            max_system_mem: view.get_word("max_system_mem")?,
        })
    }

    /// Address of the sentinel "chunk" embedded in the arena for bin `index`.
    ///
    /// The sentinel sits two words before `bins[2*index]`, so its `fd`/`bk` slots
    /// alias the two bin head pointers.
    #[must_use]
    pub fn bin_sentinel(&self, index: usize, word: u64) -> u64 {
        self.bins_addr + 2 * index as u64 * word - 2 * word
    }
}

/// A decoded `tcache_perthread_struct` at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcacheState {
    /// Address of the structure in the target (inside the heap)
    pub addr: u64,
    /// Per-class entry counts, one byte per size class
    pub counts: Vec<u8>,
    /// Per-class head pointers, referencing the *user data* of the most recently
    /// freed chunk of that class (`chunk address + 2*word`)
    pub entries: Vec<u64>,
}

impl TcacheState {
    /// Decode a tcache from a bound `tcache_perthread_struct` view.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnknownField`] only if `view` was bound through the
    /// wrong schema.
    pub fn from_view(view: &StructView<'_>) -> Result<Self> {
        Ok(TcacheState {
            addr: view.base(),
            counts: view.get_bytes("counts")?,
            entries: view.get_words("entries")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        layout::glibc::{arena_schema, tcache_schema},
        profile::{Arch, LibcVersion},
    };

    #[test]
    fn arena_decode_new_layout() {
        let schema = arena_schema(Some(LibcVersion::new(2, 27)), Arch::Bits64);
        let mut bytes = vec![0u8; schema.size_of()];
        let top_off = schema.offset_of("top", 0).unwrap();
        bytes[top_off] = 0x60;
        bytes[top_off + 1] = 0x54;
        let arena = ArenaState::from_view(&schema.bind(&bytes, 0x7f0000)).unwrap();
        assert_eq!(arena.top, 0x5460);
        assert_eq!(arena.have_fastchunks, Some(0));
        assert_eq!(arena.fastbin_heads.len(), 10);
        assert_eq!(arena.bins.len(), 254);
    }

    #[test]
    fn arena_decode_old_layout_has_no_have_fastchunks() {
        let schema = arena_schema(Some(LibcVersion::new(2, 23)), Arch::Bits64);
        let bytes = vec![0u8; schema.size_of()];
        let arena = ArenaState::from_view(&schema.bind(&bytes, 0x7f0000)).unwrap();
        assert_eq!(arena.have_fastchunks, None);
    }

    #[test]
    fn bin_sentinel_sits_two_words_before_its_slot() {
        let schema = arena_schema(Some(LibcVersion::new(2, 27)), Arch::Bits64);
        let bytes = vec![0u8; schema.size_of()];
        let arena = ArenaState::from_view(&schema.bind(&bytes, 0x7f0000)).unwrap();
        let bins_off = schema.offset_of("bins", 0).unwrap() as u64;
        assert_eq!(arena.bin_sentinel(0, 8), 0x7f0000 + bins_off - 16);
        assert_eq!(arena.bin_sentinel(1, 8), 0x7f0000 + bins_off + 16 - 16);
    }

    #[test]
    fn tcache_decode() {
        let schema = tcache_schema(Arch::Bits64);
        let mut bytes = vec![0u8; schema.size_of()];
        bytes[0] = 2; // counts[0]
        let entry_off = schema.offset_of("entries", 0).unwrap();
        bytes[entry_off] = 0x90;
        let tcache = TcacheState::from_view(&schema.bind(&bytes, 0x5000)).unwrap();
        assert_eq!(tcache.counts[0], 2);
        assert_eq!(tcache.entries[0], 0x90);
        assert_eq!(tcache.entries.len(), 64);
    }
}
