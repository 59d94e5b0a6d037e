use bitflags::bitflags;

use crate::{layout::StructView, Result};

/// Mask selecting the allocator flag bits stored in a chunk's `size` field.
pub const SIZE_FLAG_MASK: u64 = 0b111;

bitflags! {
    /// The three allocator flags packed into the low bits of `malloc_chunk.size`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ChunkFlags: u64 {
        /// The previous chunk is in use (its `prev_size` is unusable)
        const PREV_INUSE = 0b001;
        /// The chunk was allocated through `mmap`
        const IS_MMAPPED = 0b010;
        /// The chunk belongs to a non-main arena
        const NON_MAIN_ARENA = 0b100;
    }
}

/// A decoded `malloc_chunk` header at a known address.
///
/// All fields are word-width values of the target; on 32-bit targets they are
/// zero-extended. The flag bits remain inside `size`; use
/// [`ChunkHeader::usable_size`] and [`ChunkHeader::flags`] to split them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Address of the chunk header in the target
    pub addr: u64,
    /// Size of the previous chunk, valid only when `PREV_INUSE` is clear
    pub prev_size: u64,
    /// Chunk size with the flag bits still set
    pub size: u64,
    /// Forward link (free chunks only; user data otherwise)
    pub fd: u64,
    /// Backward link (free chunks only; user data otherwise)
    pub bk: u64,
    /// Next-size forward link, maintained for large-bin chunks only
    pub fd_nextsize: u64,
    /// Next-size backward link, maintained for large-bin chunks only
    pub bk_nextsize: u64,
}

impl ChunkHeader {
    /// Decode a header from a bound chunk-schema view.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnknownField`] if `view` was not bound through the
    /// chunk schema; that is a programming-contract violation, not target corruption.
    pub fn from_view(view: &StructView<'_>) -> Result<Self> {
        Ok(ChunkHeader {
            addr: view.base(),
            prev_size: view.get_word("prev_size")?,
            size: view.get_word("size")?,
            fd: view.get_word("fd")?,
            bk: view.get_word("bk")?,
            fd_nextsize: view.get_word("fd_nextsize")?,
            bk_nextsize: view.get_word("bk_nextsize")?,
        })
    }

    /// Chunk size with the flag bits masked off.
    #[must_use]
    pub fn usable_size(&self) -> u64 {
        self.size & !SIZE_FLAG_MASK
    }

    /// The allocator flag bits of this chunk.
    #[must_use]
    pub fn flags(&self) -> ChunkFlags {
        ChunkFlags::from_bits_truncate(self.size & SIZE_FLAG_MASK)
    }

    /// Whether the previous chunk is in use.
    #[must_use]
    pub fn prev_inuse(&self) -> bool {
        self.flags().contains(ChunkFlags::PREV_INUSE)
    }

    /// Whether the chunk came from `mmap`.
    #[must_use]
    pub fn is_mmapped(&self) -> bool {
        self.flags().contains(ChunkFlags::IS_MMAPPED)
    }

    /// Whether the chunk belongs to a non-main arena.
    #[must_use]
    pub fn non_main_arena(&self) -> bool {
        self.flags().contains(ChunkFlags::NON_MAIN_ARENA)
    }
}
