//! Version- and architecture-dependent glibc allocator layouts.
//!
//! glibc's `malloc_state` changed shape across releases: 2.26 widened the 32-bit
//! `fastbinsY` array to 11 slots, and 2.27 added the `have_fastchunks` flag (with an
//! extra padding int on 64-bit). This module holds the four supported `malloc_state`
//! variants plus the stable `malloc_chunk` and `tcache_perthread_struct` layouts, and
//! selects the right variant for a `(version, arch)` pair through a range-keyed table.
//! Supporting a new allocator version is adding one table row.
//!
//! Field names deliberately match the glibc source (`fastbinsY`, `last_remainder`,
//! `next_free`, ...) so that output lines up with what an analyst sees in the
//! allocator's own code.

use crate::{
    layout::{FieldDef, FieldKind, StructSchema},
    profile::{Arch, LibcVersion, VersionRange},
};

/// Number of bin list-head slots in `malloc_state.bins` (127 doubly-linked bins).
pub const BIN_SLOTS: usize = 254;

/// Index of the unsorted bin in the 127-bin table.
pub const UNSORTED_BIN: usize = 0;

/// First small bin index (small bins span `1..=62`).
pub const FIRST_SMALL_BIN: usize = 1;

/// First large bin index (large bins span `63..=126`).
pub const FIRST_LARGE_BIN: usize = 63;

/// One past the last bin index.
pub const BIN_COUNT: usize = 127;

/// Number of tcache size classes.
pub const TCACHE_CLASSES: usize = 64;

/// The four supported `malloc_state` shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArenaVariant {
    /// 2.19–2.26 64-bit, 2.19–2.25 32-bit: no `have_fastchunks`, `fastbinsY[10]`
    Old,
    /// 2.26 32-bit only: `fastbinsY[11]`, still no `have_fastchunks`
    Fastbins11,
    /// 2.27+ 64-bit: `have_fastchunks` + alignment padding, `fastbinsY[10]`
    New64,
    /// 2.27+ 32-bit: `have_fastchunks`, `fastbinsY[11]`, no extra padding
    New32,
}

/// Variant selection rows, first match wins. `None` for the arch matches both.
const ARENA_VARIANTS: &[(VersionRange, Option<Arch>, ArenaVariant)] = &[
    (
        VersionRange::between(LibcVersion::new(2, 26), LibcVersion::new(2, 26)),
        Some(Arch::Bits32),
        ArenaVariant::Fastbins11,
    ),
    (
        VersionRange::at_least(LibcVersion::new(2, 27)),
        Some(Arch::Bits64),
        ArenaVariant::New64,
    ),
    (
        VersionRange::at_least(LibcVersion::new(2, 27)),
        Some(Arch::Bits32),
        ArenaVariant::New32,
    ),
];

fn arena_fields(variant: ArenaVariant) -> Vec<FieldDef> {
    let mut fields = vec![
        FieldDef::scalar(FieldKind::Int32, "mutex"),
        FieldDef::scalar(FieldKind::Int32, "flags"),
    ];
    match variant {
        ArenaVariant::Old => {
            fields.push(FieldDef::array(FieldKind::Ptr, "fastbinsY", 10));
        }
        ArenaVariant::Fastbins11 => {
            fields.push(FieldDef::array(FieldKind::Ptr, "fastbinsY", 11));
        }
        ArenaVariant::New64 => {
            fields.push(FieldDef::scalar(FieldKind::Int32, "have_fastchunks"));
            fields.push(FieldDef::scalar(FieldKind::Int32, "align"));
            fields.push(FieldDef::array(FieldKind::Ptr, "fastbinsY", 10));
        }
        ArenaVariant::New32 => {
            fields.push(FieldDef::scalar(FieldKind::Int32, "have_fastchunks"));
            fields.push(FieldDef::array(FieldKind::Ptr, "fastbinsY", 11));
        }
    }
    fields.extend([
        FieldDef::scalar(FieldKind::Ptr, "top"),
        FieldDef::scalar(FieldKind::Ptr, "last_remainder"),
        FieldDef::array(FieldKind::Ptr, "bins", BIN_SLOTS),
        FieldDef::array(FieldKind::Int32, "binmap", 4),
        FieldDef::scalar(FieldKind::Ptr, "next"),
        FieldDef::scalar(FieldKind::Ptr, "next_free"),
        FieldDef::scalar(FieldKind::Word, "attached_threads"),
        FieldDef::scalar(FieldKind::Word, "system_mem"),
        FieldDef::scalar(FieldKind::Word, "max_system_mem"),
    ]);
    fields
}

/// The `malloc_state` schema for a `(version, arch)` pair.
///
/// A missing version selects the oldest variant, the documented fallback when the libc
/// image carries no version banner. Versions at or above 2.27 resolve to the nearest
/// known (2.27+) shape.
#[must_use]
pub fn arena_schema(version: Option<LibcVersion>, arch: Arch) -> StructSchema {
    let variant = version
        .and_then(|v| {
            ARENA_VARIANTS
                .iter()
                .find(|(range, only_arch, _)| {
                    range.contains(v) && only_arch.map_or(true, |a| a == arch)
                })
                .map(|(_, _, variant)| *variant)
        })
        .unwrap_or(ArenaVariant::Old);
    StructSchema::new(arch, arena_fields(variant))
}

/// The `malloc_chunk` header schema, stable across all supported versions.
#[must_use]
pub fn chunk_schema(arch: Arch) -> StructSchema {
    StructSchema::new(
        arch,
        vec![
            FieldDef::scalar(FieldKind::Word, "prev_size"),
            FieldDef::scalar(FieldKind::Word, "size"),
            FieldDef::scalar(FieldKind::Ptr, "fd"),
            FieldDef::scalar(FieldKind::Ptr, "bk"),
            FieldDef::scalar(FieldKind::Ptr, "fd_nextsize"),
            FieldDef::scalar(FieldKind::Ptr, "bk_nextsize"),
        ],
    )
}

/// The `tcache_perthread_struct` schema: one count byte and one entry pointer per
/// size class.
#[must_use]
pub fn tcache_schema(arch: Arch) -> StructSchema {
    StructSchema::new(
        arch,
        vec![
            FieldDef::array(FieldKind::Char, "counts", TCACHE_CLASSES),
            FieldDef::array(FieldKind::Ptr, "entries", TCACHE_CLASSES),
        ],
    )
}
