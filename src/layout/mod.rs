//! Generic binary-layout engine for allocator control structures.
//!
//! This module maps named, typed fields onto byte offsets and materializes raw target
//! memory into queryable structured views. It is the foundation every other component
//! decodes through: the arena, chunk headers and the tcache are all read by binding one
//! of the schemas in [`crate::layout::glibc`] to a byte buffer captured from the target.
//!
//! # Architecture
//!
//! The engine is split into three layers:
//!
//! - **Schema definition** - [`crate::layout::StructSchema`] holds an ordered field table
//!   whose widths are parameterized by the target architecture, so the same field name can
//!   resolve to different offsets on 32- and 64-bit targets
//! - **Materialization** - [`crate::layout::StructSchema::bind`] attaches a byte buffer
//!   and a base address, producing a [`crate::layout::StructView`]
//! - **Variant tables** - [`crate::layout::glibc`] contains the per-version glibc layouts
//!   and the `(version, arch)` selection logic
//!
//! # Key Components
//!
//! - [`crate::layout::FieldKind`] - The type vocabulary (`bool`, `byte`, `char`, `int32`,
//!   `ptr`, `word`) with architecture-dependent widths
//! - [`crate::layout::FieldDef`] - One named, possibly repeated field
//! - [`crate::layout::StructSchema`] - Offset/size computation and buffer binding
//! - [`crate::layout::StructView`] - Per-field little-endian decoding and `address_of`
//! - [`crate::layout::FieldValue`] - Tagged decode result (scalar, array or raw bytes)
//!
//! # Usage Examples
//!
//! ```rust
//! use heapscope::layout::{FieldDef, FieldKind, StructSchema};
//! use heapscope::profile::Arch;
//!
//! let schema = StructSchema::new(
//!     Arch::Bits64,
//!     vec![
//!         FieldDef::scalar(FieldKind::Int32, "mutex"),
//!         FieldDef::scalar(FieldKind::Int32, "flags"),
//!         FieldDef::array(FieldKind::Ptr, "fastbinsY", 10),
//!     ],
//! );
//!
//! assert_eq!(schema.size_of(), 4 + 4 + 10 * 8);
//! assert_eq!(schema.offset_of("fastbinsY", 2)?, 8 + 2 * 8);
//! # Ok::<(), heapscope::Error>(())
//! ```
//!
//! Short buffers are tolerated: binding fewer bytes than `size_of()` zero-extends the
//! missing tail, which is the defensive behavior required near the heap's top boundary
//! where reads routinely come back truncated.

mod schema;
mod view;

pub mod glibc;

pub use schema::{FieldDef, FieldKind, StructSchema};
pub use view::{FieldValue, StructView};
