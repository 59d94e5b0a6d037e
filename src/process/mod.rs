//! Process memory access: region enumeration, classification and raw reads.
//!
//! This module is the engine's window into a live target. It enumerates the target's
//! memory regions from `/proc/<pid>/maps`, classifies each region (program image, libc
//! image, loader, heap, stack, anonymous mapping or named library), and reads arbitrary
//! byte ranges from `/proc/<pid>/mem`.
//!
//! # Architecture
//!
//! - [`crate::process::AddressSpace`] - the seam every consumer decodes through; a
//!   debugger-extension or emulator front end implements it over its own address-space
//!   source and gets the whole model layer for free
//! - [`crate::process::Process`] - the `/proc`-backed implementation for live targets
//! - [`crate::process::MemoryRegion`] / [`crate::process::RegionKind`] - one raw map
//!   entry and its classification
//! - [`crate::process::ProcessRanges`] / [`crate::process::ProcessBases`] - merged
//!   per-category interval lists and base addresses
//!
//! # Consistency model
//!
//! The target executes concurrently and is never paused. Region tables are re-read
//! live on every call (no caching, the target mutates independently) and every memory
//! read is best effort: a failed or short read returns fewer bytes than requested and
//! callers must not assume the returned length equals the request. No cross-read
//! atomicity is guaranteed anywhere in this crate.
//!
//! # Usage Examples
//!
//! ```rust,no_run
//! use heapscope::process::{AddressSpace, Process, RegionKind};
//!
//! let process = Process::attach(1234)?;
//! let ranges = process.ranges()?;
//! if let Some((start, end)) = ranges.first(&RegionKind::Heap) {
//!     let heap = process.read(start, (end - start) as usize);
//!     println!("captured {} heap bytes", heap.len());
//! }
//! # Ok::<(), heapscope::Error>(())
//! ```

mod maps;
mod space;

pub use maps::{parse_maps, MemoryRegion, ProcessBases, ProcessRanges, RegionKind};
pub use space::{AddressSpace, Process};
