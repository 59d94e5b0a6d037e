// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]

//! # heapscope
//!
//! A zero-pause inspection engine for the glibc heap of a running Linux process.
//! `heapscope` reads a target's memory through `/proc/<pid>/mem` (or any other
//! [`process::AddressSpace`] source), decodes the allocator's internal structures
//! against version- and architecture-aware layout schemas, and reconstructs the full
//! heap state: arena, tcache, fastbins, the unsorted/small/large bins, and the linear
//! chunk list up to the top chunk. Nothing is ever written to the target and the
//! target is never stopped.
//!
//! ## Features
//!
//! - **Layout engine** - declarative struct schemas sized per pointer width, with a
//!   version table covering the `malloc_state` variants from pre-2.26 through 2.27+
//! - **Allocator profiling** - architecture detection from the libc ELF header,
//!   version extraction from the image's banner, and `main_arena` resolution through
//!   small helper binaries run against the target's own libc
//! - **Defensive traversal** - every linked-structure walk carries cycle protection,
//!   so corrupted or mid-mutation heaps terminate instead of hanging the inspector
//! - **Snapshots and diffs** - freeze the complete heap state into a plain value,
//!   compare captures offline, and audit them for exploitation artifacts
//!
//! ## Quick Start
//!
//! Add `heapscope` to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! heapscope = "0.2"
//! ```
//!
//! ### Using the Prelude
//!
//! ```rust,no_run
//! use heapscope::prelude::*;
//!
//! let inspector = HeapInspector::attach(1234)?;
//! let snapshot = inspector.capture()?;
//! println!("{} chunks on the heap", snapshot.heap_chunks.len());
//! # Ok::<(), heapscope::Error>(())
//! ```
//!
//! ### Watching a heap change
//!
//! ```rust,no_run
//! use heapscope::{diff, HeapInspector};
//!
//! let inspector = HeapInspector::attach(1234)?;
//! let before = inspector.capture()?;
//! std::thread::sleep(std::time::Duration::from_secs(1));
//! let after = inspector.capture()?;
//!
//! for (chunk, change) in &diff(&before, &after).chunks {
//!     println!("{:#x}: {:?}", chunk.addr, change);
//! }
//! # Ok::<(), heapscope::Error>(())
//! ```
//!
//! ## Architecture
//!
//! `heapscope` is organized into four layers:
//!
//! - [`layout`] - declarative struct schemas and the glibc layout catalog
//! - [`process`] - the [`process::AddressSpace`] seam, `/proc` map parsing, and the
//!   live-process implementation
//! - [`profile`] - architecture/version detection and `main_arena` offset resolution
//! - [`model`] - the decoding engine, snapshots, diffs, and the integrity audit
//!
//! Each layer depends only on the ones above it in this list; in particular the
//! entire [`model`] layer is written against the [`process::AddressSpace`] trait, so
//! debugger extensions and emulators can drive the same engine by supplying their own
//! byte source.
//!
//! ## Consistency Model
//!
//! The target keeps running while it is inspected. Every read races against the
//! allocator by design: a traversal can observe a list mid-splice, and a snapshot's
//! fields are captured in sequence, not atomically. The engine guarantees it always
//! terminates and never touches the target; it cannot guarantee that what it saw was
//! ever simultaneously true. Treat results as best-effort observations.
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T, Error>`](Result):
//!
//! ```rust,no_run
//! use heapscope::{Error, HeapInspector};
//!
//! match HeapInspector::attach(1234) {
//!     Ok(inspector) => println!("attached"),
//!     Err(Error::ProcessUnavailable { pid, .. }) => println!("cannot inspect {pid}"),
//!     Err(Error::HeapUnmapped) => println!("target has not allocated yet"),
//!     Err(e) => println!("error: {e}"),
//! }
//! ```

#[macro_use]
pub(crate) mod error;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust,no_run
/// use heapscope::prelude::*;
///
/// let inspector = HeapInspector::attach(1234)?;
/// let snapshot = inspector.capture()?;
/// # Ok::<(), heapscope::Error>(())
/// ```
pub mod prelude;

/// Declarative struct layouts and the glibc allocator layout catalog.
///
/// A [`layout::StructSchema`] describes one C struct as an ordered field list whose
/// widths depend on the target's pointer width; binding a schema to raw bytes yields
/// a [`layout::StructView`] for field access by name. The [`layout::glibc`] module
/// holds the catalog of `malloc_state`, `malloc_chunk` and
/// `tcache_perthread_struct` layouts across glibc versions.
pub mod layout;

/// The heap object model: decoded structures, traversal, snapshots, diffs, audit.
///
/// # Key Types
///
/// - [`HeapInspector`] - the decoding and traversal engine
/// - [`HeapSnapshot`] - a frozen, self-contained heap observation
/// - [`model::ArenaState`] / [`model::TcacheState`] - decoded allocator structures
/// - [`model::ChunkHeader`] - one decoded `malloc_chunk` header
///
/// # Main Functions
///
/// - [`diff`] - compare two snapshots of the same heap
/// - [`model::audit`] - check a snapshot for corruption artifacts
pub mod model;

/// Address-space access: the [`process::AddressSpace`] seam and the live-process
/// implementation built on `/proc/<pid>/mem` and `/proc/<pid>/maps`.
pub mod process;

/// Target profiling: architecture and glibc version detection, and resolution of the
/// `main_arena` offset through an [`profile::ArenaOracle`].
pub mod profile;

/// `heapscope` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always
/// [`Error`]. Used consistently throughout the crate for all fallible operations.
pub type Result<T> = std::result::Result<T, Error>;

/// `heapscope` Error type
///
/// The main error type for all operations in this crate.
///
/// # Examples
///
/// ```rust,no_run
/// use heapscope::{Error, HeapInspector};
///
/// match HeapInspector::attach(1) {
///     Ok(_) => println!("attached"),
///     Err(Error::ProcessUnavailable { pid, .. }) => println!("no access to {pid}"),
///     Err(e) => println!("error: {e}"),
/// }
/// ```
pub use error::Error;

/// The central decoding and traversal engine.
///
/// See [`model::HeapInspector`] for attachment, traversal and capture.
pub use model::HeapInspector;

/// A frozen, self-contained heap observation.
///
/// See [`model::HeapSnapshot`].
pub use model::HeapSnapshot;

/// Compare two snapshots of the same heap.
///
/// See [`model::diff`].
pub use model::diff;
