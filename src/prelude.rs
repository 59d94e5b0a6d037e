//! # heapscope Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and
//! traits from the heapscope library. Import this module to get quick access to the
//! essential types for heap inspection.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all heapscope operations
pub use crate::Error;

/// The result type used throughout heapscope
pub use crate::Result;

// ================================================================================================
// Main Entry Points
// ================================================================================================

/// The decoding and traversal engine
pub use crate::model::HeapInspector;

/// A frozen, self-contained heap observation
pub use crate::model::HeapSnapshot;

// ================================================================================================
// Heap Model
// ================================================================================================

/// Decoded allocator structures and chunk headers
pub use crate::model::{ArenaState, ChunkFlags, ChunkHeader, TcacheState};

/// Snapshot comparison and integrity auditing
pub use crate::model::{audit, diff, ChangeSet, ChunkChange, Finding};

// ================================================================================================
// Process Access
// ================================================================================================

/// The address-space seam and the live-process implementation
pub use crate::process::{AddressSpace, Process};

/// Region classification and per-category intervals
pub use crate::process::{MemoryRegion, ProcessBases, ProcessRanges, RegionKind};

// ================================================================================================
// Target Profiling
// ================================================================================================

/// Resolved allocator parameters and their building blocks
pub use crate::profile::{AllocatorProfile, Arch, ArenaOracle, LibcVersion};
