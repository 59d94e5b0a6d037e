//! Allocator profile resolution: architecture, libc version and arena offset.
//!
//! Before any heap state can be decoded, three facts about the target's allocator must
//! be established: the architecture (which sets all pointer/word widths), the glibc
//! version string (which selects the `malloc_state` layout variant), and the offset of
//! `main_arena` inside the libc image. This module derives all three and bundles them
//! into an [`crate::profile::AllocatorProfile`].
//!
//! # Architecture
//!
//! Resolution runs in four steps, mirroring the external facts it depends on:
//!
//! 1. **Architecture detection** - the libc image's ELF header is parsed with goblin;
//!    `EM_386` and `EM_X86_64` are the two recognized machine codes
//! 2. **Version extraction** - the mapped libc image is scanned for the embedded
//!    `libc[- ]N.N` banner; absence is an explicit, documented fallback to the oldest
//!    layout variant, not an error
//! 3. **Arena probing** - an architecture-matched helper binary is executed against a
//!    private copy of the libc plus its matching loader and reports the raw
//!    `main_arena` offset and tcache availability as JSON (the
//!    [`crate::profile::ArenaOracle`] seam; the helper itself is an external
//!    collaborator this crate treats as a deterministic oracle)
//! 4. **Correction** - documented per-version/arch deltas are applied to the raw
//!    offset (see [`crate::profile::OFFSET_CORRECTIONS`])
//!
//! # Usage Examples
//!
//! ```rust
//! use heapscope::profile::{AllocatorProfile, Arch, ArenaReport, LibcVersion};
//!
//! // A 64-bit glibc 2.27 target: the raw helper offset is one word too high.
//! let report = ArenaReport { main_arena_offset: 0x3ebc48, tcache_enable: true };
//! let profile = AllocatorProfile::from_report(
//!     Arch::Bits64,
//!     LibcVersion::parse("2.27"),
//!     &report,
//! );
//! assert_eq!(profile.main_arena_offset, 0x3ebc40);
//! assert!(profile.tcache_enabled);
//! ```

use std::{
    fmt,
    fs::{self, File},
    path::{Path, PathBuf},
    process::Command,
    sync::LazyLock,
};

use goblin::elf::header::{EM_386, EM_X86_64};
use memmap2::Mmap;
use regex::bytes::Regex;
use serde::Deserialize;

use crate::{Error, Result};

/// Target architecture, which fixes the pointer and `size_t` widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    /// 32-bit target: 4-byte words, 8-byte chunk alignment
    Bits32,
    /// 64-bit target: 8-byte words, 16-byte chunk alignment
    Bits64,
}

impl Arch {
    /// Width of a pointer or `size_t` in bytes.
    #[must_use]
    pub fn word(self) -> usize {
        match self {
            Arch::Bits32 => 4,
            Arch::Bits64 => 8,
        }
    }

    /// Alignment of chunk start addresses: 8 on 32-bit targets, 16 on 64-bit.
    #[must_use]
    pub fn chunk_align(self) -> u64 {
        match self {
            Arch::Bits32 => 8,
            Arch::Bits64 => 16,
        }
    }

    /// Minimum chunk size (`2 * word`).
    #[must_use]
    pub fn min_chunk_size(self) -> u64 {
        2 * self.word() as u64
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arch::Bits32 => write!(f, "32"),
            Arch::Bits64 => write!(f, "64"),
        }
    }
}

/// A parsed glibc version such as `2.27`.
///
/// Ordering is lexicographic over `(major, minor)`, which is what the layout-variant
/// selection and offset-correction tables key on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LibcVersion {
    /// Major version (the `2` in `2.27`)
    pub major: u16,
    /// Minor version (the `27` in `2.27`)
    pub minor: u16,
}

impl LibcVersion {
    /// Construct a version from its components.
    #[must_use]
    pub const fn new(major: u16, minor: u16) -> Self {
        LibcVersion { major, minor }
    }

    /// Parse a `major.minor` string; anything else yields `None`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let (major, minor) = s.split_once('.')?;
        Some(LibcVersion {
            major: major.parse().ok()?,
            minor: minor.trim_end_matches(|c: char| !c.is_ascii_digit()).parse().ok()?,
        })
    }
}

impl fmt::Display for LibcVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// An inclusive range of glibc versions; `max = None` leaves the range open-ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionRange {
    /// Lowest version included
    pub min: LibcVersion,
    /// Highest version included, or `None` for "and everything newer"
    pub max: Option<LibcVersion>,
}

impl VersionRange {
    /// An inclusive `min..=max` range.
    #[must_use]
    pub const fn between(min: LibcVersion, max: LibcVersion) -> Self {
        VersionRange { min, max: Some(max) }
    }

    /// An open-ended `min..` range.
    #[must_use]
    pub const fn at_least(min: LibcVersion) -> Self {
        VersionRange { min, max: None }
    }

    /// Whether `version` falls inside this range.
    #[must_use]
    pub fn contains(&self, version: LibcVersion) -> bool {
        version >= self.min && self.max.map_or(true, |max| version <= max)
    }
}

/// The raw facts the arena helper reports for one libc image.
///
/// Field names match the helper's JSON output verbatim.
#[derive(Debug, Clone, Deserialize)]
pub struct ArenaReport {
    /// Raw offset of `main_arena` relative to the libc image base, before corrections
    pub main_arena_offset: u64,
    /// Whether this libc was built with the per-thread cache
    pub tcache_enable: bool,
}

/// Source of raw arena facts for a libc image.
///
/// The default implementation ([`HelperOracle`]) shells out to a bundled helper binary.
/// The trait exists so tests and alternative front ends can inject known facts without
/// executing anything.
pub trait ArenaOracle {
    /// Probe `libc` (with its matching loader `ld`) for the raw arena facts.
    ///
    /// # Errors
    /// Returns [`crate::Error::ProfileResolution`] if the probe cannot be performed.
    /// The result is deterministic per binary, so callers must not retry.
    fn probe(&self, libc: &Path, ld: &Path) -> Result<ArenaReport>;
}

/// Executes the bundled, architecture-matched `libc_info` helper.
///
/// The helper is run the way the target would run it: the libc under inspection is
/// copied into a staging directory as `libc.so.6` together with its matching loader,
/// then the loader is invoked with `--library-path` pointing at the staging directory.
/// The helper prints the raw arena facts as a single JSON object on stdout.
pub struct HelperOracle {
    helper_dir: PathBuf,
}

impl HelperOracle {
    /// Use helper binaries (`libc_info32` / `libc_info64`) from `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        HelperOracle { helper_dir: dir.into() }
    }

    /// Resolve the helper directory from `HEAPSCOPE_HELPERS`, falling back to
    /// `helpers/` next to the current working directory.
    #[must_use]
    pub fn from_env() -> Self {
        let dir = std::env::var_os("HEAPSCOPE_HELPERS")
            .map_or_else(|| PathBuf::from("helpers"), PathBuf::from);
        HelperOracle { helper_dir: dir }
    }
}

impl ArenaOracle for HelperOracle {
    fn probe(&self, libc: &Path, ld: &Path) -> Result<ArenaReport> {
        let arch = detect_arch(libc)?;
        let helper = self.helper_dir.join(format!("libc_info{arch}"));
        if !helper.exists() {
            return Err(Error::ProfileResolution(format!(
                "helper binary {} not found",
                helper.display()
            )));
        }

        // The libc basename must be libc.so.6 for the loader to pick it up.
        let staging = tempfile::tempdir().map_err(|e| {
            Error::ProfileResolution(format!("cannot create staging dir: {e}"))
        })?;
        let staged_libc = staging.path().join("libc.so.6");
        fs::copy(libc, &staged_libc).map_err(|e| {
            Error::ProfileResolution(format!("cannot stage {}: {e}", libc.display()))
        })?;

        let output = Command::new(ld)
            .arg("--library-path")
            .arg(staging.path())
            .arg(&helper)
            .output()
            .map_err(|e| {
                Error::ProfileResolution(format!("cannot run {}: {e}", helper.display()))
            })?;
        if !output.status.success() {
            return Err(Error::ProfileResolution(format!(
                "helper exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        Ok(serde_json::from_slice(&output.stdout)?)
    }
}

/// Detect the architecture of an ELF image from its machine code.
///
/// # Errors
/// Returns [`crate::Error::UnsupportedArchitecture`] for any machine other than
/// `EM_386` or `EM_X86_64`, and I/O / ELF parse errors if the image cannot be read.
pub fn detect_arch(path: &Path) -> Result<Arch> {
    let data = fs::read(path)?;
    let elf = goblin::elf::Elf::parse(&data)?;
    match elf.header.e_machine {
        EM_386 => Ok(Arch::Bits32),
        EM_X86_64 => Ok(Arch::Bits64),
        machine => Err(Error::UnsupportedArchitecture(machine)),
    }
}

/// Scan a libc image for its embedded `libc[- ]N.N` version banner.
///
/// Returns `None` when no banner is present; the resolver then falls back to the
/// oldest layout variant. This is an explicit fallback, not a silent guess.
///
/// # Errors
/// Returns an I/O error if the image cannot be opened or mapped.
pub fn extract_version(path: &Path) -> Result<Option<LibcVersion>> {
    let file = File::open(path)?;
    // Safety: the mapping is read-only and private; a concurrent writer to the libc
    // image on disk could tear the scan, which at worst misses the banner.
    let map = unsafe { Mmap::map(&file)? };
    Ok(scan_version(&map))
}

/// Matches the version banner embedded in every glibc build: `libc-2.27` or `libc 2.27`.
static VERSION_BANNER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"libc[- ]([0-9]+\.[0-9]+)").expect("version pattern is valid")
});

fn scan_version(data: &[u8]) -> Option<LibcVersion> {
    let caps = VERSION_BANNER.captures(data)?;
    let text = std::str::from_utf8(caps.get(1)?.as_bytes()).ok()?;
    LibcVersion::parse(text)
}

/// Offset corrections applied to the helper's raw `main_arena` offset, in words.
///
/// These are empirical facts about the allocator ABI of the listed versions:
/// for 2.27–2.28 the raw offset is one word too high on every architecture, and for
/// 32-bit 2.26–2.28 builds a further word must be subtracted (the `fastbinsY[11]`
/// variants). Extending support to a new quirk is adding one row.
pub const OFFSET_CORRECTIONS: &[(VersionRange, Option<Arch>, u64)] = &[
    (
        VersionRange::between(LibcVersion::new(2, 27), LibcVersion::new(2, 28)),
        None,
        1,
    ),
    (
        VersionRange::between(LibcVersion::new(2, 26), LibcVersion::new(2, 28)),
        Some(Arch::Bits32),
        1,
    ),
];

/// Everything the decoding engine needs to know about one target's allocator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatorProfile {
    /// Target architecture
    pub arch: Arch,
    /// Detected glibc version, `None` if the banner was absent
    pub version: Option<LibcVersion>,
    /// Whether the per-thread cache is compiled in
    pub tcache_enabled: bool,
    /// Corrected offset of `main_arena` relative to the libc image base
    pub main_arena_offset: u64,
}

impl AllocatorProfile {
    /// Resolve the full profile for a libc image.
    ///
    /// # Errors
    /// - [`crate::Error::UnsupportedArchitecture`] for an unrecognized machine code
    /// - [`crate::Error::ProfileResolution`] / [`crate::Error::HelperOutput`] when the
    ///   oracle fails; fatal to the caller, no retry
    pub fn resolve(libc: &Path, ld: &Path, oracle: &dyn ArenaOracle) -> Result<Self> {
        let arch = detect_arch(libc)?;
        let version = extract_version(libc)?;
        let report = oracle.probe(libc, ld)?;
        Ok(Self::from_report(arch, version, &report))
    }

    /// Build a profile from already-known facts, applying the documented
    /// per-version/arch offset corrections.
    #[must_use]
    pub fn from_report(
        arch: Arch,
        version: Option<LibcVersion>,
        report: &ArenaReport,
    ) -> Self {
        let mut offset = report.main_arena_offset;
        if let Some(version) = version {
            for (range, only_arch, words) in OFFSET_CORRECTIONS {
                if range.contains(version) && only_arch.map_or(true, |a| a == arch) {
                    offset -= words * arch.word() as u64;
                }
            }
        }
        AllocatorProfile {
            arch,
            version,
            tcache_enabled: report.tcache_enable,
            main_arena_offset: offset,
        }
    }

    /// Width of a pointer or `size_t` on this target, in bytes.
    #[must_use]
    pub fn word(&self) -> u64 {
        self.arch.word() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(offset: u64) -> ArenaReport {
        ArenaReport { main_arena_offset: offset, tcache_enable: true }
    }

    #[test]
    fn version_parse_and_order() {
        let v27 = LibcVersion::parse("2.27").unwrap();
        assert_eq!(v27, LibcVersion::new(2, 27));
        assert!(LibcVersion::new(2, 23) < v27);
        assert!(LibcVersion::new(3, 0) > LibcVersion::new(2, 31));
        assert!(LibcVersion::parse("garbage").is_none());
    }

    #[test]
    fn banner_scan_finds_first_match() {
        let blob = b"\x7fELF....GNU C Library (Ubuntu GLIBC 2.27-3ubuntu1) stable release version 2.27.\x00libc-2.27.so\x00";
        assert_eq!(scan_version(blob), Some(LibcVersion::new(2, 27)));
        assert_eq!(scan_version(b"no banner here"), None);
    }

    #[test]
    fn correction_applies_for_228_64bit() {
        let profile = AllocatorProfile::from_report(
            Arch::Bits64,
            LibcVersion::parse("2.28"),
            &report(0x1e4c48),
        );
        assert_eq!(profile.main_arena_offset, 0x1e4c48 - 8);
    }

    #[test]
    fn no_correction_for_223() {
        let profile = AllocatorProfile::from_report(
            Arch::Bits64,
            LibcVersion::parse("2.23"),
            &report(0x3c4b20),
        );
        assert_eq!(profile.main_arena_offset, 0x3c4b20);
    }

    #[test]
    fn both_corrections_stack_on_32bit_227() {
        let profile = AllocatorProfile::from_report(
            Arch::Bits32,
            LibcVersion::parse("2.27"),
            &report(0x100),
        );
        assert_eq!(profile.main_arena_offset, 0x100 - 4 - 4);
    }

    #[test]
    fn single_correction_on_32bit_226() {
        let profile = AllocatorProfile::from_report(
            Arch::Bits32,
            LibcVersion::parse("2.26"),
            &report(0x100),
        );
        assert_eq!(profile.main_arena_offset, 0x100 - 4);
    }

    #[test]
    fn missing_version_applies_no_correction() {
        let profile = AllocatorProfile::from_report(Arch::Bits64, None, &report(0x100));
        assert_eq!(profile.main_arena_offset, 0x100);
        assert_eq!(profile.version, None);
    }
}
