use std::{
    collections::HashMap,
    path::Path,
    sync::LazyLock,
};

use regex::Regex;

use crate::Result;

/// Matches glibc image basenames: `libc.so.6`, `libc-2.23.so`, `libc.so`.
static LIBC_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\x00]*libc(?:-[\d.]+)?\.so(?:\.6)?$").expect("libc pattern is valid")
});

/// Matches loader basenames: `ld.so.2`, `ld-2.27.so`, `ld.so`.
static LD_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\x00]*ld(?:-[\d.]+)?\.so(?:\.2)?$").expect("ld pattern is valid")
});

/// One `/proc/<pid>/maps` line:
/// `00400000-0040b000 r-xp 00000000 08:02 538840  /path/to/file`
static MAPS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^([0-9a-f]+)-([0-9a-f]+) ([rwxps-]+)(?: \S+){3} *(.*)$")
        .expect("maps pattern is valid")
});

/// One memory region of the target, as a half-open `[start, end)` address interval.
///
/// Regions are immutable values derived fresh from the live target on each query;
/// holding one does not keep it valid, since the target maps and unmaps independently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRegion {
    /// First address of the region
    pub start: u64,
    /// One past the last address of the region
    pub end: u64,
    /// Permission string as reported by the kernel, e.g. `r-xp`
    pub perms: String,
    /// Backing name: a path, a `[heap]`-style pseudo-name, or empty for anonymous maps
    pub name: String,
}

impl MemoryRegion {
    /// Whether `addr` falls inside this region.
    #[must_use]
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }

    /// Region length in bytes.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// Whether the region is empty (never the case for kernel-reported maps).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Classification of a memory region by its backing name.
///
/// The well-known categories are the ones the heap model needs to find (libc, heap);
/// every other named library becomes its own [`RegionKind::Library`] category keyed by
/// basename, matching how analysts refer to mappings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RegionKind {
    /// The process's own executable image
    Program,
    /// The glibc image (`libc.so.6` and friends)
    Libc,
    /// The dynamic loader image (`ld.so.2` and friends)
    Loader,
    /// The `[heap]` pseudo-region
    Heap,
    /// The `[stack]` pseudo-region
    Stack,
    /// Anonymous mapping with no backing name
    Mapped,
    /// Any other file-backed mapping, keyed by basename
    Library(String),
}

impl RegionKind {
    /// Classify a raw region name.
    ///
    /// `exe` is the target's resolved executable path, used to recognize the program
    /// image; pass an empty string when it is unknown and program regions will fall
    /// back to [`RegionKind::Library`].
    #[must_use]
    pub fn classify(name: &str, exe: &str) -> RegionKind {
        if name.is_empty() || name == "mapped" {
            RegionKind::Mapped
        } else if LIBC_PATTERN.is_match(name) {
            RegionKind::Libc
        } else if LD_PATTERN.is_match(name) {
            RegionKind::Loader
        } else if !exe.is_empty() && name == exe {
            RegionKind::Program
        } else if name == "[heap]" {
            RegionKind::Heap
        } else if name == "[stack]" {
            RegionKind::Stack
        } else {
            let base = Path::new(name)
                .file_name()
                .map_or_else(|| name.to_string(), |b| b.to_string_lossy().into_owned());
            RegionKind::Library(base)
        }
    }

    /// Human-readable label for this category.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            RegionKind::Program => "prog",
            RegionKind::Libc => "libc",
            RegionKind::Loader => "ld",
            RegionKind::Heap => "heap",
            RegionKind::Stack => "stack",
            RegionKind::Mapped => "mapped",
            RegionKind::Library(name) => name,
        }
    }
}

/// Parse the full text of a `/proc/<pid>/maps` file.
///
/// Lines that do not match the map grammar are skipped; the kernel's format is stable
/// but defensive parsing costs nothing here.
///
/// # Errors
/// Currently infallible in practice; the `Result` mirrors the I/O path that usually
/// precedes it.
pub fn parse_maps(text: &str) -> Result<Vec<MemoryRegion>> {
    let mut regions = Vec::new();
    for caps in MAPS_LINE.captures_iter(text) {
        let (Ok(start), Ok(end)) = (
            u64::from_str_radix(&caps[1], 16),
            u64::from_str_radix(&caps[2], 16),
        ) else {
            continue;
        };
        regions.push(MemoryRegion {
            start,
            end,
            perms: caps[3].to_string(),
            name: caps[4].trim().to_string(),
        });
    }
    Ok(regions)
}

/// Merged, non-overlapping `[start, end)` intervals per region category.
///
/// Adjacent intervals of the same category are coalesced, so the typical libc mapping
/// (text + rodata + data split across several kernel entries) appears as one range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessRanges {
    ranges: HashMap<RegionKind, Vec<(u64, u64)>>,
}

impl ProcessRanges {
    /// Build the category map from raw regions. `exe` recognizes the program image.
    #[must_use]
    pub fn from_regions(regions: &[MemoryRegion], exe: &str) -> Self {
        let mut ranges: HashMap<RegionKind, Vec<(u64, u64)>> = HashMap::new();
        for region in regions {
            let kind = RegionKind::classify(&region.name, exe);
            merge_into(ranges.entry(kind).or_default(), (region.start, region.end));
        }
        ProcessRanges { ranges }
    }

    /// All intervals of one category, empty if the category is absent.
    #[must_use]
    pub fn get(&self, kind: &RegionKind) -> &[(u64, u64)] {
        self.ranges.get(kind).map_or(&[], Vec::as_slice)
    }

    /// The first interval of one category.
    #[must_use]
    pub fn first(&self, kind: &RegionKind) -> Option<(u64, u64)> {
        self.get(kind).first().copied()
    }

    /// Whether `addr` falls inside any interval of `kind`.
    #[must_use]
    pub fn contains(&self, kind: &RegionKind, addr: u64) -> bool {
        self.get(kind).iter().any(|&(s, e)| addr >= s && addr < e)
    }
}

// Coalesce `range` into `list` when it abuts an existing interval on either side,
// otherwise append it.
fn merge_into(list: &mut Vec<(u64, u64)>, range: (u64, u64)) {
    for entry in list.iter_mut() {
        if entry.0 == range.1 {
            entry.0 = range.0;
            return;
        }
        if entry.1 == range.0 {
            entry.1 = range.1;
            return;
        }
    }
    list.push(range);
}

/// Lowest start address per category.
///
/// Regions are scanned in reverse map order so that the final value for each category
/// is the first (lowest) mapping the kernel reports, guarding against alias segments
/// of the same image overriding the true base.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessBases {
    bases: HashMap<RegionKind, u64>,
}

impl ProcessBases {
    /// Derive per-category bases from raw regions. `exe` recognizes the program image.
    #[must_use]
    pub fn from_regions(regions: &[MemoryRegion], exe: &str) -> Self {
        let mut bases = HashMap::new();
        for region in regions.iter().rev() {
            bases.insert(RegionKind::classify(&region.name, exe), region.start);
        }
        ProcessBases { bases }
    }

    /// Base address of one category, `None` if the category is absent.
    #[must_use]
    pub fn get(&self, kind: &RegionKind) -> Option<u64> {
        self.bases.get(kind).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAPS: &str = "\
00400000-0040b000 r-xp 00000000 08:02 538840  /usr/bin/target
0060b000-0060c000 rw-p 0000b000 08:02 538840  /usr/bin/target
01e05000-01e26000 rw-p 00000000 00:00 0       [heap]
7f30c0000000-7f30c01c0000 r-xp 00000000 08:02 791 /lib/x86_64-linux-gnu/libc-2.27.so
7f30c01c0000-7f30c03c0000 ---p 001c0000 08:02 791 /lib/x86_64-linux-gnu/libc-2.27.so
7f30c0400000-7f30c0428000 r-xp 00000000 08:02 793 /lib/x86_64-linux-gnu/ld-2.27.so
7f30c0600000-7f30c0604000 rw-p 00000000 00:00 0
7ffd10000000-7ffd10021000 rw-p 00000000 00:00 0  [stack]
";

    #[test]
    fn parses_all_lines() {
        let regions = parse_maps(MAPS).unwrap();
        assert_eq!(regions.len(), 8);
        assert_eq!(regions[0].start, 0x400000);
        assert_eq!(regions[0].perms, "r-xp");
        assert_eq!(regions[2].name, "[heap]");
        assert_eq!(regions[6].name, "");
    }

    #[test]
    fn classification() {
        assert_eq!(
            RegionKind::classify("/lib/x86_64-linux-gnu/libc-2.27.so", ""),
            RegionKind::Libc
        );
        assert_eq!(RegionKind::classify("/lib/libc.so.6", ""), RegionKind::Libc);
        assert_eq!(
            RegionKind::classify("/lib/x86_64-linux-gnu/ld-2.27.so", ""),
            RegionKind::Loader
        );
        assert_eq!(
            RegionKind::classify("/usr/bin/target", "/usr/bin/target"),
            RegionKind::Program
        );
        assert_eq!(RegionKind::classify("[heap]", ""), RegionKind::Heap);
        assert_eq!(RegionKind::classify("[stack]", ""), RegionKind::Stack);
        assert_eq!(RegionKind::classify("", ""), RegionKind::Mapped);
        assert_eq!(
            RegionKind::classify("/usr/lib/libpthread-2.27.so", ""),
            RegionKind::Library("libpthread-2.27.so".to_string())
        );
    }

    #[test]
    fn adjacent_intervals_coalesce() {
        let regions = parse_maps(MAPS).unwrap();
        let ranges = ProcessRanges::from_regions(&regions, "/usr/bin/target");
        // the two libc segments are contiguous and merge into one interval
        assert_eq!(
            ranges.get(&RegionKind::Libc),
            &[(0x7f30c0000000, 0x7f30c03c0000)]
        );
        // the two program segments are not contiguous
        assert_eq!(ranges.get(&RegionKind::Program).len(), 2);
    }

    #[test]
    fn bases_prefer_the_lowest_mapping() {
        let regions = parse_maps(MAPS).unwrap();
        let bases = ProcessBases::from_regions(&regions, "/usr/bin/target");
        assert_eq!(bases.get(&RegionKind::Libc), Some(0x7f30c0000000));
        assert_eq!(bases.get(&RegionKind::Program), Some(0x400000));
        assert_eq!(bases.get(&RegionKind::Heap), Some(0x1e05000));
        assert_eq!(bases.get(&RegionKind::Library("nope.so".into())), None);
    }

    #[test]
    fn contains_respects_half_open_intervals() {
        let regions = parse_maps(MAPS).unwrap();
        let ranges = ProcessRanges::from_regions(&regions, "");
        assert!(ranges.contains(&RegionKind::Heap, 0x1e05000));
        assert!(!ranges.contains(&RegionKind::Heap, 0x1e26000));
    }
}
