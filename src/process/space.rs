use std::{
    fs::{self, File},
    io::ErrorKind,
    os::unix::fs::FileExt,
    path::{Path, PathBuf},
};

use crate::{
    process::{parse_maps, MemoryRegion, ProcessBases, ProcessRanges, RegionKind},
    Error, Result,
};

/// An inspectable address space.
///
/// This is the seam between the decoding engine and whatever supplies the bytes: the
/// live-process implementation below, a debugger extension's target connection, or a
/// whole-system emulator. Everything in [`crate::model`] is written against this trait
/// only.
pub trait AddressSpace {
    /// Read up to `len` bytes at `addr`, best effort.
    ///
    /// A failed or partial read returns fewer bytes than requested (possibly none);
    /// the target may have unmapped the range or exited, which is a normal condition,
    /// not an error. Callers must never assume the returned length equals `len`.
    fn read(&self, addr: u64, len: usize) -> Vec<u8>;

    /// Enumerate the target's memory regions.
    ///
    /// Implementations must re-read the live table on every call; the target mutates
    /// its mappings independently of the inspection.
    ///
    /// # Errors
    /// Fails only when the region table itself cannot be obtained (e.g. the target
    /// exited).
    fn regions(&self) -> Result<Vec<MemoryRegion>>;

    /// The target's resolved executable path, used to classify program-image regions.
    ///
    /// Sources that cannot know it return an empty string.
    fn exe(&self) -> String {
        String::new()
    }

    /// The target's process id, `None` for sources not backed by a live process.
    fn pid(&self) -> Option<i32> {
        None
    }
}

/// A live Linux process, inspected through `/proc/<pid>/mem` and `/proc/<pid>/maps`.
///
/// Opening the process acquires no lock and stops nothing: the target keeps running
/// and every read races against it by design. Two inspections of the same process are
/// independent and safe to run in parallel since each only performs reads.
///
/// # Examples
///
/// ```rust,no_run
/// use heapscope::process::{AddressSpace, Process};
///
/// let process = Process::attach(1234)?;
/// println!("inspecting {}", process.exe_path().display());
/// let bytes = process.read(0x400000, 64);
/// # Ok::<(), heapscope::Error>(())
/// ```
pub struct Process {
    pid: i32,
    mem: File,
    exe: PathBuf,
}

impl Process {
    /// Attach to a process by pid.
    ///
    /// # Errors
    /// Returns [`crate::Error::ProcessUnavailable`] when `/proc/<pid>` does not exist
    /// (process not found) or is not readable (permission denied; typically
    /// `ptrace_scope` or a foreign-user target).
    pub fn attach(pid: i32) -> Result<Self> {
        let mem = File::open(format!("/proc/{pid}/mem"))
            .map_err(|source| Error::ProcessUnavailable { pid, source })?;
        let exe = fs::read_link(format!("/proc/{pid}/exe"))
            .map_err(|source| Error::ProcessUnavailable { pid, source })?;
        Ok(Process { pid, mem, exe })
    }

    /// The inspected pid.
    #[must_use]
    pub fn pid(&self) -> i32 {
        self.pid
    }

    /// The target's resolved executable path.
    #[must_use]
    pub fn exe_path(&self) -> &Path {
        &self.exe
    }

    /// Classified, merged region intervals, re-derived from the live map table.
    ///
    /// # Errors
    /// Fails when `/proc/<pid>/maps` cannot be read (target exited).
    pub fn ranges(&self) -> Result<ProcessRanges> {
        let regions = self.regions()?;
        Ok(ProcessRanges::from_regions(&regions, &self.exe.to_string_lossy()))
    }

    /// Per-category base addresses, re-derived from the live map table.
    ///
    /// # Errors
    /// Fails when `/proc/<pid>/maps` cannot be read (target exited).
    pub fn bases(&self) -> Result<ProcessBases> {
        let regions = self.regions()?;
        Ok(ProcessBases::from_regions(&regions, &self.exe.to_string_lossy()))
    }

    /// Classify the region an address falls in, `None` for unmapped addresses.
    ///
    /// # Errors
    /// Fails when `/proc/<pid>/maps` cannot be read (target exited).
    pub fn region_name_of(&self, addr: u64) -> Result<Option<RegionKind>> {
        let exe = self.exe.to_string_lossy();
        for region in self.regions()? {
            if region.contains(addr) {
                return Ok(Some(RegionKind::classify(&region.name, &exe)));
            }
        }
        Ok(None)
    }

    /// Path of the libc image mapped into the target.
    ///
    /// # Errors
    /// Returns [`crate::Error::ProfileResolution`] when no libc mapping exists (static
    /// binaries cannot be profiled).
    pub fn libc_path(&self) -> Result<PathBuf> {
        self.find_image(RegionKind::Libc)
    }

    /// Path of the dynamic loader mapped into the target.
    ///
    /// # Errors
    /// Returns [`crate::Error::ProfileResolution`] when no loader mapping exists.
    pub fn ld_path(&self) -> Result<PathBuf> {
        self.find_image(RegionKind::Loader)
    }

    fn find_image(&self, wanted: RegionKind) -> Result<PathBuf> {
        let exe = self.exe.to_string_lossy();
        for region in self.regions()? {
            if RegionKind::classify(&region.name, &exe) == wanted {
                return Ok(PathBuf::from(region.name));
            }
        }
        Err(Error::ProfileResolution(format!(
            "no {} mapping in target {}",
            wanted.label(),
            self.pid
        )))
    }
}

impl AddressSpace for Process {
    fn read(&self, addr: u64, len: usize) -> Vec<u8> {
        let mut buffer = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            match self.mem.read_at(&mut buffer[filled..], addr + filled as u64) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(_) => break,
            }
        }
        buffer.truncate(filled);
        buffer
    }

    fn regions(&self) -> Result<Vec<MemoryRegion>> {
        let text = fs::read_to_string(format!("/proc/{}/maps", self.pid))
            .map_err(|source| Error::ProcessUnavailable { pid: self.pid, source })?;
        parse_maps(&text)
    }

    fn exe(&self) -> String {
        self.exe.to_string_lossy().into_owned()
    }

    fn pid(&self) -> Option<i32> {
        Some(self.pid)
    }
}
