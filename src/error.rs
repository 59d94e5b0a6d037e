use thiserror::Error;

macro_rules! corrupt_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Corrupt {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Corrupt {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Structural and configuration failures (architecture, profile resolution) abort the current
/// inspection and surface here. Transient read failures against a live target do *not* appear
/// as errors: a short or failed read of target memory decodes as zeroes so that traversal of a
/// corrupted or racing heap stays resilient (see [`crate::process::AddressSpace::read`]).
///
/// # Error Categories
///
/// ## Target Process Errors
/// - [`Error::ProcessUnavailable`] - The target exited or cannot be inspected
/// - [`Error::HeapUnmapped`] - The target has no `[heap]` mapping yet
///
/// ## Profile Resolution Errors
/// - [`Error::UnsupportedArchitecture`] - The image is neither recognized 32- nor 64-bit code
/// - [`Error::ProfileResolution`] - The arena-offset helper or version lookup failed
///
/// ## Programming Contract Errors
/// - [`Error::UnknownField`] - A schema was queried for a field it does not define
///
/// # Examples
///
/// ```rust,no_run
/// use heapscope::{Error, HeapInspector};
///
/// match HeapInspector::attach(1234) {
///     Ok(inspector) => println!("attached"),
///     Err(Error::UnsupportedArchitecture(machine)) => {
///         eprintln!("target machine {machine:#x} is not supported");
///     }
///     Err(Error::ProcessUnavailable { pid, .. }) => {
///         eprintln!("process {pid} cannot be inspected");
///     }
///     Err(e) => eprintln!("error: {e}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The target's instruction set is neither recognized 32- nor 64-bit code.
    ///
    /// No decoding is possible for an unknown architecture; the associated value is the
    /// ELF `e_machine` that was encountered. Fatal and unrecoverable.
    #[error("Unsupported architecture - machine {0:#x}")]
    UnsupportedArchitecture(u16),

    /// The target process exited or cannot be inspected.
    ///
    /// Raised when `/proc/<pid>` is missing (process not found) or not readable
    /// (permission denied). Fatal to the current inspection, not to the caller's
    /// process.
    ///
    /// # Fields
    ///
    /// * `pid` - The process that could not be inspected
    /// * `source` - The underlying I/O error
    #[error("Process {pid} unavailable: {source}")]
    ProcessUnavailable {
        /// The pid that could not be opened
        pid: i32,
        /// The underlying I/O failure
        source: std::io::Error,
    },

    /// The target has no `[heap]` mapping.
    ///
    /// The main heap is created lazily on the first `brk`; inspecting a process before
    /// its first allocation is a normal, recoverable condition for the caller.
    #[error("Target has no [heap] mapping yet")]
    HeapUnmapped,

    /// Resolution of the allocator profile failed.
    ///
    /// The arena-offset helper could not be executed, produced unusable output, or the
    /// libc image could not be examined. The underlying fact is deterministic per binary,
    /// so retrying cannot help; the current inspection is aborted.
    #[error("Profile resolution failed: {0}")]
    ProfileResolution(String),

    /// A schema was queried for a field name it does not define.
    ///
    /// This is a programming error (a typo or a layout-variant mismatch in the caller),
    /// not a property of the target process.
    #[error("Unknown field `{0}` in struct schema")]
    UnknownField(String),

    /// Target data that cannot be interpreted.
    ///
    /// Carries the source location where the malformation was detected for debugging
    /// purposes.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Corrupt - {file}:{line}: {message}")]
    Corrupt {
        /// The message to be printed for the Corrupt error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// File I/O error.
    ///
    /// Wraps standard I/O errors that occur while reading `/proc` files or the libc
    /// image on disk.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Error from the goblin crate during ELF parsing.
    ///
    /// The goblin crate is used to parse the libc image's ELF header for architecture
    /// detection. This error wraps any failures from that parsing layer.
    #[error("{0}")]
    GoblinErr(#[from] goblin::error::Error),

    /// The arena-offset helper emitted output that is not valid JSON.
    #[error("Helper output unparsable: {0}")]
    HelperOutput(#[from] serde_json::Error),
}
