//! # Error Types
//!
//! General error handling for the crash capture subsystem.
//!
//! We use `thiserror` to automatically generate `Error` trait implementations
//! and nice error messages.
//!
//! Note that errors here cover *setup and teardown* operations (installing
//! the trap, spawning the listener thread, opening output files). Collection
//! operations that may run inside the fault-handling window never return
//! errors at all: they degrade to empty results so report composition always
//! completes. See the crate documentation for the full taxonomy.

use thiserror::Error;

/// Main error type for crash handler operations
///
/// ## Error Categories
///
/// 1. **Installation errors**: AlreadyInstalled, TrapInstallFailed,
///    TrapRemoveFailed
/// 2. **Thread control errors**: SuspendFailed, ResumeFailed
/// 3. **Argument errors**: InvalidArgument
/// 4. **Platform errors**: MachError (macOS-specific)
/// 5. **I/O errors**: Io (report/minidump file handling)
#[derive(Error, Debug)]
pub enum FaultlineError
{
    /// Another `ExceptionHandler` instance is already enabled in this process
    ///
    /// Only one handler may own the process-wide trap registration at a time.
    /// Disable the other instance first. This is a checked invariant rather
    /// than a silent overwrite so misconfiguration shows up immediately.
    #[error("Another exception handler is already installed in this process")]
    AlreadyInstalled,

    /// Installing the process-wide fault interceptor failed
    ///
    /// On Linux this means `sigaction` or `sigaltstack` returned an error.
    /// On macOS it covers Mach port allocation, exception-port registration,
    /// and listener-thread creation.
    #[error("Failed to install fault trap: {0}")]
    TrapInstallFailed(String),

    /// Removing the fault interceptor or restoring the previous handler
    /// chain failed
    #[error("Failed to remove fault trap: {0}")]
    TrapRemoveFailed(String),

    /// Failed to suspend a target thread for context capture
    #[error("Failed to suspend thread: {0}")]
    SuspendFailed(String),

    /// Failed to resume a previously suspended thread
    #[error("Failed to resume thread: {0}")]
    ResumeFailed(String),

    /// Invalid argument passed to a handler or lookup function
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// macOS-specific Mach API error
    ///
    /// Wraps `kern_return_t` codes from the Mach kernel APIs. Common values:
    /// - `KERN_PROTECTION_FAILURE`: Permission denied
    /// - `KERN_INVALID_ARGUMENT`: Invalid port or argument
    #[cfg(target_os = "macos")]
    #[error("Mach API error: {0}")]
    MachError(#[from] crate::platform::macos::error::MachError),

    /// I/O error (report file creation, path handling, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for `Result<T, FaultlineError>`
pub type FaultlineResult<T> = std::result::Result<T, FaultlineError>;
