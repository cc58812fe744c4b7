//! # faultline-core
//!
//! Process-wide crash capture and symbolication: exception trap
//! installation, stack walking, symbol/line resolution, and structured
//! crash-report plus minidump generation.
//!
//! The pipeline: a hardware/software fault occurs on some thread, the
//! platform trap intercepts it (a signal handler on Linux, a Mach
//! exception-port listener thread on macOS) and forwards it into the
//! [`handler::ExceptionHandler`], which captures the faulting thread's
//! register and stack state, resolves backtraces through
//! [`symbols::SymbolLookup`], writes a human-readable report (and
//! optionally a binary minidump), notifies the registered listener, and
//! applies the configured response.
//!
//! ## Safety constraints
//!
//! Code reachable from inside the fault-handling window must not allocate
//! (the faulting thread may hold the allocator lock), must not take locks it
//! could already hold, and must tolerate every collection source failing.
//! That shapes the whole crate: fixed-capacity records, frame-pointer stack
//! walking, raw-descriptor `/proc` access, and sentinel values instead of
//! errors on the capture paths.
//!
//! ## Why unsafe code is needed
//!
//! Trapping faults and reading other threads' state means calling low-level
//! system APIs (signal handling, Mach ports, raw memory reads during the
//! stack walk). These are wrapped in safe abstractions, but the underlying
//! calls must be `unsafe`.

#![allow(unsafe_code)] // Required for low-level system APIs (signals, Mach, stack reads)

pub mod device;
pub mod error;
pub mod handler;
pub mod platform;
pub mod provoke;
pub mod report;
pub mod symbols;
pub mod types;

pub use error::{FaultlineError, FaultlineResult};
pub use handler::{ExceptionHandler, FaultResponse};
pub use provoke::{provoke, FaultKind};
pub use symbols::SymbolLookup;
pub use types::{Address, ExceptionInfo};

/// Tells whether the current process appears to be running under a
/// debugger. Best effort; stealth debuggers are not detected.
pub fn debugger_present() -> bool
{
    platform::debugger_present()
}
