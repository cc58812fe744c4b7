//! # Platform-Specific Implementations
//!
//! The fault-capture subsystem needs a small set of leaf operations from the
//! operating system: trapping faults, enumerating threads and modules,
//! reading another thread's registers, and resolving stack geometry. Each
//! platform implements the same capability set with its native mechanism:
//!
//! - **Linux**: POSIX signal interception (`sigaction` + `sigaltstack`),
//!   `/proc` and `dl_iterate_phdr` for enumeration
//! - **macOS**: a Mach exception-port listener thread, `task_threads` and
//!   dyld APIs for enumeration
//!
//! The state machine, data model, and report composition above this module
//! are platform-agnostic; only these leaf operations vary. Unsupported
//! targets get the `fallback` stubs, where every query degrades to an empty
//! result and installing the trap reports an unsupported platform.

use crate::types::{Address, CpuContext, FaultDetail, FixedString, ThreadHandle, ThreadSysId};

#[cfg(target_os = "linux")]
pub mod linux;
#[cfg(target_os = "linux")]
pub(crate) use linux as native;

#[cfg(target_os = "macos")]
pub mod macos;
#[cfg(target_os = "macos")]
pub(crate) use macos as native;

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub mod fallback;
#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub(crate) use fallback as native;

pub(crate) use native::{
    capture_thread_context, current_thread_handle, current_thread_sys_id, debugger_present, for_each_process,
    install_trap, os_version, physical_memory_bytes, process_path, processor_count, refresh_modules, remove_trap,
    thread_handle_for_sys_id, thread_list, thread_name, thread_run_state, thread_stack_bounds,
    thread_sys_id_for_handle, write_minidump, TrapState,
};

/// What the trap should do with the fault after the handler ran (or refused).
///
/// Terminating responses never produce a disposition: the handler exits the
/// process directly, so only the two continuations exist here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FaultDisposition
{
    /// Resume execution at the faulting instruction.
    Resume,
    /// Decline: pass the fault to the next handler in the chain (or the OS
    /// default behavior when there is none).
    Forward,
}

/// Raw fault record assembled by the trap before dispatch.
///
/// Built on the trap's stack from the platform exception payload; everything
/// the platform-agnostic handling sequence needs, plus the raw pointers the
/// minidump writer wants back.
pub(crate) struct RawFault
{
    pub detail: FaultDetail,
    pub context: CpuContext,
    pub thread_handle: ThreadHandle,
    pub thread_sys_id: ThreadSysId,
    /// Faulting instruction address.
    pub instruction: Address,
    /// Faulting memory address for access violations; the instruction
    /// address otherwise.
    pub memory: Address,
    /// Borrowed platform payload for minidump emission.
    pub payload: FaultPayload,
}

/// Platform-specific fault payload carried through to the dump writer.
#[derive(Clone, Copy)]
pub(crate) enum FaultPayload
{
    /// No payload (simulated faults, platforms without dump support).
    None,
    /// Signal delivery payload: pointers into the signal handler's frame.
    #[cfg(target_os = "linux")]
    Signal
    {
        siginfo: *const libc::siginfo_t,
        ucontext: *const libc::c_void,
    },
}

/// Resolve the dynamic symbol enclosing `addr` via `dladdr`.
///
/// Fills `raw_name` with the mangled symbol name and returns the symbol's
/// start address. No allocation. Returns `None` when the address is not
/// covered by any exported symbol.
#[cfg(unix)]
pub(crate) fn dynamic_symbol(addr: Address, raw_name: &mut FixedString<256>) -> Option<Address>
{
    use std::ffi::CStr;

    raw_name.clear();

    let mut dl: libc::Dl_info = unsafe { std::mem::zeroed() };
    let found = unsafe { libc::dladdr(addr.value() as usize as *const libc::c_void, &mut dl) };
    if found == 0 || dl.dli_sname.is_null() || dl.dli_saddr.is_null() {
        return None;
    }

    let raw = unsafe { CStr::from_ptr(dl.dli_sname) };
    match raw.to_str() {
        Ok(name) => raw_name.push_str(name),
        Err(_) => return None,
    }

    Some(Address::new(dl.dli_saddr as u64))
}

#[cfg(not(unix))]
pub(crate) fn dynamic_symbol(_addr: Address, _raw_name: &mut FixedString<256>) -> Option<Address>
{
    None
}
