//! # Fallback Platform Stubs
//!
//! Targets without a native trap implementation still build: every query
//! degrades to an empty result (the contract callers are already written
//! against), and installing the trap reports an unsupported platform.

use crate::error::{FaultlineError, FaultlineResult};
use crate::platform::RawFault;
use crate::types::{CpuContext, FixedString, ModuleInfo, StackBounds, ThreadHandle, ThreadSysId};

/// Marker state; never constructed because installation always fails.
pub(crate) struct TrapState;

pub(crate) fn install_trap() -> FaultlineResult<TrapState>
{
    Err(FaultlineError::TrapInstallFailed(
        "no native fault trap for this target".into(),
    ))
}

pub(crate) fn remove_trap(_state: &mut TrapState) -> FaultlineResult<()>
{
    Ok(())
}

pub(crate) fn current_thread_sys_id() -> ThreadSysId
{
    ThreadSysId::INVALID
}

pub(crate) fn current_thread_handle() -> ThreadHandle
{
    ThreadHandle::INVALID
}

pub(crate) fn thread_handle_for_sys_id(_sys_id: ThreadSysId) -> ThreadHandle
{
    ThreadHandle::INVALID
}

pub(crate) fn thread_sys_id_for_handle(_handle: ThreadHandle) -> ThreadSysId
{
    ThreadSysId::INVALID
}

pub(crate) fn thread_stack_bounds(_handle: ThreadHandle) -> Option<StackBounds>
{
    None
}

pub(crate) fn thread_name(_sys_id: ThreadSysId, out: &mut FixedString<32>)
{
    out.clear();
}

pub(crate) fn thread_run_state(_sys_id: ThreadSysId, out: &mut FixedString<64>)
{
    out.clear();
    out.push_str("unknown");
}

pub(crate) fn thread_list(_handles: Option<&mut [ThreadHandle]>, _sys_ids: Option<&mut [ThreadSysId]>) -> usize
{
    0
}

pub(crate) fn capture_thread_context(_sys_id: ThreadSysId) -> Option<CpuContext>
{
    None
}

pub(crate) fn refresh_modules(_cache: &mut Vec<ModuleInfo>) -> bool
{
    false
}

pub(crate) fn debugger_present() -> bool
{
    false
}

pub(crate) fn for_each_process(_f: &mut dyn FnMut(u32, &str)) -> bool
{
    false
}

pub(crate) fn process_path(out: &mut FixedString<256>)
{
    out.clear();
}

pub(crate) fn os_version(out: &mut FixedString<128>)
{
    out.clear();
    out.push_str("unknown");
}

pub(crate) fn processor_count() -> u32
{
    0
}

pub(crate) fn physical_memory_bytes() -> u64
{
    0
}

pub(crate) fn write_minidump(_path: &str, _raw: &RawFault, _flags: u32) -> bool
{
    false
}
