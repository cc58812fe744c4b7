//! # macOS Platform Implementation
//!
//! macOS-specific leaf operations for the crash capture subsystem, built on
//! the Mach microkernel surface:
//!
//! - **Mach exception ports**: fault interception via a dedicated listener
//!   thread (see [`exception`])
//! - **task_threads / thread_get_state**: thread enumeration and foreign
//!   register capture
//! - **dyld image list**: loaded-module enumeration
//! - **pthread `_np` calls**: stack geometry and thread names
//!
//! ## Dependencies
//!
//! We use a hybrid approach: the `mach2` crate for well-maintained Mach
//! message/port APIs, `libc` for type definitions, and our own
//! `extern "C"` declarations (in [`ffi`]) for the calls neither crate
//! exposes.

pub(crate) mod constants;
pub mod error;
pub(crate) mod exception;
pub(crate) mod ffi;
pub mod guards;

use std::ffi::CStr;
use std::mem;

use libc::{c_int, c_void, thread_act_t};
use mach2::kern_return::KERN_SUCCESS;
use mach2::task::task_threads;
use mach2::traps::mach_task_self;

use crate::types::{
    Address, CpuContext, FaultDetail, FixedString, ModuleInfo, StackBounds, ThreadHandle, ThreadSysId,
    MODULE_CACHE_CAPACITY,
};

use guards::ThreadSuspendGuard;

pub(crate) use exception::{install_trap, remove_trap, TrapState};

/// Mach thread port of the calling thread.
pub(crate) fn current_thread_sys_id() -> ThreadSysId
{
    let port = unsafe { ffi::pthread_mach_thread_np(libc::pthread_self()) };
    ThreadSysId::new(port as u64)
}

/// Pthread handle of the calling thread.
pub(crate) fn current_thread_handle() -> ThreadHandle
{
    ThreadHandle::new(unsafe { libc::pthread_self() } as u64)
}

/// Map a Mach thread port to its pthread handle.
pub(crate) fn thread_handle_for_sys_id(sys_id: ThreadSysId) -> ThreadHandle
{
    if sys_id.is_invalid() {
        return ThreadHandle::INVALID;
    }
    let pthread = unsafe { ffi::pthread_from_mach_thread_np(sys_id.raw() as thread_act_t) };
    ThreadHandle::new(pthread as u64)
}

/// Map a pthread handle to its Mach thread port.
pub(crate) fn thread_sys_id_for_handle(handle: ThreadHandle) -> ThreadSysId
{
    if handle.is_invalid() {
        return ThreadSysId::INVALID;
    }
    let port = unsafe { ffi::pthread_mach_thread_np(handle.raw() as libc::pthread_t) };
    ThreadSysId::new(port as u64)
}

/// Stack bounds for the given pthread (the calling thread when invalid).
pub(crate) fn thread_stack_bounds(handle: ThreadHandle) -> Option<StackBounds>
{
    let thread = if handle.is_invalid() {
        unsafe { libc::pthread_self() }
    } else {
        handle.raw() as libc::pthread_t
    };

    unsafe {
        let base = ffi::pthread_get_stackaddr_np(thread);
        let size = ffi::pthread_get_stacksize_np(thread);
        if base.is_null() || size == 0 {
            return None;
        }

        // pthread reports the high end on this platform.
        let base = base as u64;
        Some(StackBounds {
            base: Address::new(base),
            limit: Address::new(base.saturating_sub(size as u64)),
        })
    }
}

/// Thread name via the pthread mapped from the Mach port.
pub(crate) fn thread_name(sys_id: ThreadSysId, out: &mut FixedString<32>)
{
    out.clear();
    if sys_id.is_invalid() {
        return;
    }

    unsafe {
        let pthread = ffi::pthread_from_mach_thread_np(sys_id.raw() as thread_act_t);
        if pthread.is_null() {
            return;
        }

        let mut buf = [0 as libc::c_char; 64];
        if ffi::pthread_getname_np(pthread, buf.as_mut_ptr(), buf.len()) == 0 {
            if let Ok(name) = CStr::from_ptr(buf.as_ptr()).to_str() {
                out.push_str(name);
            }
        }
    }
}

/// `thread_basic_info` layout (flavor 3).
#[repr(C)]
struct ThreadBasicInfo
{
    user_time: [u32; 2],
    system_time: [u32; 2],
    cpu_usage: i32,
    policy: i32,
    run_state: i32,
    flags: i32,
    suspend_count: i32,
    sleep_time: i32,
}

const THREAD_BASIC_INFO: c_int = 3;
const TH_STATE_RUNNING: i32 = 1;
const TH_STATE_STOPPED: i32 = 2;
const TH_STATE_WAITING: i32 = 3;
const TH_STATE_UNINTERRUPTIBLE: i32 = 4;
const TH_STATE_HALTED: i32 = 5;

/// Scheduler run state of a thread via `thread_info`.
pub(crate) fn thread_run_state(sys_id: ThreadSysId, out: &mut FixedString<64>)
{
    use std::fmt::Write as _;

    out.clear();

    let mut info: ThreadBasicInfo = unsafe { mem::zeroed() };
    let mut count = (mem::size_of::<ThreadBasicInfo>() / mem::size_of::<u32>()) as libc::mach_msg_type_number_t;
    let kr = unsafe {
        ffi::thread_info(
            sys_id.raw() as thread_act_t,
            THREAD_BASIC_INFO,
            &mut info as *mut ThreadBasicInfo as *mut libc::natural_t,
            &mut count,
        )
    };

    if kr != KERN_SUCCESS {
        out.push_str("unknown");
        return;
    }

    let state = match info.run_state {
        TH_STATE_RUNNING => "running",
        TH_STATE_STOPPED => "stopped",
        TH_STATE_WAITING => "waiting",
        TH_STATE_UNINTERRUPTIBLE => "uninterruptible",
        TH_STATE_HALTED => "halted",
        _ => "unknown",
    };
    let _ = write!(out, "{state}, suspend count: {}", info.suspend_count);
}

/// Enumerate the threads of this task via `task_threads`.
///
/// The kernel-vended port array is released with `vm_deallocate` and each
/// port right with `mach_port_deallocate` once copied out.
pub(crate) fn thread_list(mut handles: Option<&mut [ThreadHandle]>, mut sys_ids: Option<&mut [ThreadSysId]>) -> usize
{
    unsafe {
        let mut threads: *mut thread_act_t = std::ptr::null_mut();
        let mut thread_count: libc::mach_msg_type_number_t = 0;
        if task_threads(mach_task_self(), &mut threads, &mut thread_count) != KERN_SUCCESS {
            return 0;
        }

        let ports = std::slice::from_raw_parts(threads, thread_count as usize);
        for (i, port) in ports.iter().enumerate() {
            if let Some(ids) = sys_ids.as_deref_mut() {
                if i < ids.len() {
                    ids[i] = ThreadSysId::new(*port as u64);
                }
            }
            if let Some(hs) = handles.as_deref_mut() {
                if i < hs.len() {
                    let pthread = ffi::pthread_from_mach_thread_np(*port);
                    hs[i] = ThreadHandle::new(pthread as u64);
                }
            }
            let _ = ffi::mach_port_deallocate(mach_task_self(), *port);
        }

        let count = thread_count as usize;
        let size = (count * mem::size_of::<thread_act_t>()) as libc::vm_size_t;
        let _ = ffi::vm_deallocate(mach_task_self(), threads as libc::vm_address_t, size);

        count
    }
}

/// Read a suspended thread's register file.
pub(crate) fn thread_state_for_port(port: thread_act_t) -> Option<CpuContext>
{
    unsafe {
        #[cfg(target_arch = "x86_64")]
        {
            use crate::types::X86_64Context;

            let mut state = [0u64; 21];
            let mut count = constants::X86_THREAD_STATE64_COUNT;
            let kr = ffi::thread_get_state(
                port,
                constants::X86_THREAD_STATE64,
                state.as_mut_ptr() as *mut libc::natural_t,
                &mut count,
            );
            if kr != KERN_SUCCESS {
                return None;
            }

            Some(CpuContext::X86_64(X86_64Context {
                rax: state[0],
                rbx: state[1],
                rcx: state[2],
                rdx: state[3],
                rdi: state[4],
                rsi: state[5],
                rbp: state[6],
                rsp: state[7],
                r8: state[8],
                r9: state[9],
                r10: state[10],
                r11: state[11],
                r12: state[12],
                r13: state[13],
                r14: state[14],
                r15: state[15],
                rip: state[16],
                rflags: state[17],
                cs: state[18],
                fs: state[19],
                gs: state[20],
            }))
        }

        #[cfg(target_arch = "aarch64")]
        {
            use crate::types::Arm64Context;

            // x0-x28, fp, lr, sp, pc (33 u64) then cpsr+flags (u32 each).
            let mut state = [0u64; 34];
            let mut count = constants::ARM_THREAD_STATE64_COUNT;
            let kr = ffi::thread_get_state(
                port,
                constants::ARM_THREAD_STATE64,
                state.as_mut_ptr() as *mut libc::natural_t,
                &mut count,
            );
            if kr != KERN_SUCCESS {
                return None;
            }

            let mut x = [0u64; 29];
            x.copy_from_slice(&state[..29]);
            Some(CpuContext::Arm64(Arm64Context {
                x,
                fp: state[29],
                lr: state[30],
                sp: state[31],
                pc: state[32],
                cpsr: state[33] & 0xffff_ffff,
            }))
        }

        #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
        {
            let _ = port;
            None
        }
    }
}

/// Suspend a foreign thread, copy its register context, and resume it.
///
/// The suspension window is exactly the `thread_get_state` call; the guard
/// resumes the target on every exit path.
pub(crate) fn capture_thread_context(sys_id: ThreadSysId) -> Option<CpuContext>
{
    if sys_id.is_invalid() || sys_id == current_thread_sys_id() {
        return None;
    }

    let port = sys_id.raw() as thread_act_t;
    let guard = ThreadSuspendGuard::new(port).ok()?;
    let context = thread_state_for_port(port);
    let _ = guard.resume();
    context
}

/// Enumerate loaded images via the dyld APIs, returning `true` when the
/// cache capacity was exceeded.
pub(crate) fn refresh_modules(cache: &mut Vec<ModuleInfo>) -> bool
{
    let count = unsafe { ffi::_dyld_image_count() };
    let mut truncated = false;

    for index in 0..count {
        if cache.len() >= MODULE_CACHE_CAPACITY {
            truncated = true;
            break;
        }

        unsafe {
            let header = ffi::_dyld_get_image_header(index);
            if header.is_null() {
                continue;
            }
            let slide = ffi::_dyld_get_image_vmaddr_slide(index) as i64;

            // Span the LC_SEGMENT_64 commands, ignoring __PAGEZERO.
            let mut lo = u64::MAX;
            let mut hi = 0u64;
            let mut cmd_ptr = (header as *const u8).add(mem::size_of::<ffi::MachHeader64>());
            for _ in 0..(*header).ncmds {
                let cmd = &*(cmd_ptr as *const ffi::LoadCommand);
                if cmd.cmd == ffi::LC_SEGMENT_64 {
                    let seg = &*(cmd_ptr as *const ffi::SegmentCommand64);
                    if &seg.segname[..10] != b"__PAGEZERO" {
                        lo = lo.min(seg.vmaddr);
                        hi = hi.max(seg.vmaddr.saturating_add(seg.vmsize));
                    }
                }
                cmd_ptr = cmd_ptr.add(cmd.cmdsize as usize);
            }
            if hi == 0 {
                continue;
            }

            let mut m = ModuleInfo::empty();
            m.base = Address::new((lo as i64).wrapping_add(slide) as u64);
            m.size = hi - lo;

            let name = ffi::_dyld_get_image_name(index);
            if !name.is_null() {
                if let Ok(path) = CStr::from_ptr(name).to_str() {
                    m.path.push_str(path);
                }
            }
            let base_name = m.path.as_str().rsplit('/').next().unwrap_or("");
            m.name.push_str(base_name);
            m.permissions.push_str("r-x");

            cache.push(m);
        }
    }

    truncated
}

// `p_flag` bit marking a traced process in `extern_proc`.
const P_TRACED: i32 = 0x0000_0800;

/// Best-effort debugger detection via `sysctl(KERN_PROC_PID)`.
pub(crate) fn debugger_present() -> bool
{
    unsafe {
        let mut info: libc::kinfo_proc = mem::zeroed();
        let mut size = mem::size_of::<libc::kinfo_proc>();
        let mut name = [libc::CTL_KERN, libc::KERN_PROC, libc::KERN_PROC_PID, libc::getpid()];

        let rc = libc::sysctl(
            name.as_mut_ptr(),
            name.len() as u32,
            &mut info as *mut libc::kinfo_proc as *mut c_void,
            &mut size,
            std::ptr::null_mut(),
            0,
        );

        rc == 0 && (info.kp_proc.p_flag & P_TRACED) != 0
    }
}

/// Iterate every process on the system via `proc_listpids`/`proc_pidpath`.
pub(crate) fn for_each_process(f: &mut dyn FnMut(u32, &str)) -> bool
{
    const PROC_ALL_PIDS: u32 = 1;

    let mut pids = [0 as libc::pid_t; 1024];
    let bytes = unsafe {
        ffi::proc_listpids(
            PROC_ALL_PIDS,
            0,
            pids.as_mut_ptr() as *mut c_void,
            mem::size_of_val(&pids) as c_int,
        )
    };
    if bytes <= 0 {
        return false;
    }

    let count = (bytes as usize / mem::size_of::<libc::pid_t>()).min(pids.len());
    let mut any = false;

    for pid in &pids[..count] {
        if *pid <= 0 {
            continue;
        }
        let mut buf = [0u8; 1024];
        let len = unsafe { ffi::proc_pidpath(*pid, buf.as_mut_ptr() as *mut c_void, buf.len() as u32) };
        if len > 0 {
            if let Ok(path) = std::str::from_utf8(&buf[..len as usize]) {
                any = true;
                f(*pid as u32, path);
            }
        }
    }

    any
}

/// Filesystem path of the current executable.
pub(crate) fn process_path(out: &mut FixedString<256>)
{
    out.clear();
    let mut buf = [0u8; 1024];
    let len = unsafe { ffi::proc_pidpath(libc::getpid(), buf.as_mut_ptr() as *mut c_void, buf.len() as u32) };
    if len > 0 {
        if let Ok(path) = std::str::from_utf8(&buf[..len as usize]) {
            out.push_str(path);
        }
    }
}

/// Product version via `sysctl` with a `uname` fallback.
pub(crate) fn os_version(out: &mut FixedString<128>)
{
    use std::fmt::Write as _;

    out.clear();

    let mut buf = [0u8; 64];
    let mut size = buf.len();
    let rc = unsafe {
        libc::sysctlbyname(
            b"kern.osproductversion\0".as_ptr() as *const libc::c_char,
            buf.as_mut_ptr() as *mut c_void,
            &mut size,
            std::ptr::null_mut(),
            0,
        )
    };

    if rc == 0 && size > 1 {
        let version = std::str::from_utf8(&buf[..size - 1]).unwrap_or("");
        let _ = write!(out, "macOS {version}");
        return;
    }

    let mut uts: libc::utsname = unsafe { mem::zeroed() };
    if unsafe { libc::uname(&mut uts) } == 0 {
        let release = unsafe { CStr::from_ptr(uts.release.as_ptr()) };
        let _ = write!(out, "Darwin {}", release.to_str().unwrap_or("unknown"));
    } else {
        out.push_str("unknown");
    }
}

/// Online processor count.
pub(crate) fn processor_count() -> u32
{
    let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if n > 0 {
        n as u32
    } else {
        0
    }
}

/// Total physical memory in bytes via `hw.memsize`.
pub(crate) fn physical_memory_bytes() -> u64
{
    let mut value: u64 = 0;
    let mut size = mem::size_of::<u64>();
    let rc = unsafe {
        libc::sysctlbyname(
            b"hw.memsize\0".as_ptr() as *const libc::c_char,
            &mut value as *mut u64 as *mut c_void,
            &mut size,
            std::ptr::null_mut(),
            0,
        )
    };
    if rc == 0 {
        value
    } else {
        0
    }
}

/// Minidump emission is not supported on this platform; the report records
/// the dump as unavailable. Simulated faults still create the file so path
/// templating stays observable.
pub(crate) fn write_minidump(path: &str, raw: &crate::platform::RawFault, _flags: u32) -> bool
{
    if matches!(raw.detail, FaultDetail::Simulated) {
        return std::fs::File::create(path).is_ok();
    }
    false
}
