//! # Linux Platform Implementation
//!
//! Linux-specific leaf operations for the crash capture subsystem.
//!
//! The trap model here is POSIX signal interception (see [`signal`]); the
//! enumeration and geometry queries below go through `/proc`,
//! `dl_iterate_phdr`, and the pthread APIs. Everything reachable from the
//! fault-handling window reads through raw file descriptors and stack
//! buffers: `/proc` traversal uses `getdents64` directly instead of
//! `readdir(3)` because the libc directory stream allocates.
//!
//! ## APIs Used
//!
//! - **sigaction / sigaltstack**: fault interception (see `signal.rs`)
//! - **dl_iterate_phdr()**: loaded-module enumeration
//! - **pthread_getattr_np()**: stack bounds
//! - **/proc/self/task + getdents64**: thread enumeration
//! - **fork + ptrace (via minidump-writer)**: dump emission (see `dump.rs`)

mod dump;
pub(crate) mod signal;

use std::ffi::CStr;
use std::fmt::Write as _;
use std::mem;

use libc::{c_char, c_int, c_void};

use crate::types::{
    Address, CpuContext, FixedString, ModuleInfo, StackBounds, ThreadHandle, ThreadSysId, MODULE_CACHE_CAPACITY,
};

pub(crate) use dump::write_minidump;
pub(crate) use signal::{install_trap, remove_trap, TrapState};

/// Kernel thread id of the calling thread.
pub(crate) fn current_thread_sys_id() -> ThreadSysId
{
    let tid = unsafe { libc::syscall(libc::SYS_gettid) };
    ThreadSysId::new(tid as u64)
}

/// Pthread handle of the calling thread.
pub(crate) fn current_thread_handle() -> ThreadHandle
{
    ThreadHandle::new(unsafe { libc::pthread_self() } as u64)
}

/// Map a kernel thread id to a pthread handle.
///
/// Linux has no portable mapping for foreign threads, so only the calling
/// thread resolves; everything else yields the invalid handle and callers
/// degrade.
pub(crate) fn thread_handle_for_sys_id(sys_id: ThreadSysId) -> ThreadHandle
{
    if sys_id == current_thread_sys_id() {
        current_thread_handle()
    } else {
        ThreadHandle::INVALID
    }
}

/// Map a pthread handle to a kernel thread id (calling thread only).
pub(crate) fn thread_sys_id_for_handle(handle: ThreadHandle) -> ThreadSysId
{
    if handle == current_thread_handle() {
        current_thread_sys_id()
    } else {
        ThreadSysId::INVALID
    }
}

/// Stack bounds for the given pthread (the calling thread when invalid).
///
/// `pthread_getattr_np` answers for any live pthread handle we hold; failure
/// yields `None` and callers fall back to heuristics.
pub(crate) fn thread_stack_bounds(handle: ThreadHandle) -> Option<StackBounds>
{
    let thread = if handle.is_invalid() {
        unsafe { libc::pthread_self() }
    } else {
        handle.raw() as libc::pthread_t
    };

    unsafe {
        let mut attr: libc::pthread_attr_t = mem::zeroed();
        if libc::pthread_getattr_np(thread, &mut attr) != 0 {
            return None;
        }

        let mut stack_addr: *mut c_void = std::ptr::null_mut();
        let mut stack_size: libc::size_t = 0;
        let rc = libc::pthread_attr_getstack(&attr, &mut stack_addr, &mut stack_size);
        libc::pthread_attr_destroy(&mut attr);

        if rc != 0 || stack_addr.is_null() {
            return None;
        }

        // pthread reports the lowest address; the base is the high end.
        let limit = stack_addr as u64;
        Some(StackBounds {
            base: Address::new(limit + stack_size as u64),
            limit: Address::new(limit),
        })
    }
}

/// Thread name via `/proc/self/task/<tid>/comm`.
///
/// Works for any thread of the current process without needing its pthread
/// handle, and reads through a raw descriptor so it is usable from the
/// handling window. An unreadable name leaves `out` empty.
pub(crate) fn thread_name(sys_id: ThreadSysId, out: &mut FixedString<32>)
{
    out.clear();
    if sys_id.is_invalid() {
        return;
    }

    let mut path = FixedString::<64>::new();
    let _ = write!(path, "/proc/self/task/{}/comm", sys_id.raw());

    let mut buf = [0u8; 32];
    if let Some(n) = read_file_raw(path.as_str(), &mut buf) {
        let text = std::str::from_utf8(&buf[..n]).unwrap_or("");
        out.push_str(text.trim_end_matches('\n'));
    }
}

/// Scheduler run state of a thread, from `/proc/self/task/<tid>/stat`.
pub(crate) fn thread_run_state(sys_id: ThreadSysId, out: &mut FixedString<64>)
{
    out.clear();

    let mut path = FixedString::<64>::new();
    let _ = write!(path, "/proc/self/task/{}/stat", sys_id.raw());

    let mut buf = [0u8; 512];
    let Some(n) = read_file_raw(path.as_str(), &mut buf) else {
        out.push_str("unknown");
        return;
    };

    // Field 3 follows the parenthesized comm, which may itself contain
    // spaces; scan from the last ')'.
    let text = &buf[..n];
    let state = text
        .iter()
        .rposition(|&b| b == b')')
        .and_then(|pos| text.get(pos + 2))
        .copied();

    let label = match state {
        Some(b'R') => "running",
        Some(b'S') => "sleeping",
        Some(b'D') => "disk sleep",
        Some(b'T') | Some(b't') => "stopped",
        Some(b'Z') => "zombie",
        Some(b'X') => "dead",
        _ => "unknown",
    };
    out.push_str(label);
}

/// Enumerate the threads of this process from `/proc/self/task`.
///
/// Fills the provided slices up to their lengths and returns the required
/// count. Thread handles are only resolvable for the calling thread; other
/// entries receive the invalid handle.
pub(crate) fn thread_list(mut handles: Option<&mut [ThreadHandle]>, mut sys_ids: Option<&mut [ThreadSysId]>) -> usize
{
    let current_id = current_thread_sys_id();
    let current_handle = current_thread_handle();
    let mut count = 0usize;

    for_each_dirent(b"/proc/self/task\0", |name| {
        let Some(tid) = parse_decimal(name) else {
            return;
        };

        if let Some(ids) = sys_ids.as_deref_mut() {
            if count < ids.len() {
                ids[count] = ThreadSysId::new(tid);
            }
        }
        if let Some(hs) = handles.as_deref_mut() {
            if count < hs.len() {
                hs[count] = if ThreadSysId::new(tid) == current_id {
                    current_handle
                } else {
                    ThreadHandle::INVALID
                };
            }
        }
        count += 1;
    });

    count
}

/// Register-context capture for a foreign thread.
///
/// Linux offers no same-process thread suspension or register read (ptrace
/// refuses to attach within one thread group), so this degrades to `None`
/// and callers report the backtrace as unavailable. The faulting thread's
/// own context always arrives through the signal frame instead.
pub(crate) fn capture_thread_context(_sys_id: ThreadSysId) -> Option<CpuContext>
{
    None
}

// ELF program header flag bits (not exported by libc).
const PF_X: u32 = 0x1;
const PF_W: u32 = 0x2;
const PF_R: u32 = 0x4;

struct ModuleFill<'a>
{
    cache: &'a mut Vec<ModuleInfo>,
    truncated: bool,
}

/// Enumerate loaded modules via `dl_iterate_phdr`, returning `true` when the
/// cache capacity was exceeded.
pub(crate) fn refresh_modules(cache: &mut Vec<ModuleInfo>) -> bool
{
    let mut fill = ModuleFill { cache, truncated: false };

    unsafe extern "C" fn callback(info: *mut libc::dl_phdr_info, _size: libc::size_t, data: *mut c_void) -> c_int
    {
        let fill = unsafe { &mut *(data as *mut ModuleFill<'_>) };
        let info = unsafe { &*info };

        if fill.cache.len() >= MODULE_CACHE_CAPACITY {
            fill.truncated = true;
            return 0;
        }

        let mut lo = u64::MAX;
        let mut hi = 0u64;
        let mut exec_flags = 0u32;
        for i in 0..info.dlpi_phnum {
            let ph = unsafe { &*info.dlpi_phdr.add(i as usize) };
            if ph.p_type == libc::PT_LOAD {
                lo = lo.min(ph.p_vaddr);
                hi = hi.max(ph.p_vaddr.saturating_add(ph.p_memsz));
                if ph.p_flags & PF_X != 0 {
                    exec_flags = ph.p_flags;
                }
            }
        }
        if hi == 0 {
            return 0;
        }

        let mut m = ModuleInfo::empty();
        m.base = Address::new(info.dlpi_addr.saturating_add(lo));
        m.size = hi - lo;

        let name = unsafe { CStr::from_ptr(info.dlpi_name) };
        match name.to_str() {
            // The empty name is the main executable.
            Ok("") | Err(_) => {
                let mut buf = [0u8; 256];
                if let Some(path) = read_link_raw(b"/proc/self/exe\0", &mut buf) {
                    m.path.push_str(path);
                }
            }
            Ok(path) => m.path.push_str(path),
        }

        let base_name = m.path.as_str().rsplit('/').next().unwrap_or("");
        m.name.push_str(base_name);

        if exec_flags != 0 {
            if exec_flags & PF_R != 0 {
                m.permissions.push_str("r");
            }
            if exec_flags & PF_W != 0 {
                m.permissions.push_str("w");
            }
            m.permissions.push_str("x");
        }

        fill.cache.push(m);
        0
    }

    unsafe {
        libc::dl_iterate_phdr(Some(callback), &mut fill as *mut ModuleFill<'_> as *mut c_void);
    }

    fill.truncated
}

/// Best-effort debugger detection from `/proc/self/status` (`TracerPid`).
pub(crate) fn debugger_present() -> bool
{
    let mut buf = [0u8; 4096];
    let Some(n) = read_file_raw("/proc/self/status", &mut buf) else {
        return false;
    };

    let text = std::str::from_utf8(&buf[..n]).unwrap_or("");
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("TracerPid:") {
            return rest.trim().parse::<u32>().map(|pid| pid != 0).unwrap_or(false);
        }
    }
    false
}

/// Iterate every process visible in `/proc`, passing `(pid, image path)` to
/// the callback. Returns `true` if at least one process was reported.
pub(crate) fn for_each_process(f: &mut dyn FnMut(u32, &str)) -> bool
{
    let mut any = false;

    for_each_dirent(b"/proc\0", |name| {
        let Some(pid) = parse_decimal(name) else {
            return;
        };

        let mut link = FixedString::<64>::new();
        let _ = write!(link, "/proc/{pid}/exe");

        let mut link_path = [0u8; 80];
        let link_bytes = to_cstr_bytes(link.as_str(), &mut link_path);

        let mut buf = [0u8; 256];
        let path = link_bytes.and_then(|cstr| read_link_raw(cstr, &mut buf));

        match path {
            Some(path) => {
                any = true;
                f(pid as u32, path);
            }
            None => {
                // Unreadable exe link (typically another user's process);
                // fall back to the comm name.
                let mut comm = FixedString::<64>::new();
                let _ = write!(comm, "/proc/{pid}/comm");
                let mut comm_buf = [0u8; 64];
                if let Some(n) = read_file_raw(comm.as_str(), &mut comm_buf) {
                    let text = std::str::from_utf8(&comm_buf[..n]).unwrap_or("").trim_end_matches('\n');
                    any = true;
                    f(pid as u32, text);
                }
            }
        }
    });

    any
}

/// Filesystem path of the current executable.
pub(crate) fn process_path(out: &mut FixedString<256>)
{
    out.clear();
    let mut buf = [0u8; 256];
    if let Some(path) = read_link_raw(b"/proc/self/exe\0", &mut buf) {
        out.push_str(path);
    }
}

/// Kernel name and release via `uname`.
pub(crate) fn os_version(out: &mut FixedString<128>)
{
    out.clear();

    let mut uts: libc::utsname = unsafe { mem::zeroed() };
    if unsafe { libc::uname(&mut uts) } != 0 {
        out.push_str("unknown");
        return;
    }

    let sysname = unsafe { CStr::from_ptr(uts.sysname.as_ptr()) };
    let release = unsafe { CStr::from_ptr(uts.release.as_ptr()) };
    let machine = unsafe { CStr::from_ptr(uts.machine.as_ptr()) };
    let _ = write!(
        out,
        "{} {} {}",
        sysname.to_str().unwrap_or("unknown"),
        release.to_str().unwrap_or(""),
        machine.to_str().unwrap_or("")
    );
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

/// Total physical memory in bytes.
pub(crate) fn physical_memory_bytes() -> u64
{
    let pages = unsafe { libc::sysconf(libc::_SC_PHYS_PAGES) };
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) };
    if pages > 0 && page_size > 0 {
        pages as u64 * page_size as u64
    } else {
        0
    }
}

// ---------------------------------------------------------------------------
// Raw /proc helpers. These use open/read/readlink/getdents64 directly so no
// libc buffered stream (and therefore no allocation) is involved.
// ---------------------------------------------------------------------------

/// Read up to `buf.len()` bytes of `path`. Returns the byte count.
fn read_file_raw(path: &str, buf: &mut [u8]) -> Option<usize>
{
    let mut path_buf = [0u8; 128];
    let cstr = to_cstr_bytes(path, &mut path_buf)?;

    let fd = unsafe { libc::open(cstr.as_ptr() as *const c_char, libc::O_RDONLY | libc::O_CLOEXEC) };
    if fd < 0 {
        return None;
    }

    let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut c_void, buf.len()) };
    unsafe { libc::close(fd) };

    if n < 0 {
        None
    } else {
        Some(n as usize)
    }
}

/// `readlink` into a fixed buffer, returning the target as `&str`.
fn read_link_raw<'a>(path_cstr: &[u8], buf: &'a mut [u8]) -> Option<&'a str>
{
    debug_assert_eq!(path_cstr.last(), Some(&0));

    let n = unsafe {
        libc::readlink(
            path_cstr.as_ptr() as *const c_char,
            buf.as_mut_ptr() as *mut c_char,
            buf.len(),
        )
    };
    if n <= 0 || n as usize >= buf.len() {
        return None;
    }
    std::str::from_utf8(&buf[..n as usize]).ok()
}

/// Copy `s` into `buf` with a trailing NUL, returning the slice.
fn to_cstr_bytes<'a>(s: &str, buf: &'a mut [u8]) -> Option<&'a [u8]>
{
    if s.len() + 1 > buf.len() {
        return None;
    }
    buf[..s.len()].copy_from_slice(s.as_bytes());
    buf[s.len()] = 0;
    Some(&buf[..s.len() + 1])
}

/// Walk a directory with `getdents64`, passing each entry name (bytes,
/// without NUL) to the callback.
fn for_each_dirent(path_cstr: &[u8], mut f: impl FnMut(&[u8]))
{
    debug_assert_eq!(path_cstr.last(), Some(&0));

    let fd = unsafe {
        libc::open(
            path_cstr.as_ptr() as *const c_char,
            libc::O_RDONLY | libc::O_DIRECTORY | libc::O_CLOEXEC,
        )
    };
    if fd < 0 {
        return;
    }

    let mut buf = [0u8; 4096];
    loop {
        let n = unsafe { libc::syscall(libc::SYS_getdents64, fd, buf.as_mut_ptr(), buf.len()) };
        if n <= 0 {
            break;
        }

        // struct linux_dirent64: d_ino(8) d_off(8) d_reclen(2) d_type(1) d_name...
        let mut off = 0usize;
        while off + 19 <= n as usize {
            let reclen = u16::from_ne_bytes([buf[off + 16], buf[off + 17]]) as usize;
            if reclen == 0 || off + reclen > n as usize {
                break;
            }

            let name_start = off + 19;
            let name_end = buf[name_start..off + reclen]
                .iter()
                .position(|&b| b == 0)
                .map(|p| name_start + p)
                .unwrap_or(off + reclen);
            f(&buf[name_start..name_end]);

            off += reclen;
        }
    }

    unsafe { libc::close(fd) };
}

/// Parse an all-digits byte slice as a decimal number.
fn parse_decimal(bytes: &[u8]) -> Option<u64>
{
    if bytes.is_empty() {
        return None;
    }
    let mut value = 0u64;
    for &b in bytes {
        if !b.is_ascii_digit() {
            return None;
        }
        value = value.checked_mul(10)?.checked_add((b - b'0') as u64)?;
    }
    Some(value)
}
