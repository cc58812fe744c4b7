//! # Minidump Emission
//!
//! Writes a breakpad-compatible binary dump of the faulting process through
//! the `minidump-writer` crate.
//!
//! A process cannot ptrace its own thread group, so the dump is produced the
//! way breakpad's Linux client does it: fork a child at fault time and let
//! the child attach to (and dump) the parent. The parent only forks and
//! waits, both async-signal-safe; all the allocating work happens in the
//! child, whose heap is a fresh copy no longer contended by the faulting
//! thread.

use std::fs::File;

use minidump_writer::crash_context::CrashContext;
use minidump_writer::minidump_writer::MinidumpWriter;

use crate::platform::{FaultPayload, RawFault};

// prctl options controlling who may ptrace this process (Yama LSM).
const PR_SET_PTRACER: libc::c_int = 0x5961_6d61;
const PR_SET_PTRACER_ANY: libc::c_ulong = libc::c_ulong::MAX;

/// Write a minidump for the fault described by `raw` to `path`.
///
/// Returns `true` when the dump file was produced. For simulated faults
/// (no signal payload) the file is still created, empty, so path templating
/// stays observable; there is no thread state worth dumping in that case.
/// The content `flags` are accepted for configuration parity but the
/// breakpad-format writer has no equivalent knob, so they are unused here.
pub(crate) fn write_minidump(path: &str, raw: &RawFault, _flags: u32) -> bool
{
    let FaultPayload::Signal { siginfo, ucontext } = raw.payload else {
        return File::create(path).is_ok();
    };

    let parent_pid = unsafe { libc::getpid() };
    let crashed_tid = raw.thread_sys_id.raw() as libc::pid_t;

    unsafe {
        // Allow the about-to-be-forked child to attach despite Yama
        // ptrace_scope restrictions; reset once the dump is done.
        libc::prctl(PR_SET_PTRACER, PR_SET_PTRACER_ANY, 0, 0, 0);

        let child = libc::fork();
        match child {
            0 => {
                let ok = dump_parent(path, parent_pid, crashed_tid, siginfo, ucontext);
                libc::_exit(if ok { 0 } else { 1 });
            }
            pid if pid > 0 => {
                let mut status: libc::c_int = 0;
                libc::waitpid(pid, &mut status, 0);
                libc::prctl(PR_SET_PTRACER, 0, 0, 0, 0);
                libc::WIFEXITED(status) && libc::WEXITSTATUS(status) == 0
            }
            _ => {
                libc::prctl(PR_SET_PTRACER, 0, 0, 0, 0);
                false
            }
        }
    }
}

/// Runs in the forked child: attach to the parent and write the dump.
fn dump_parent(
    path: &str,
    pid: libc::pid_t,
    tid: libc::pid_t,
    siginfo: *const libc::siginfo_t,
    ucontext: *const libc::c_void,
) -> bool
{
    let Ok(mut file) = File::create(path) else {
        return false;
    };

    let context = unsafe { build_crash_context(pid, tid, siginfo, ucontext) };

    let mut writer = MinidumpWriter::new(pid, tid);
    writer.set_crash_context(CrashContext { inner: context });
    writer.dump(&mut file).is_ok()
}

/// Assemble the `crash-context` record from the raw signal payload.
unsafe fn build_crash_context(
    pid: libc::pid_t,
    tid: libc::pid_t,
    siginfo: *const libc::siginfo_t,
    ucontext: *const libc::c_void,
) -> crash_context::CrashContext
{
    let si = unsafe { &*siginfo };

    // The wire layout wants the signalfd flavor of siginfo; fill the fields
    // the dump consumers actually read.
    let mut ssi: libc::signalfd_siginfo = unsafe { std::mem::zeroed() };
    ssi.ssi_signo = si.si_signo as u32;
    ssi.ssi_errno = si.si_errno;
    ssi.ssi_code = si.si_code;
    ssi.ssi_addr = unsafe { si.si_addr() } as u64;

    let context = unsafe { (*(ucontext as *const crash_context::ucontext_t)).clone() };

    #[cfg(target_arch = "x86_64")]
    let float_state = {
        let fpregs = context.uc_mcontext.fpregs;
        if fpregs.is_null() {
            unsafe { std::mem::zeroed() }
        } else {
            unsafe { (*fpregs).clone() }
        }
    };

    // The FP/SIMD block lives in opaque reserved records on aarch64; the
    // dump stays useful without it.
    #[cfg(not(target_arch = "x86_64"))]
    let float_state = unsafe { std::mem::zeroed() };

    crash_context::CrashContext {
        context,
        float_state,
        siginfo: ssi,
        pid,
        tid,
    }
}
