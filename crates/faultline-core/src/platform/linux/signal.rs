//! # Signal-Based Fault Trap
//!
//! The Linux incarnation of the process-wide fault interceptor: `sigaction`
//! handlers for the hardware fault signals, delivered on a dedicated
//! alternate stack so stack overflow can still be reported.
//!
//! Installation saves the previous `sigaction` record for every trapped
//! signal and restores it verbatim at removal. While installed, a caught
//! fault is forwarded into the registered `ExceptionHandler`; whatever the
//! handler declines (user-sent signals, re-entrant faults, paused handling,
//! a `Throw` response) is chained to the previously installed handler, or to
//! the OS default disposition when there was none.
//!
//! The handler function is a free function, not a method: the kernel calls
//! it with a bare C ABI.

use std::mem;
use std::ptr;

use libc::{c_int, c_void};
use tracing::debug;

use crate::error::{FaultlineError, FaultlineResult};
use crate::handler;
use crate::platform::{FaultDisposition, FaultPayload, RawFault};
use crate::types::{Address, Arm64Context, CpuContext, FaultDetail, X86_64Context};

use super::{current_thread_handle, current_thread_sys_id};

/// The fault signals the trap intercepts.
pub(crate) const TRAPPED_SIGNALS: [c_int; 6] = [
    libc::SIGSEGV,
    libc::SIGBUS,
    libc::SIGFPE,
    libc::SIGILL,
    libc::SIGTRAP,
    libc::SIGABRT,
];

/// Alternate signal stack size. Generous because the whole handling
/// sequence (context capture, stack walk, report composition with its stack
/// buffers) runs on it when the faulting thread's own stack is gone.
const ALT_STACK_SIZE: usize = 256 * 1024;

// `si_code` values identifying user-sent (non-fault) signals.
const SI_USER: c_int = 0;
const SI_QUEUE: c_int = -1;
const SI_TKILL: c_int = -6;

/// Previous signal dispositions, readable from the signal handler.
///
/// Written only while installing/removing the trap, which happens before any
/// fault can be dispatched and under the handler registration exclusivity.
struct PreviousActions
{
    actions: [libc::sigaction; TRAPPED_SIGNALS.len()],
    valid: bool,
}

struct ActionCell(std::cell::UnsafeCell<PreviousActions>);

// Single-writer (install/remove), reads only from the signal handler after
// installation. The registration slot ordering makes this sound.
unsafe impl Sync for ActionCell {}

static PREVIOUS_ACTIONS: ActionCell = ActionCell(std::cell::UnsafeCell::new(PreviousActions {
    actions: unsafe { mem::zeroed() },
    valid: false,
}));

/// Installed-trap bookkeeping, owned by the enabled `ExceptionHandler`.
pub(crate) struct TrapState
{
    previous_stack: libc::stack_t,
    alt_stack: *mut c_void,
}

// The raw pointer is an mmap'd region owned by this state.
unsafe impl Send for TrapState {}

/// Register the process-wide signal trap.
///
/// Sets up the alternate stack, then installs our handler for every fault
/// signal, saving each previous disposition for restoration and forwarding.
pub(crate) fn install_trap() -> FaultlineResult<TrapState>
{
    unsafe {
        // Alternate stack first: the handlers are installed with SA_ONSTACK.
        let alt_stack = libc::mmap(
            ptr::null_mut(),
            ALT_STACK_SIZE,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        );
        if alt_stack == libc::MAP_FAILED {
            return Err(FaultlineError::TrapInstallFailed("mmap for sigaltstack failed".into()));
        }

        let new_stack = libc::stack_t {
            ss_sp: alt_stack,
            ss_flags: 0,
            ss_size: ALT_STACK_SIZE,
        };
        let mut previous_stack: libc::stack_t = mem::zeroed();
        if libc::sigaltstack(&new_stack, &mut previous_stack) != 0 {
            libc::munmap(alt_stack, ALT_STACK_SIZE);
            return Err(FaultlineError::TrapInstallFailed("sigaltstack failed".into()));
        }

        let previous = &mut *PREVIOUS_ACTIONS.0.get();

        let mut action: libc::sigaction = mem::zeroed();
        action.sa_sigaction = trap_signal_handler as libc::sighandler_t;
        action.sa_flags = libc::SA_SIGINFO | libc::SA_ONSTACK;
        libc::sigemptyset(&mut action.sa_mask);

        for (i, signo) in TRAPPED_SIGNALS.iter().enumerate() {
            if libc::sigaction(*signo, &action, &mut previous.actions[i]) != 0 {
                // Roll back the ones already replaced.
                for (j, prev_signo) in TRAPPED_SIGNALS.iter().enumerate().take(i) {
                    libc::sigaction(*prev_signo, &previous.actions[j], ptr::null_mut());
                }
                libc::sigaltstack(&previous_stack, ptr::null_mut());
                libc::munmap(alt_stack, ALT_STACK_SIZE);
                return Err(FaultlineError::TrapInstallFailed(format!(
                    "sigaction failed for signal {signo}"
                )));
            }
        }
        previous.valid = true;

        debug!("signal trap installed for {} signals", TRAPPED_SIGNALS.len());

        Ok(TrapState {
            previous_stack,
            alt_stack,
        })
    }
}

/// Restore the previous handler chain and tear down the alternate stack.
pub(crate) fn remove_trap(state: &mut TrapState) -> FaultlineResult<()>
{
    unsafe {
        let previous = &mut *PREVIOUS_ACTIONS.0.get();
        if previous.valid {
            for (i, signo) in TRAPPED_SIGNALS.iter().enumerate() {
                if libc::sigaction(*signo, &previous.actions[i], ptr::null_mut()) != 0 {
                    return Err(FaultlineError::TrapRemoveFailed(format!(
                        "sigaction restore failed for signal {signo}"
                    )));
                }
            }
            previous.valid = false;
        }

        libc::sigaltstack(&state.previous_stack, ptr::null_mut());
        if !state.alt_stack.is_null() {
            libc::munmap(state.alt_stack, ALT_STACK_SIZE);
            state.alt_stack = ptr::null_mut();
        }
    }

    debug!("signal trap removed");
    Ok(())
}

/// The free-function interception point the kernel delivers faults to.
extern "C" fn trap_signal_handler(signo: c_int, info: *mut libc::siginfo_t, uctx: *mut c_void)
{
    if info.is_null() || uctx.is_null() {
        forward_to_previous(signo, info, uctx);
        return;
    }

    let si = unsafe { &*info };

    // Signals raised by userland (kill, tgkill, sigqueue) are notifications,
    // not hardware faults; decline without touching handler state. SIGABRT
    // is the exception: abort() reports as user-sent but is a real fault.
    let user_sent = matches!(si.si_code, SI_USER | SI_QUEUE | SI_TKILL);
    if user_sent && signo != libc::SIGABRT {
        forward_to_previous(signo, info, uctx);
        return;
    }

    let context = context_from_ucontext(uctx);
    let instruction = context.instruction_pointer().unwrap_or(Address::ZERO);

    // The fault address is only meaningful for access violations; the
    // instruction address stands in otherwise.
    let memory = if signo == libc::SIGSEGV || signo == libc::SIGBUS {
        Address::new(unsafe { si.si_addr() } as u64)
    } else {
        instruction
    };

    let raw = RawFault {
        detail: FaultDetail::Signal { signo, code: si.si_code },
        context,
        thread_handle: current_thread_handle(),
        thread_sys_id: current_thread_sys_id(),
        instruction,
        memory,
        payload: FaultPayload::Signal {
            siginfo: info as *const libc::siginfo_t,
            ucontext: uctx as *const c_void,
        },
    };

    match handler::dispatch_fault(&raw) {
        FaultDisposition::Resume => (),
        FaultDisposition::Forward => forward_to_previous(signo, info, uctx),
    }
}

/// Chain a declined fault to the previously installed handler.
///
/// `SIG_DFL` is reinstated and the signal re-raised so the kernel applies
/// the default disposition (core dump, termination); a previous `SA_SIGINFO`
/// or classic handler is invoked directly.
fn forward_to_previous(signo: c_int, info: *mut libc::siginfo_t, uctx: *mut c_void)
{
    let index = TRAPPED_SIGNALS.iter().position(|s| *s == signo);

    let previous = index.and_then(|i| {
        let actions = unsafe { &*PREVIOUS_ACTIONS.0.get() };
        if actions.valid {
            Some(actions.actions[i])
        } else {
            None
        }
    });

    unsafe {
        match previous {
            Some(prev) if prev.sa_sigaction == libc::SIG_DFL => {
                libc::sigaction(signo, &prev, ptr::null_mut());
                // Returning re-executes the faulting instruction for hardware
                // faults; software-raised signals need an explicit re-raise.
                libc::raise(signo);
            }
            Some(prev) if prev.sa_sigaction == libc::SIG_IGN => (),
            Some(prev) if prev.sa_flags & libc::SA_SIGINFO != 0 => {
                let chained: extern "C" fn(c_int, *mut libc::siginfo_t, *mut c_void) = mem::transmute(prev.sa_sigaction);
                chained(signo, info, uctx);
            }
            Some(prev) if prev.sa_sigaction != 0 => {
                let chained: extern "C" fn(c_int) = mem::transmute(prev.sa_sigaction);
                chained(signo);
            }
            _ => {
                // No saved chain: fall back to the default disposition.
                let mut dfl: libc::sigaction = mem::zeroed();
                dfl.sa_sigaction = libc::SIG_DFL;
                libc::sigaction(signo, &dfl, ptr::null_mut());
                libc::raise(signo);
            }
        }
    }
}

/// Copy the register file out of the signal frame's `ucontext_t`.
#[cfg(target_arch = "x86_64")]
fn context_from_ucontext(uctx: *mut c_void) -> CpuContext
{
    let uc = unsafe { &*(uctx as *const libc::ucontext_t) };
    let gregs = &uc.uc_mcontext.gregs;

    let reg = |idx: c_int| gregs[idx as usize] as u64;

    CpuContext::X86_64(X86_64Context {
        rax: reg(libc::REG_RAX),
        rbx: reg(libc::REG_RBX),
        rcx: reg(libc::REG_RCX),
        rdx: reg(libc::REG_RDX),
        rdi: reg(libc::REG_RDI),
        rsi: reg(libc::REG_RSI),
        rbp: reg(libc::REG_RBP),
        rsp: reg(libc::REG_RSP),
        r8: reg(libc::REG_R8),
        r9: reg(libc::REG_R9),
        r10: reg(libc::REG_R10),
        r11: reg(libc::REG_R11),
        r12: reg(libc::REG_R12),
        r13: reg(libc::REG_R13),
        r14: reg(libc::REG_R14),
        r15: reg(libc::REG_R15),
        rip: reg(libc::REG_RIP),
        rflags: reg(libc::REG_EFL),
        cs: reg(libc::REG_CSGSFS) & 0xffff,
        fs: (reg(libc::REG_CSGSFS) >> 32) & 0xffff,
        gs: (reg(libc::REG_CSGSFS) >> 16) & 0xffff,
    })
}

#[cfg(target_arch = "aarch64")]
fn context_from_ucontext(uctx: *mut c_void) -> CpuContext
{
    let uc = unsafe { &*(uctx as *const libc::ucontext_t) };
    let mc = &uc.uc_mcontext;

    let mut x = [0u64; 29];
    x.copy_from_slice(&mc.regs[..29]);

    CpuContext::Arm64(Arm64Context {
        x,
        fp: mc.regs[29],
        lr: mc.regs[30],
        sp: mc.sp,
        pc: mc.pc,
        cpsr: mc.pstate,
    })
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
fn context_from_ucontext(_uctx: *mut c_void) -> CpuContext
{
    CpuContext::Unavailable
}
