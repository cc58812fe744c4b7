//! # Mach Exception-Port Trap
//!
//! The macOS incarnation of the process-wide fault interceptor: a receive
//! right registered as the task's exception port for the fault-class
//! exceptions, drained by a dedicated listener thread that blocks in
//! `mach_msg` for its entire enabled lifetime.
//!
//! Installation saves the previously registered (mask, port, behavior,
//! flavor) triples and restores them verbatim at removal. Shutdown is
//! cooperative: a private cancel message wakes the listener out of
//! `mach_msg`, the trap waits a bounded time for it to acknowledge, then
//! joins it. The thread is never force-killed.
//!
//! Faults belonging to another task (possible when a child inherits the
//! exception port) are forwarded to the saved ports rather than handled
//! here.

use std::mem::{self, MaybeUninit};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use libc::{c_int, mach_port_t, thread_act_t};
use mach2::exc::{__Reply__exception_raise_t, __Request__exception_raise_t};
use mach2::exception_types::{
    exception_mask_t, EXCEPTION_DEFAULT, EXC_BAD_ACCESS, EXC_MASK_ARITHMETIC, EXC_MASK_BAD_ACCESS,
    EXC_MASK_BAD_INSTRUCTION, EXC_MASK_CRASH,
};
use mach2::kern_return::{KERN_FAILURE, KERN_SUCCESS};
use mach2::mach_port::{mach_port_allocate, mach_port_insert_right};
use mach2::message::{
    mach_msg, mach_msg_header_t, mach_msg_size_t, MACH_MSGH_BITS, MACH_MSG_SUCCESS, MACH_MSG_TIMEOUT_NONE,
    MACH_MSG_TYPE_COPY_SEND, MACH_MSG_TYPE_MAKE_SEND, MACH_MSG_TYPE_MOVE_SEND_ONCE, MACH_RCV_INVALID_NAME,
    MACH_RCV_LARGE, MACH_RCV_MSG, MACH_RCV_PORT_DIED, MACH_SEND_MSG,
};
use mach2::ndr::NDR_record;
use mach2::port::{MACH_PORT_NULL, MACH_PORT_RIGHT_RECEIVE};
use mach2::traps::mach_task_self;
use tracing::{debug, error, warn};

use crate::error::{FaultlineError, FaultlineResult};
use crate::handler;
use crate::platform::macos::{constants, ffi};
use crate::platform::{FaultDisposition, FaultPayload, RawFault};
use crate::types::{Address, FaultDetail, ThreadHandle, ThreadSysId};

/// Exceptions the trap claims: the fault classes plus `EXC_CRASH` so abort
/// paths are reported too. Breakpoints stay with the debugger.
fn trap_mask() -> exception_mask_t
{
    EXC_MASK_BAD_ACCESS | EXC_MASK_BAD_INSTRUCTION | EXC_MASK_ARITHMETIC | EXC_MASK_CRASH
}

/// Previously registered exception-port triples, restored at removal and
/// used as the forwarding chain for declined faults.
#[derive(Clone, Copy)]
pub(crate) struct SavedExceptionPorts
{
    count: usize,
    masks: [exception_mask_t; constants::SAVED_PORT_CAPACITY],
    ports: [mach_port_t; constants::SAVED_PORT_CAPACITY],
    behaviors: [c_int; constants::SAVED_PORT_CAPACITY],
    flavors: [c_int; constants::SAVED_PORT_CAPACITY],
}

impl SavedExceptionPorts
{
    fn empty() -> Self
    {
        Self {
            count: 0,
            masks: [0; constants::SAVED_PORT_CAPACITY],
            ports: [MACH_PORT_NULL; constants::SAVED_PORT_CAPACITY],
            behaviors: [0; constants::SAVED_PORT_CAPACITY],
            flavors: [0; constants::SAVED_PORT_CAPACITY],
        }
    }
}

/// Installed-trap bookkeeping, owned by the enabled `ExceptionHandler`.
pub(crate) struct TrapState
{
    exception_port: mach_port_t,
    saved: SavedExceptionPorts,
    listener: Option<JoinHandle<()>>,
    should_continue: Arc<AtomicBool>,
    executing: Arc<AtomicBool>,
}

/// Allocate the exception port, save the previous registrations, register
/// ourselves, and start the listener thread.
pub(crate) fn install_trap() -> FaultlineResult<TrapState>
{
    unsafe {
        let task = mach_task_self();
        let mask = trap_mask();

        let mut port: mach_port_t = MACH_PORT_NULL;
        let kr = mach_port_allocate(task, MACH_PORT_RIGHT_RECEIVE, &mut port);
        if kr != KERN_SUCCESS {
            return Err(FaultlineError::TrapInstallFailed(format!(
                "mach_port_allocate failed: {kr}"
            )));
        }

        let kr = mach_port_insert_right(task, port, port, MACH_MSG_TYPE_MAKE_SEND);
        if kr != KERN_SUCCESS {
            let _ = ffi::mach_port_deallocate(task, port);
            return Err(FaultlineError::TrapInstallFailed(format!(
                "mach_port_insert_right failed: {kr}"
            )));
        }

        let mut saved = SavedExceptionPorts::empty();
        let mut count: libc::mach_msg_type_number_t = constants::SAVED_PORT_CAPACITY as libc::mach_msg_type_number_t;
        let kr = ffi::task_get_exception_ports(
            task,
            mask,
            saved.masks.as_mut_ptr(),
            &mut count,
            saved.ports.as_mut_ptr(),
            saved.behaviors.as_mut_ptr(),
            saved.flavors.as_mut_ptr(),
        );
        if kr != KERN_SUCCESS {
            let _ = ffi::mach_port_deallocate(task, port);
            return Err(FaultlineError::TrapInstallFailed(format!(
                "task_get_exception_ports failed: {kr}"
            )));
        }
        saved.count = count as usize;

        let kr = ffi::task_set_exception_ports(task, mask, port, EXCEPTION_DEFAULT as c_int, constants::THREAD_STATE_NONE);
        if kr != KERN_SUCCESS {
            let _ = ffi::mach_port_deallocate(task, port);
            return Err(FaultlineError::TrapInstallFailed(format!(
                "task_set_exception_ports failed: {kr}"
            )));
        }

        let should_continue = Arc::new(AtomicBool::new(true));
        let executing = Arc::new(AtomicBool::new(false));

        let listener = {
            let should_continue = Arc::clone(&should_continue);
            let executing = Arc::clone(&executing);
            let saved = saved;
            std::thread::Builder::new()
                .name("faultline-exception-listener".into())
                .spawn(move || listener_loop(port, saved, &should_continue, &executing))
                .map_err(|err| {
                    restore_saved_ports(&saved);
                    let _ = ffi::mach_port_deallocate(task, port);
                    FaultlineError::TrapInstallFailed(format!("listener thread spawn failed: {err}"))
                })?
        };

        debug!("mach exception trap installed on port {port}");

        Ok(TrapState {
            exception_port: port,
            saved,
            listener: Some(listener),
            should_continue,
            executing,
        })
    }
}

/// Cooperatively stop the listener, restore the saved exception ports, and
/// release the receive right.
pub(crate) fn remove_trap(state: &mut TrapState) -> FaultlineResult<()>
{
    state.should_continue.store(false, Ordering::SeqCst);

    if state.listener.is_some() {
        send_cancel_message(state.exception_port);

        // Bounded wait for the listener to acknowledge before joining, so a
        // wedged listener cannot hang process shutdown indefinitely.
        let deadline = Instant::now() + Duration::from_millis(constants::LISTENER_SHUTDOWN_TIMEOUT_MS);
        while state.executing.load(Ordering::SeqCst) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }

        if state.executing.load(Ordering::SeqCst) {
            warn!("exception listener did not acknowledge shutdown within the timeout");
        }

        if let Some(handle) = state.listener.take() {
            let _ = handle.join();
        }
    }

    restore_saved_ports(&state.saved);

    unsafe {
        let _ = ffi::mach_port_deallocate(mach_task_self(), state.exception_port);
    }
    state.exception_port = MACH_PORT_NULL;

    debug!("mach exception trap removed");
    Ok(())
}

fn restore_saved_ports(saved: &SavedExceptionPorts)
{
    unsafe {
        let task = mach_task_self();
        for i in 0..saved.count {
            let kr = ffi::task_set_exception_ports(task, saved.masks[i], saved.ports[i], saved.behaviors[i], saved.flavors[i]);
            if kr != KERN_SUCCESS {
                error!("failed to restore exception port {i}: {kr}");
            }
        }
    }
}

/// Wake the listener out of `mach_msg` with the private cancel message.
fn send_cancel_message(port: mach_port_t)
{
    let mut header = mach_msg_header_t {
        msgh_bits: MACH_MSGH_BITS(MACH_MSG_TYPE_MAKE_SEND, 0),
        msgh_size: mem::size_of::<mach_msg_header_t>() as mach_msg_size_t,
        msgh_remote_port: port,
        msgh_local_port: MACH_PORT_NULL,
        msgh_voucher_port: MACH_PORT_NULL,
        msgh_id: constants::CANCEL_MESSAGE_ID,
    };

    let kr = unsafe {
        mach_msg(
            &mut header,
            MACH_SEND_MSG,
            header.msgh_size,
            0,
            MACH_PORT_NULL,
            MACH_MSG_TIMEOUT_NONE,
            MACH_PORT_NULL,
        )
    };
    if kr != MACH_MSG_SUCCESS {
        warn!("failed to send listener cancel message: {kr}");
    }
}

/// The listener thread: block on the exception port, dispatch each caught
/// fault, reply so the kernel can resume (or escalate) the thread.
fn listener_loop(port: mach_port_t, saved: SavedExceptionPorts, should_continue: &AtomicBool, executing: &AtomicBool)
{
    executing.store(true, Ordering::SeqCst);

    while should_continue.load(Ordering::SeqCst) {
        let mut request = MaybeUninit::<__Request__exception_raise_t>::uninit();
        let recv_size = mem::size_of::<__Request__exception_raise_t>() as mach_msg_size_t;

        let kr = unsafe {
            mach_msg(
                request.as_mut_ptr() as *mut mach_msg_header_t,
                MACH_RCV_MSG | MACH_RCV_LARGE,
                0,
                recv_size,
                port,
                MACH_MSG_TIMEOUT_NONE,
                MACH_PORT_NULL,
            )
        };

        if kr != MACH_MSG_SUCCESS {
            if kr == MACH_RCV_PORT_DIED || kr == MACH_RCV_INVALID_NAME {
                debug!("exception port closed, exiting listener");
                break;
            }
            continue;
        }

        let message = unsafe { request.assume_init() };

        if message.Head.msgh_id == constants::CANCEL_MESSAGE_ID {
            if !should_continue.load(Ordering::SeqCst) {
                break;
            }
            continue;
        }

        let ret_code = handle_exception_message(&message, &saved);

        if let Err(err) = send_exception_reply(&message, ret_code) {
            error!("failed to send mach exception reply: {err}");
            break;
        }
    }

    executing.store(false, Ordering::SeqCst);
}

/// Process one `exception_raise` message and produce the reply code.
fn handle_exception_message(message: &__Request__exception_raise_t, saved: &SavedExceptionPorts) -> libc::kern_return_t
{
    let thread_port = message.thread.name as thread_act_t;
    let task_port = message.task.name;
    let exception = message.exception;
    let codes = [i64::from(message.code[0]), i64::from(message.code[1])];
    let code_count = message.codeCnt as usize;

    // A fault raised in another task's context belongs to its real owner.
    if task_port != unsafe { mach_task_self() } {
        return forward_exception(message, saved);
    }

    // The kernel keeps the faulting thread suspended while we process, so
    // its registers can be read without an extra suspension.
    let context = super::thread_state_for_port(thread_port).unwrap_or(crate::types::CpuContext::Unavailable);
    let instruction = context.instruction_pointer().unwrap_or(Address::ZERO);
    let memory = if exception as u32 == EXC_BAD_ACCESS && code_count > 1 {
        Address::new(codes[1] as u64)
    } else {
        instruction
    };

    let raw = RawFault {
        detail: FaultDetail::Mach {
            exception: exception as i32,
            codes,
            code_count: code_count.min(2),
        },
        context,
        thread_handle: ThreadHandle::new(unsafe { ffi::pthread_from_mach_thread_np(thread_port) } as u64),
        thread_sys_id: ThreadSysId::new(thread_port as u64),
        instruction,
        memory,
        payload: FaultPayload::None,
    };

    match handler::dispatch_fault(&raw) {
        FaultDisposition::Resume => KERN_SUCCESS,
        FaultDisposition::Forward => forward_exception(message, saved),
    }
}

/// Re-raise a declined exception at the previously registered port.
///
/// Only default-behavior handlers are re-raised; state-carrying behaviors
/// would need full MIG marshalling, so they fall through to the host-level
/// handler via the failure reply instead.
fn forward_exception(message: &__Request__exception_raise_t, saved: &SavedExceptionPorts) -> libc::kern_return_t
{
    let exception_bit: exception_mask_t = 1 << message.exception;

    let slot = (0..saved.count).find(|i| saved.masks[*i] & exception_bit != 0 && saved.ports[*i] != MACH_PORT_NULL);
    let Some(slot) = slot else {
        return KERN_FAILURE;
    };

    if saved.behaviors[slot] != EXCEPTION_DEFAULT as c_int {
        return KERN_FAILURE;
    }

    let mut forward = *message;
    forward.Head.msgh_bits = MACH_MSGH_BITS(MACH_MSG_TYPE_COPY_SEND, 0) | forward.Head.msgh_bits & 0x8000_0000;
    forward.Head.msgh_remote_port = saved.ports[slot];
    forward.Head.msgh_local_port = MACH_PORT_NULL;

    let kr = unsafe {
        mach_msg(
            &mut forward.Head,
            MACH_SEND_MSG,
            forward.Head.msgh_size,
            0,
            MACH_PORT_NULL,
            MACH_MSG_TIMEOUT_NONE,
            MACH_PORT_NULL,
        )
    };

    if kr == MACH_MSG_SUCCESS {
        KERN_SUCCESS
    } else {
        KERN_FAILURE
    }
}

/// Send the `exception_raise` reply the kernel is waiting on.
fn send_exception_reply(request: &__Request__exception_raise_t, ret_code: libc::kern_return_t) -> Result<(), i32>
{
    let mut reply = __Reply__exception_raise_t {
        Head: mach_msg_header_t {
            msgh_bits: MACH_MSGH_BITS(MACH_MSG_TYPE_MOVE_SEND_ONCE, 0),
            msgh_size: mem::size_of::<__Reply__exception_raise_t>() as mach_msg_size_t,
            msgh_remote_port: request.Head.msgh_remote_port,
            msgh_local_port: MACH_PORT_NULL,
            msgh_voucher_port: MACH_PORT_NULL,
            msgh_id: request.Head.msgh_id + 100,
        },
        NDR: unsafe { NDR_record },
        RetCode: ret_code,
    };

    let kr = unsafe {
        mach_msg(
            &mut reply.Head,
            MACH_SEND_MSG,
            reply.Head.msgh_size,
            0,
            MACH_PORT_NULL,
            MACH_MSG_TIMEOUT_NONE,
            MACH_PORT_NULL,
        )
    };

    if kr != MACH_MSG_SUCCESS {
        return Err(kr);
    }

    Ok(())
}
