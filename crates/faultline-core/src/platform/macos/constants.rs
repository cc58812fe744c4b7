//! # macOS Platform Constants
//!
//! Centralized constants for the Mach API operations used by the trap and
//! the thread/context capture code: thread state flavors and counts, state
//! layout indices, and the private cancel-message id for the exception
//! listener.

use libc::{c_int, mach_msg_type_number_t};

// ============================================================================
// Thread State Flavors
// ============================================================================

/// ARM64 thread state flavor (flavor 6)
///
/// Used with `thread_get_state()` to read ARM64 general-purpose registers
/// (X0-X28, FP, LR, SP, PC, CPSR).
#[cfg(target_arch = "aarch64")]
pub const ARM_THREAD_STATE64: c_int = 6;

/// ARM64 thread state count (68 u32 values)
///
/// Each 64-bit register is stored as two `natural_t` (u32) values.
#[cfg(target_arch = "aarch64")]
pub const ARM_THREAD_STATE64_COUNT: mach_msg_type_number_t = 68;

/// x86-64 thread state flavor (flavor 4)
#[cfg(target_arch = "x86_64")]
pub const X86_THREAD_STATE64: c_int = 4;

/// x86-64 thread state count (42 u32 values)
#[cfg(target_arch = "x86_64")]
pub const X86_THREAD_STATE64_COUNT: mach_msg_type_number_t = 42;

/// The "no thread state" flavor used when registering exception ports whose
/// behavior does not carry state.
#[cfg(target_arch = "aarch64")]
pub const THREAD_STATE_NONE: c_int = 5;

#[cfg(target_arch = "x86_64")]
pub const THREAD_STATE_NONE: c_int = 13;

// ============================================================================
// Exception listener
// ============================================================================

/// Private message id the trap sends its own exception port to wake the
/// listener thread for cooperative shutdown. Any value outside the MIG
/// exception id range (2401..2407) works; this one is recognizably ours.
pub const CANCEL_MESSAGE_ID: i32 = 0x0fa1_711e;

/// Capacity of the saved exception-port table. `EXC_TYPES_COUNT` is 14 on
/// current kernels; 16 leaves headroom.
pub const SAVED_PORT_CAPACITY: usize = 16;

/// Bounded wait for the listener to acknowledge shutdown, in milliseconds.
pub const LISTENER_SHUTDOWN_TIMEOUT_MS: u64 = 3_000;
