//! # macOS Mach API Errors
//!
//! Mach APIs return `kern_return_t` values, which are integer error codes.
//! This module converts those codes into Rust error types with descriptive
//! messages so they can travel through `FaultlineError` like any other
//! failure.

use thiserror::Error;

/// Mach kernel API error
///
/// Common `kern_return_t` values seen by this crate:
///
/// - `KERN_SUCCESS` (0): Operation succeeded
/// - `KERN_PROTECTION_FAILURE` (2): Permission denied
/// - `KERN_INVALID_ARGUMENT` (4): Invalid port or argument
/// - `KERN_FAILURE` (5): General failure
#[derive(Error, Debug)]
pub enum MachError
{
    /// The operation was blocked by the security system (SIP, missing
    /// entitlements).
    #[error("KERN_PROTECTION_FAILURE: Permission denied")]
    ProtectionFailure,

    /// An argument passed to the Mach API was invalid (dead port, bad
    /// flavor, bad address).
    #[error("KERN_INVALID_ARGUMENT: Invalid port or argument")]
    InvalidArgument,

    /// General failure; often a thread or task that no longer exists.
    #[error("KERN_FAILURE: Operation failed")]
    Failure,

    /// An error code we don't recognize; the raw value is preserved.
    #[error("Unknown Mach error: {0}")]
    Unknown(i32),
}

impl From<libc::kern_return_t> for MachError
{
    fn from(code: libc::kern_return_t) -> Self
    {
        match code {
            libc::KERN_PROTECTION_FAILURE => MachError::ProtectionFailure,
            libc::KERN_INVALID_ARGUMENT => MachError::InvalidArgument,
            libc::KERN_FAILURE => MachError::Failure,
            _ => MachError::Unknown(code),
        }
    }
}
