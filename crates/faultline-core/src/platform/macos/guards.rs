//! # RAII Guards for Thread Control
//!
//! Reading another thread's registers requires freezing it first, and the
//! target must be resumed on every exit path or it stays frozen system-wide.
//! The guard makes that safety property structural: dropping it resumes the
//! thread no matter how the capture path exits.

use libc::thread_act_t;
use mach2::kern_return::KERN_SUCCESS;

use crate::error::{FaultlineError, FaultlineResult};
use crate::platform::macos::ffi;

/// RAII guard that suspends a thread and resumes it when dropped.
///
/// The suspension window should be as short as possible; the target thread
/// is frozen for its entire lifetime.
pub struct ThreadSuspendGuard
{
    thread_port: thread_act_t,
    active: bool,
}

impl ThreadSuspendGuard
{
    /// Suspend `thread_port`. The thread resumes when the guard drops.
    ///
    /// ## Errors
    ///
    /// - `SuspendFailed`: `thread_suspend()` refused (dead thread, bad port)
    pub fn new(thread_port: thread_act_t) -> FaultlineResult<Self>
    {
        unsafe {
            let result = ffi::thread_suspend(thread_port);
            if result != KERN_SUCCESS {
                return Err(FaultlineError::SuspendFailed(format!(
                    "thread_suspend failed: {}",
                    result
                )));
            }
        }

        Ok(Self {
            thread_port,
            active: true,
        })
    }

    /// Resume the thread before the guard is dropped.
    ///
    /// After this, dropping the guard is a no-op.
    pub fn resume(mut self) -> FaultlineResult<()>
    {
        if self.active {
            unsafe {
                let result = ffi::thread_resume(self.thread_port);
                if result != KERN_SUCCESS {
                    return Err(FaultlineError::ResumeFailed(format!(
                        "thread_resume failed: {}",
                        result
                    )));
                }
            }
            self.active = false;
        }
        Ok(())
    }
}

impl Drop for ThreadSuspendGuard
{
    fn drop(&mut self)
    {
        if self.active {
            // Best effort resume - ignore errors
            unsafe {
                let _ = ffi::thread_resume(self.thread_port);
            }
        }
    }
}
