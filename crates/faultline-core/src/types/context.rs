//! Captured CPU register state.
//!
//! The raw register file of a faulting (or suspended) thread, carried as a
//! tagged variant per architecture rather than a reinterpreted byte blob.
//! Accessors expose the handful of registers the rest of the crate needs
//! (program counter, stack pointer, frame pointer) without callers having to
//! match on the architecture themselves.

use super::Address;

/// x86-64 general-purpose register file.
///
/// Field order matches the Mach `x86_THREAD_STATE64` layout, which is also a
/// convenient superset of what the Linux `mcontext_t` provides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct X86_64Context
{
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rbp: u64,
    pub rsp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
    pub rflags: u64,
    pub cs: u64,
    pub fs: u64,
    pub gs: u64,
}

/// AArch64 general-purpose register file (`ARM_THREAD_STATE64` layout).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arm64Context
{
    /// x0–x28.
    pub x: [u64; 29],
    /// Frame pointer (x29).
    pub fp: u64,
    /// Link register (x30).
    pub lr: u64,
    /// Stack pointer.
    pub sp: u64,
    /// Program counter.
    pub pc: u64,
    /// Current program status register.
    pub cpsr: u64,
}

impl Default for Arm64Context
{
    fn default() -> Self
    {
        Self {
            x: [0; 29],
            fp: 0,
            lr: 0,
            sp: 0,
            pc: 0,
            cpsr: 0,
        }
    }
}

/// Architecture-tagged CPU context.
///
/// `Unavailable` is the degenerate case for platforms or capture paths that
/// could not produce a register file; every accessor returns `None` for it so
/// report composition can substitute placeholders instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuContext
{
    /// x86-64 register state.
    X86_64(X86_64Context),
    /// AArch64 register state.
    Arm64(Arm64Context),
    /// No context could be captured.
    Unavailable,
}

impl CpuContext
{
    /// Returns `true` unless this is the `Unavailable` placeholder.
    pub fn is_available(&self) -> bool
    {
        !matches!(self, CpuContext::Unavailable)
    }

    /// Program counter at capture time.
    pub fn instruction_pointer(&self) -> Option<Address>
    {
        match self {
            CpuContext::X86_64(ctx) => Some(Address::new(ctx.rip)),
            CpuContext::Arm64(ctx) => Some(Address::new(ctx.pc)),
            CpuContext::Unavailable => None,
        }
    }

    /// Stack pointer at capture time.
    pub fn stack_pointer(&self) -> Option<Address>
    {
        match self {
            CpuContext::X86_64(ctx) => Some(Address::new(ctx.rsp)),
            CpuContext::Arm64(ctx) => Some(Address::new(ctx.sp)),
            CpuContext::Unavailable => None,
        }
    }

    /// Frame pointer at capture time (`rbp` / `x29`).
    pub fn frame_pointer(&self) -> Option<Address>
    {
        match self {
            CpuContext::X86_64(ctx) => Some(Address::new(ctx.rbp)),
            CpuContext::Arm64(ctx) => Some(Address::new(ctx.fp)),
            CpuContext::Unavailable => None,
        }
    }

    /// Architecture label for report output.
    pub fn architecture_name(&self) -> &'static str
    {
        match self {
            CpuContext::X86_64(_) => "x86-64",
            CpuContext::Arm64(_) => "arm64",
            CpuContext::Unavailable => "<unavailable>",
        }
    }
}

impl Default for CpuContext
{
    fn default() -> Self
    {
        CpuContext::Unavailable
    }
}
