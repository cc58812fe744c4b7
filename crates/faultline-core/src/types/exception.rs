//! The per-fault capture record and its parts.

use super::{Address, CpuContext, FixedString, SymbolInfo, ThreadHandle, ThreadSysId};

/// Maximum number of frames captured per backtrace.
///
/// Deeper stacks are truncated and the truncation recorded, so a stack
/// overflow's recursion shows up as a truncated 64-frame trace rather than a
/// silently complete-looking one.
pub const MAX_BACKTRACE_FRAMES: usize = 64;

/// A captured call stack: a fixed-capacity array of instruction addresses.
///
/// No dynamic growth; pushing beyond capacity sets the `truncated` flag and
/// drops the frame.
#[derive(Debug, Clone, Copy)]
pub struct Backtrace
{
    frames: [Address; MAX_BACKTRACE_FRAMES],
    count: usize,
    truncated: bool,
    thread: ThreadSysId,
}

impl Backtrace
{
    /// An empty backtrace attributed to no thread.
    pub const fn new() -> Self
    {
        Self {
            frames: [Address::ZERO; MAX_BACKTRACE_FRAMES],
            count: 0,
            truncated: false,
            thread: ThreadSysId::INVALID,
        }
    }

    /// Append a frame. Returns `false` (and records truncation) when full.
    pub fn push(&mut self, addr: Address) -> bool
    {
        if self.count < MAX_BACKTRACE_FRAMES {
            self.frames[self.count] = addr;
            self.count += 1;
            true
        } else {
            self.truncated = true;
            false
        }
    }

    /// Captured frames, innermost first.
    pub fn frames(&self) -> &[Address]
    {
        &self.frames[..self.count]
    }

    /// Number of captured frames.
    pub const fn len(&self) -> usize
    {
        self.count
    }

    /// Returns `true` when no frames were captured.
    pub const fn is_empty(&self) -> bool
    {
        self.count == 0
    }

    /// Returns `true` if frames were dropped due to capacity.
    pub const fn truncated(&self) -> bool
    {
        self.truncated
    }

    /// Thread the stack was captured from.
    pub const fn thread(&self) -> ThreadSysId
    {
        self.thread
    }

    /// Record the captured thread identity.
    pub fn set_thread(&mut self, thread: ThreadSysId)
    {
        self.thread = thread;
    }

    /// Discard all frames and the truncation flag.
    pub fn clear(&mut self)
    {
        self.count = 0;
        self.truncated = false;
        self.thread = ThreadSysId::INVALID;
    }

    /// Overwrite from a frame slice (used by capture code that fills a raw
    /// array first).
    pub fn fill_from(&mut self, frames: &[Address], truncated: bool, thread: ThreadSysId)
    {
        self.clear();
        for frame in frames.iter().take(MAX_BACKTRACE_FRAMES) {
            self.frames[self.count] = *frame;
            self.count += 1;
        }
        self.truncated = truncated || frames.len() > MAX_BACKTRACE_FRAMES;
        self.thread = thread;
    }
}

impl Default for Backtrace
{
    fn default() -> Self
    {
        Self::new()
    }
}

/// Raw platform fault identification.
///
/// Carried alongside the CPU context so the description builder and the
/// report can name the fault in platform terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultDetail
{
    /// POSIX signal delivery (Linux trap model).
    Signal
    {
        /// Signal number, e.g. `SIGSEGV`.
        signo: i32,
        /// `siginfo_t.si_code` refinement.
        code: i32,
    },
    /// Mach exception message (macOS trap model).
    Mach
    {
        /// Exception type, e.g. `EXC_BAD_ACCESS`.
        exception: i32,
        /// Kernel exception codes (code, subcode).
        codes: [i64; 2],
        /// Number of valid entries in `codes`.
        code_count: usize,
    },
    /// Fault injected by a test or diagnostic harness.
    Simulated,
    /// Nothing captured yet.
    Unknown,
}

impl Default for FaultDetail
{
    fn default() -> Self
    {
        FaultDetail::Unknown
    }
}

/// The single mutable record populated once per handled fault.
///
/// Zero-initialized at handler construction and fully overwritten exactly
/// once per fault, under the handler's exclusivity guard. Read-only
/// afterward, for report composition and the listener callback. Nothing in
/// here owns heap memory, so populating it inside the handling window cannot
/// touch the allocator.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExceptionInfo
{
    /// Wall-clock capture time, seconds since the Unix epoch (GMT).
    pub timestamp_secs: i64,
    /// Userland handle of the implicated thread.
    pub thread_handle: ThreadHandle,
    /// System id of the implicated thread.
    pub thread_sys_id: ThreadSysId,
    /// Thread name, when the platform can produce one.
    pub thread_name: FixedString<32>,
    /// Call stack of the implicated thread.
    pub backtrace: Backtrace,
    /// Faulting instruction address.
    pub instruction_address: Address,
    /// Faulting memory address (access violations); otherwise mirrors the
    /// instruction address.
    pub memory_address: Address,
    /// Raw register file of the implicated thread.
    pub context: CpuContext,
    /// Platform fault identification.
    pub detail: FaultDetail,
    /// Human-readable fault description.
    pub description: FixedString<1024>,
    /// Resolved symbol for the fault site.
    pub symbol: SymbolInfo,
}

impl ExceptionInfo
{
    /// Reset every field to its zero state for the next capture.
    pub fn reset(&mut self)
    {
        *self = ExceptionInfo::default();
    }
}
