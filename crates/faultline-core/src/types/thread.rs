//! Thread identity and stack geometry types.

use std::fmt;

use super::Address;

/// System-level thread identifier.
///
/// - **Linux**: kernel thread id (`gettid`)
/// - **macOS**: Mach thread port (`thread_act_t`)
///
/// The zero value is the invalid sentinel on both platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ThreadSysId(u64);

impl ThreadSysId
{
    /// Invalid/unspecified thread id.
    pub const INVALID: Self = ThreadSysId(0);

    /// Wrap a raw platform thread id.
    pub const fn new(raw: u64) -> Self
    {
        ThreadSysId(raw)
    }

    /// Raw platform value.
    pub const fn raw(self) -> u64
    {
        self.0
    }

    /// Returns `true` for the invalid sentinel.
    pub const fn is_invalid(self) -> bool
    {
        self.0 == 0
    }
}

impl fmt::Display for ThreadSysId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}

/// Userland thread handle (`pthread_t` on both supported platforms).
///
/// Distinct from [`ThreadSysId`]: the kernel identifies a thread by its sys
/// id, while thread-local queries (stack bounds, thread name) want the
/// pthread handle. Conversions between the two live in the platform layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ThreadHandle(u64);

impl ThreadHandle
{
    /// Invalid/unspecified handle.
    pub const INVALID: Self = ThreadHandle(0);

    /// Wrap a raw `pthread_t`.
    pub const fn new(raw: u64) -> Self
    {
        ThreadHandle(raw)
    }

    /// Raw platform value.
    pub const fn raw(self) -> u64
    {
        self.0
    }

    /// Returns `true` for the invalid sentinel.
    pub const fn is_invalid(self) -> bool
    {
        self.0 == 0
    }
}

impl fmt::Display for ThreadHandle
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "0x{:x}", self.0)
    }
}

/// Stack extent of a thread.
///
/// Stacks grow downward on both supported platforms, so `limit < base`:
/// `base` is the highest address (where the stack starts) and `limit` the
/// lowest usable address. Callers must tolerate unknown bounds: the resolver
/// returns `None` rather than an error when the platform cannot answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackBounds
{
    /// Highest stack address (exclusive).
    pub base: Address,
    /// Lowest usable stack address.
    pub limit: Address,
}

impl StackBounds
{
    /// Returns `true` if `addr` lies within `[limit, base)`.
    pub fn contains(&self, addr: Address) -> bool
    {
        addr >= self.limit && addr < self.base
    }

    /// Stack size in bytes.
    pub fn size(&self) -> u64
    {
        self.base.value().saturating_sub(self.limit.value())
    }
}
