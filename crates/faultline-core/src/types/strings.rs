//! Fixed-capacity inline strings.
//!
//! Every record that can be populated while a fault is being handled must
//! avoid heap allocation: the faulting thread may have been interrupted while
//! holding the allocator's internal lock, so any allocation from the handling
//! path can deadlock the process. `FixedString` is the building block that
//! makes the data model allocation-free: an inline byte buffer with explicit
//! capacity where overflowing writes are truncated, never grown.

use std::fmt;

/// Inline UTF-8 string with a fixed byte capacity.
///
/// Writes that exceed the capacity are truncated at the last complete
/// character boundary that fits. Truncation is silent at this level; callers
/// that need to surface truncation (backtraces, module lists) track it
/// separately.
///
/// Implements [`fmt::Write`], so `write!(buf, ...)` formats directly into the
/// inline buffer without allocating.
#[derive(Clone, Copy)]
pub struct FixedString<const N: usize>
{
    buf: [u8; N],
    len: usize,
}

impl<const N: usize> FixedString<N>
{
    /// Create an empty string.
    pub const fn new() -> Self
    {
        Self { buf: [0; N], len: 0 }
    }

    /// Byte capacity of the inline buffer.
    pub const fn capacity(&self) -> usize
    {
        N
    }

    /// Current length in bytes.
    pub const fn len(&self) -> usize
    {
        self.len
    }

    /// Returns `true` if no bytes have been written.
    pub const fn is_empty(&self) -> bool
    {
        self.len == 0
    }

    /// Reset to the empty string. The buffer is retained.
    pub fn clear(&mut self)
    {
        self.len = 0;
    }

    /// View the contents as `&str`.
    pub fn as_str(&self) -> &str
    {
        // Only complete UTF-8 sequences are ever copied in, so this cannot
        // fail; degrade to "" rather than panicking regardless.
        std::str::from_utf8(&self.buf[..self.len]).unwrap_or("")
    }

    /// Append as much of `s` as fits, truncating at a character boundary.
    pub fn push_str(&mut self, s: &str)
    {
        let remaining = N - self.len;
        let take = if s.len() <= remaining {
            s.len()
        } else {
            // Back up to the last char boundary that fits.
            let mut end = remaining;
            while end > 0 && !s.is_char_boundary(end) {
                end -= 1;
            }
            end
        };

        self.buf[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
    }

    /// Replace the contents with `s` (truncating on overflow).
    pub fn set(&mut self, s: &str)
    {
        self.clear();
        self.push_str(s);
    }

    /// Build a `FixedString` from `s`, truncating on overflow.
    pub fn from_str_truncated(s: &str) -> Self
    {
        let mut out = Self::new();
        out.push_str(s);
        out
    }
}

impl<const N: usize> Default for FixedString<N>
{
    fn default() -> Self
    {
        Self::new()
    }
}

impl<const N: usize> fmt::Write for FixedString<N>
{
    fn write_str(&mut self, s: &str) -> fmt::Result
    {
        // Truncation is not an error; report success so formatting of a
        // too-long value completes instead of aborting mid-line.
        self.push_str(s);
        Ok(())
    }
}

impl<const N: usize> fmt::Display for FixedString<N>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(self.as_str())
    }
}

impl<const N: usize> fmt::Debug for FixedString<N>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl<const N: usize> PartialEq for FixedString<N>
{
    fn eq(&self, other: &Self) -> bool
    {
        self.as_str() == other.as_str()
    }
}

impl<const N: usize> Eq for FixedString<N> {}

impl<const N: usize> PartialEq<&str> for FixedString<N>
{
    fn eq(&self, other: &&str) -> bool
    {
        self.as_str() == *other
    }
}

impl<const N: usize> From<&str> for FixedString<N>
{
    fn from(s: &str) -> Self
    {
        Self::from_str_truncated(s)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use std::fmt::Write;

    #[test]
    fn push_str_truncates_at_capacity()
    {
        let mut s = FixedString::<4>::new();
        s.push_str("abcdef");
        assert_eq!(s.as_str(), "abcd");
        assert_eq!(s.len(), 4);
    }

    #[test]
    fn push_str_respects_char_boundaries()
    {
        let mut s = FixedString::<4>::new();
        // "aé" is 3 bytes; a further 'é' (2 bytes) cannot fit completely.
        s.push_str("aééé");
        assert_eq!(s.as_str(), "aé");
    }

    #[test]
    fn write_macro_formats_inline()
    {
        let mut s = FixedString::<32>::new();
        write!(s, "pc=0x{:08x}", 0x1234).unwrap();
        assert_eq!(s.as_str(), "pc=0x00001234");
    }

    #[test]
    fn overflowing_write_still_returns_ok()
    {
        let mut s = FixedString::<8>::new();
        assert!(write!(s, "{}", "x".repeat(64)).is_ok());
        assert_eq!(s.len(), 8);
    }
}
