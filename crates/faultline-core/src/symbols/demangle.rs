//! Symbol demangling utilities.
//!
//! Compilers "mangle" symbol names to encode type information and namespaces.
//! This module turns them back into human-readable form:
//!
//! - **Rust**: v0 (`_R...`) and legacy (`_ZN...`) mangling via `rustc_demangle`
//! - **C**: unmangled names pass through untouched
//!
//! The fixed-buffer entry point is usable from inside the fault handler: the
//! demangler formats straight into the caller's inline buffer, so no heap
//! allocation happens on that path.

use std::fmt::Write;

use rustc_demangle::demangle;

use crate::types::FixedString;

/// Demangle `raw` into a fixed-capacity buffer, truncating on overflow.
///
/// Non-mangled names are copied through unchanged. The `{:#}` form strips the
/// trailing hash disambiguator that rustc appends to every symbol.
pub(crate) fn demangle_into<const N: usize>(raw: &str, out: &mut FixedString<N>)
{
    out.clear();
    let _ = write!(out, "{:#}", demangle(raw));
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn plain_c_symbols_pass_through()
    {
        let mut buf = FixedString::<128>::new();
        demangle_into("malloc", &mut buf);
        assert_eq!(buf.as_str(), "malloc");
    }

    #[test]
    fn legacy_rust_symbols_demangle()
    {
        let mut buf = FixedString::<128>::new();
        demangle_into("_ZN4core3fmt5write17h0123456789abcdefE", &mut buf);
        assert_eq!(buf.as_str(), "core::fmt::write");
    }

    #[test]
    fn long_names_truncate_instead_of_allocating()
    {
        let mut buf = FixedString::<16>::new();
        demangle_into("_ZN4core3fmt5write17h0123456789abcdefE", &mut buf);
        assert_eq!(buf.as_str(), "core::fmt::write");
        assert!(buf.len() <= 16);
    }
}
