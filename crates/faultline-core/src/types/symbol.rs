//! Resolved-symbol records.

use super::{Address, FixedString};

/// Symbol information for one instruction address.
///
/// A transient, per-query result: it is filled by `SymbolLookup` and never
/// persisted beyond the call that produced it. The module association is a
/// plain index into the lookup's module cache; a `SymbolInfo` never owns or
/// extends the lifetime of a module record.
///
/// Unresolvable addresses still produce a populated record: the module index
/// if any module's range contains the address, and empty function/file
/// fields. Lookup never fails with an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolInfo
{
    /// The queried instruction address.
    pub address: Address,
    /// Size of the enclosing function in bytes, 0 when unknown.
    pub size: u64,
    /// Index into the module cache, `None` when no module contains `address`.
    pub module_index: Option<usize>,
    /// Demangled function name (empty when unresolved).
    pub function: FixedString<128>,
    /// Byte offset of `address` from the function entry point.
    pub function_offset: Option<u64>,
    /// Source file path (empty when line info is unavailable).
    pub file_path: FixedString<256>,
    /// Source line number, if known.
    pub file_line: Option<u32>,
}

impl SymbolInfo
{
    /// An unresolved record for `address`.
    pub fn unresolved(address: Address) -> Self
    {
        Self {
            address,
            size: 0,
            module_index: None,
            function: FixedString::new(),
            function_offset: None,
            file_path: FixedString::new(),
            file_line: None,
        }
    }

    /// Returns `true` if a function name was resolved.
    pub fn has_function(&self) -> bool
    {
        !self.function.is_empty()
    }

    /// Returns `true` if file/line information was resolved.
    pub fn has_source_location(&self) -> bool
    {
        !self.file_path.is_empty()
    }
}

impl Default for SymbolInfo
{
    fn default() -> Self
    {
        Self::unresolved(Address::ZERO)
    }
}
