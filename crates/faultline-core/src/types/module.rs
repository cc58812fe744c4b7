//! Loaded-module records and the range search over them.

use super::{Address, FixedString};

/// Capacity of the module cache owned by `SymbolLookup`.
///
/// The cache is a flat array populated once per refresh; modules beyond this
/// capacity are dropped and the truncation is recorded on the lookup. 256
/// covers every process observed in practice with ample headroom.
pub const MODULE_CACHE_CAPACITY: usize = 256;

/// One loaded code module (executable or shared library).
///
/// Populated by the platform module-enumeration scan and cached for the
/// process lifetime; module unload is not tracked, so a stale entry can
/// linger until an explicit refresh. All fields are inline buffers so that a
/// refresh performed inside the fault-handling window does not allocate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleInfo
{
    /// Runtime base address the module is mapped at.
    pub base: Address,
    /// Mapped size in bytes.
    pub size: u64,
    /// Full filesystem path of the module.
    pub path: FixedString<256>,
    /// Short module name (file name portion).
    pub name: FixedString<64>,
    /// Mapping permissions, e.g. `r-xp` (empty where not reported).
    pub permissions: FixedString<8>,
}

impl ModuleInfo
{
    /// An empty record with a null base; used for zero-initialization.
    pub fn empty() -> Self
    {
        Self {
            base: Address::ZERO,
            size: 0,
            path: FixedString::new(),
            name: FixedString::new(),
            permissions: FixedString::new(),
        }
    }

    /// One past the last mapped address.
    pub fn end(&self) -> Address
    {
        self.base.saturating_add(self.size)
    }

    /// Range-containment test: `base <= addr < base + size`.
    pub fn contains(&self, addr: Address) -> bool
    {
        addr >= self.base && addr < self.end()
    }
}

impl Default for ModuleInfo
{
    fn default() -> Self
    {
        Self::empty()
    }
}

/// Linear range search over a module table.
///
/// Returns the index of the module whose `[base, base + size)` range contains
/// `addr`, or `None` when the address falls outside every module. Linear scan
/// is deliberate: the table is small, the search runs on the fault path, and
/// an index result doubles as the weak module reference stored in
/// [`super::SymbolInfo`].
pub fn module_index_for_address(modules: &[ModuleInfo], addr: Address) -> Option<usize>
{
    modules.iter().position(|m| m.contains(addr))
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn module(base: u64, size: u64) -> ModuleInfo
    {
        ModuleInfo {
            base: Address::new(base),
            size,
            ..ModuleInfo::empty()
        }
    }

    #[test]
    fn range_search_picks_containing_module()
    {
        let modules = [module(0x1000, 0x1000), module(0x2000, 0x1000), module(0x4000, 0x1000)];

        // Exactly at base of module 1 belongs to module 1, one below does not.
        assert_eq!(module_index_for_address(&modules, Address::new(0x2000)), Some(1));
        assert_eq!(module_index_for_address(&modules, Address::new(0x1fff)), Some(0));
        // Last valid byte vs. one-past-the-end.
        assert_eq!(module_index_for_address(&modules, Address::new(0x4fff)), Some(2));
        assert_eq!(module_index_for_address(&modules, Address::new(0x5000)), None);
        // The gap between module 1 and module 2 resolves to nothing.
        assert_eq!(module_index_for_address(&modules, Address::new(0x3800)), None);
    }
}
