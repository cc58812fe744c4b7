//! # Symbol Lookup
//!
//! Module enumeration, backtrace capture, and address-to-symbol resolution
//! for the current process.
//!
//! `SymbolLookup` owns a cached snapshot of loaded modules and answers three
//! kinds of questions:
//!
//! - Which module contains this instruction address?
//! - What function / source line does this address belong to?
//! - What is the call stack of this thread (current or otherwise)?
//!
//! ## Allocation discipline
//!
//! Most of this type must work from inside the fault-handling window, where
//! heap allocation can deadlock the process. The module cache is therefore a
//! pre-reserved flat array of inline-buffer records, backtrace capture walks
//! frame pointers without allocating, and symbol names come from `dladdr`
//! demangled straight into fixed buffers.
//!
//! Source file/line resolution needs DWARF parsing, which allocates, so it
//! only runs while `allow_memory_allocation` is true. The fault handler
//! disables allocation for its lookup instance; diagnostic callers keep it
//! enabled and get richer results. The `report_thread_callstack*` helpers
//! allocate freely and must never be called from a fault handler.

mod demangle;
mod resolve;
pub(crate) mod walk;

use std::fmt::Write as _;
use std::path::Path;

use tracing::debug;

use crate::platform;
use crate::types::{
    module_index_for_address, Address, Backtrace, CpuContext, FixedString, ModuleInfo, SymbolInfo, ThreadHandle,
    ThreadSysId, MODULE_CACHE_CAPACITY,
};

pub(crate) use demangle::demangle_into;
use resolve::DwarfResolver;

use crate::types::StackBounds;

/// Resolve the stack extent of the given thread.
///
/// Pure query, no side effects. For the calling thread the bounds come from
/// the thread-local stack descriptor; for another thread from OS-level
/// thread metadata where the platform exposes it. Failure (unsupported
/// platform, stale handle) yields `None`, never an error; callers fall back
/// to heuristics.
pub fn thread_stack_bounds(handle: ThreadHandle) -> Option<StackBounds>
{
    platform::thread_stack_bounds(handle)
}

/// Stack extent of the calling thread.
pub fn current_thread_stack_bounds() -> Option<StackBounds>
{
    platform::thread_stack_bounds(platform::current_thread_handle())
}

/// Module cache, backtrace capture, and symbol resolution.
///
/// See the module documentation for the allocation rules. One instance is
/// owned by each `ExceptionHandler`; standalone instances work fine for
/// diagnostics.
pub struct SymbolLookup
{
    initialized: bool,
    allow_memory_allocation: bool,
    module_list_updated: bool,
    modules_truncated: bool,
    /// Flat module table. Capacity is reserved up front so in-handler pushes
    /// never reallocate; entries beyond capacity are dropped.
    module_cache: Vec<ModuleInfo>,
    /// Lazily built DWARF resolvers, parallel to `module_cache`. Only
    /// populated while allocation is allowed.
    resolvers: Vec<Option<DwarfResolver>>,
}

impl SymbolLookup
{
    /// Create a lookup with an empty module cache.
    pub fn new() -> Self
    {
        Self {
            initialized: false,
            allow_memory_allocation: true,
            module_list_updated: false,
            modules_truncated: false,
            module_cache: Vec::with_capacity(MODULE_CACHE_CAPACITY),
            resolvers: Vec::with_capacity(MODULE_CACHE_CAPACITY),
        }
    }

    /// Acquire the symbol engine. Idempotent; calling twice is a no-op.
    ///
    /// On the supported Unix platforms the "engine" is `dladdr` plus our own
    /// DWARF readers, so there is no external handle to acquire; the flag
    /// still gates lookups so that shutdown semantics match the contract.
    pub fn initialize(&mut self)
    {
        if !self.initialized {
            self.initialized = true;
            debug!("symbol lookup initialized");
        }
    }

    /// Returns `true` between `initialize` and `shutdown`.
    pub fn is_initialized(&self) -> bool
    {
        self.initialized
    }

    /// Release the symbol engine and clear the module cache size.
    ///
    /// The cache storage is retained (it is a flat array, not owned
    /// pointers); only its logical size is reset.
    pub fn shutdown(&mut self)
    {
        if self.initialized {
            self.initialized = false;
            self.module_cache.clear();
            self.resolvers.clear();
            self.module_list_updated = false;
            self.modules_truncated = false;
            debug!("symbol lookup shut down");
        }
    }

    /// Allow or forbid heap allocation during lookups.
    ///
    /// Must be disabled for instances used inside a fault handler. With
    /// allocation forbidden, file/line resolution is skipped and results
    /// carry function names only.
    pub fn enable_memory_allocation(&mut self, enabled: bool)
    {
        self.allow_memory_allocation = enabled;
    }

    /// Re-scan the loaded modules of the current process.
    ///
    /// Returns the number of cached modules. Modules beyond the cache
    /// capacity are dropped and [`Self::modules_truncated`] reports it.
    pub fn refresh_module_list(&mut self) -> usize
    {
        self.module_cache.clear();
        self.resolvers.clear();
        self.modules_truncated = platform::refresh_modules(&mut self.module_cache);
        self.module_list_updated = true;
        self.module_cache.len()
    }

    /// Install an explicit module table, replacing the platform scan.
    ///
    /// Intended for embedders and test harnesses that need a deterministic
    /// module table. Entries beyond the cache capacity are dropped.
    pub fn install_modules(&mut self, modules: &[ModuleInfo])
    {
        self.module_cache.clear();
        self.resolvers.clear();
        for m in modules.iter().take(MODULE_CACHE_CAPACITY) {
            self.module_cache.push(*m);
        }
        self.modules_truncated = modules.len() > MODULE_CACHE_CAPACITY;
        self.module_list_updated = true;
    }

    /// The cached module table.
    pub fn modules(&self) -> &[ModuleInfo]
    {
        &self.module_cache
    }

    /// Returns `true` if the last refresh dropped modules due to capacity.
    pub fn modules_truncated(&self) -> bool
    {
        self.modules_truncated
    }

    /// Copy cached modules into `out`, returning the required count.
    ///
    /// Standard query-size-then-fill: when the return value exceeds
    /// `out.len()`, only `out.len()` entries were written.
    pub fn module_info_array(&self, out: &mut [ModuleInfo]) -> usize
    {
        let n = self.module_cache.len().min(out.len());
        out[..n].copy_from_slice(&self.module_cache[..n]);
        self.module_cache.len()
    }

    /// The module whose range contains `addr`, if any.
    pub fn module_for_address(&self, addr: Address) -> Option<&ModuleInfo>
    {
        module_index_for_address(&self.module_cache, addr).map(|idx| &self.module_cache[idx])
    }

    /// Capture a backtrace for the current thread or a supplied context.
    ///
    /// Writes at most `out.len()` addresses, starting after `skip_count`
    /// frames, and returns the number written. If `platform_context` carries
    /// the register state of a *different* thread, that thread's stack is
    /// walked instead (with `thread_sys_id_hint` used to find its stack
    /// bounds). Returns 0, never an error, when unwinding is unavailable.
    ///
    /// Does not allocate.
    #[inline(never)]
    pub fn get_backtrace(
        &self,
        out: &mut [Address],
        skip_count: usize,
        platform_context: Option<&CpuContext>,
        thread_sys_id_hint: Option<ThreadSysId>,
    ) -> usize
    {
        self.walk_backtrace(out, skip_count, platform_context, thread_sys_id_hint).0
    }

    /// As [`Self::get_backtrace`], additionally reporting truncation.
    #[inline(never)]
    pub fn walk_backtrace(
        &self,
        out: &mut [Address],
        mut skip_count: usize,
        platform_context: Option<&CpuContext>,
        thread_sys_id_hint: Option<ThreadSysId>,
    ) -> (usize, bool)
    {
        let current_bounds = platform::thread_stack_bounds(platform::current_thread_handle());

        let seed = match platform_context {
            Some(ctx) => {
                let pc = ctx.instruction_pointer().map_or(0, Address::value);
                let fp = ctx.frame_pointer().map_or(0, Address::value);
                if pc == 0 && fp == 0 {
                    return (0, false);
                }
                walk::WalkSeed { pc, fp }
            }
            None => {
                // Hide this function's own frame from the result.
                skip_count += 1;
                walk::WalkSeed {
                    pc: walk::current_instruction_pointer(),
                    fp: walk::current_frame_pointer(),
                }
            }
        };

        // Decide whose stack bounds apply: the walked frame pointer may
        // belong to another thread even though we are doing the reading.
        let bounds = match (platform_context, current_bounds) {
            (None, bounds) => bounds,
            (Some(_), Some(bounds)) if bounds.contains(Address::new(seed.fp)) => Some(bounds),
            (Some(_), _) => thread_sys_id_hint.and_then(|id| {
                let handle = platform::thread_handle_for_sys_id(id);
                platform::thread_stack_bounds(handle)
            }),
        };

        walk::walk_stack(seed, bounds, out, skip_count)
    }

    /// Backtrace for the thread identified by a userland handle.
    pub fn get_backtrace_from_thread_handle(&self, out: &mut [Address], skip_count: usize, handle: ThreadHandle) -> usize
    {
        if handle.is_invalid() || handle == platform::current_thread_handle() {
            return self.get_backtrace(out, skip_count, None, None);
        }

        let sys_id = platform::thread_sys_id_for_handle(handle);
        if sys_id.is_invalid() {
            return 0;
        }
        self.get_backtrace_from_thread_sys_id(out, skip_count, sys_id)
    }

    /// Backtrace for the thread identified by a system thread id.
    ///
    /// For a foreign thread the target is suspended for the minimum duration
    /// needed to copy its register context; resumption is guaranteed on every
    /// exit path by a scoped guard in the platform layer.
    pub fn get_backtrace_from_thread_sys_id(&self, out: &mut [Address], skip_count: usize, sys_id: ThreadSysId) -> usize
    {
        if sys_id.is_invalid() || sys_id == platform::current_thread_sys_id() {
            return self.get_backtrace(out, skip_count, None, None);
        }

        match platform::capture_thread_context(sys_id) {
            Some(ctx) => self.get_backtrace(out, skip_count, Some(&ctx), Some(sys_id)),
            None => 0,
        }
    }

    /// Capture into a fixed [`Backtrace`] record, preserving truncation and
    /// thread attribution. Used by the fault handler.
    pub(crate) fn capture_backtrace(
        &self,
        bt: &mut Backtrace,
        skip_count: usize,
        platform_context: Option<&CpuContext>,
        thread_sys_id: ThreadSysId,
    )
    {
        let mut frames = [Address::ZERO; crate::types::MAX_BACKTRACE_FRAMES];
        let (count, truncated) = self.walk_backtrace(&mut frames, skip_count, platform_context, Some(thread_sys_id));
        bt.fill_from(&frames[..count], truncated, thread_sys_id);
    }

    /// Enumerate the threads of the current process.
    ///
    /// Fills whichever output slices are provided (up to their lengths) and
    /// returns the required count, which may exceed the capacity supplied.
    /// Unless the process is paused the list is volatile.
    pub fn get_thread_list(&self, handles: Option<&mut [ThreadHandle]>, sys_ids: Option<&mut [ThreadSysId]>) -> usize
    {
        platform::thread_list(handles, sys_ids)
    }

    /// Resolve one instruction address to symbol information.
    ///
    /// Never fails: unresolvable addresses yield a record with the module
    /// reference (if any module's range contains the address) and empty
    /// function/file fields. Triggers a lazy module refresh on first use.
    pub fn lookup_symbol(&mut self, addr: Address) -> SymbolInfo
    {
        if !self.module_list_updated {
            self.refresh_module_list();
        }

        let mut info = SymbolInfo::unresolved(addr);
        info.module_index = module_index_for_address(&self.module_cache, addr);

        // The platform symbol engine: dladdr gives us the enclosing dynamic
        // symbol without allocating.
        let mut raw_name = FixedString::<256>::new();
        if let Some(sym_start) = platform::dynamic_symbol(addr, &mut raw_name) {
            demangle_into(raw_name.as_str(), &mut info.function);
            info.function_offset = addr.checked_sub(sym_start.value()).map(Address::value);
        }

        if self.allow_memory_allocation {
            self.resolve_source(addr, &mut info);
        }

        info
    }

    /// Resolve a batch of addresses. `out` is filled pairwise with `addrs`;
    /// extra entries in either slice are ignored.
    pub fn lookup_symbols(&mut self, addrs: &[Address], out: &mut [SymbolInfo]) -> usize
    {
        let n = addrs.len().min(out.len());
        for i in 0..n {
            out[i] = self.lookup_symbol(addrs[i]);
        }
        n
    }

    /// DWARF file/line (and fallback function name) resolution. Allocation
    /// permitted here; only reached when `allow_memory_allocation` is set.
    fn resolve_source(&mut self, addr: Address, info: &mut SymbolInfo)
    {
        let Some(idx) = info.module_index else {
            return;
        };

        if self.resolvers.len() < self.module_cache.len() {
            self.resolvers.resize_with(self.module_cache.len(), || None);
        }

        if self.resolvers[idx].is_none() {
            let m = &self.module_cache[idx];
            self.resolvers[idx] = DwarfResolver::load(Path::new(m.path.as_str()), m.base.value());
        }

        let Some(resolver) = self.resolvers[idx].as_ref() else {
            return;
        };

        if let Some(pos) = resolver.find_source(addr.value()) {
            info.file_path.set(&pos.file);
            info.file_line = pos.line;
        }

        if !info.has_function() {
            if let Some(raw) = resolver.find_function(addr.value()) {
                demangle_into(&raw, &mut info.function);
            }
        }
    }

    /// Format one thread's resolved callstack into `out`.
    ///
    /// Allocates; must not be called from inside a fault handler. Returns
    /// `false` when no frames could be captured (after appending the
    /// placeholder line).
    pub fn report_thread_callstack(&mut self, out: &mut String, skip_count: usize, sys_id: ThreadSysId) -> bool
    {
        let mut frames = [Address::ZERO; crate::types::MAX_BACKTRACE_FRAMES];
        let count = if sys_id.is_invalid() {
            self.get_backtrace(&mut frames, skip_count, None, None)
        } else {
            self.get_backtrace_from_thread_sys_id(&mut frames, skip_count, sys_id)
        };

        if count == 0 {
            out.push_str("<Unable to read backtrace>\n");
            return false;
        }

        for (i, frame) in frames[..count].iter().enumerate() {
            let info = self.lookup_symbol(*frame);
            let module_name = info
                .module_index
                .map_or("(unknown)", |idx| self.module_cache[idx].name.as_str());

            let _ = write!(out, "{i:<2} {module_name:<24} {frame} ");
            if info.has_function() {
                let _ = write!(out, "{}+{}", info.function, info.function_offset.unwrap_or(0));
            } else {
                out.push_str("(unknown function)");
            }
            if info.has_source_location() {
                let _ = write!(out, " {}:{}", info.file_path, info.file_line.unwrap_or(0));
            }
            out.push('\n');
        }

        true
    }

    /// Format every thread's resolved callstack into `out`.
    ///
    /// Allocates; must not be called from inside a fault handler.
    pub fn report_thread_callstacks(&mut self, out: &mut String, skip_count: usize) -> bool
    {
        let required = platform::thread_list(None, None);
        if required == 0 {
            out.push_str("<Unable to read thread list>\n");
            return false;
        }

        let mut ids = vec![ThreadSysId::INVALID; required];
        let written = platform::thread_list(None, Some(&mut ids)).min(ids.len());

        let current = platform::current_thread_sys_id();
        let mut any = false;
        for id in &ids[..written] {
            let mut name = FixedString::<32>::new();
            platform::thread_name(*id, &mut name);
            let _ = write!(
                out,
                "Thread id {} \"{}\"{}:\n",
                id,
                name,
                if *id == current { " (current)" } else { "" }
            );
            // Skip our own reporting frames for the current thread.
            let skip = if *id == current { skip_count + 1 } else { skip_count };
            any |= self.report_thread_callstack(out, skip, *id);
            out.push('\n');
        }

        any
    }
}

impl Default for SymbolLookup
{
    fn default() -> Self
    {
        Self::new()
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn synthetic_modules() -> [ModuleInfo; 3]
    {
        let mut a = ModuleInfo::empty();
        a.base = Address::new(0x1000);
        a.size = 0x1000;
        a.name.set("alpha");
        let mut b = ModuleInfo::empty();
        b.base = Address::new(0x2000);
        b.size = 0x1000;
        b.name.set("beta");
        let mut c = ModuleInfo::empty();
        c.base = Address::new(0x10_0000);
        c.size = 0x4000;
        c.name.set("gamma");
        [a, b, c]
    }

    #[test]
    fn install_modules_marks_list_updated()
    {
        let mut lookup = SymbolLookup::new();
        lookup.install_modules(&synthetic_modules());
        assert_eq!(lookup.modules().len(), 3);
        assert!(!lookup.modules_truncated());
    }

    #[test]
    fn lookup_symbol_attributes_module_by_range()
    {
        let mut lookup = SymbolLookup::new();
        lookup.install_modules(&synthetic_modules());
        lookup.enable_memory_allocation(false);

        let info = lookup.lookup_symbol(Address::new(0x2000));
        assert_eq!(info.module_index, Some(1));

        let info = lookup.lookup_symbol(Address::new(0x1fff));
        assert_eq!(info.module_index, Some(0));

        let info = lookup.lookup_symbol(Address::new(0x9000));
        assert_eq!(info.module_index, None);
    }

    #[test]
    fn module_info_array_reports_required_count()
    {
        let mut lookup = SymbolLookup::new();
        lookup.install_modules(&synthetic_modules());

        let mut out = [ModuleInfo::empty(); 2];
        let required = lookup.module_info_array(&mut out);
        assert_eq!(required, 3);
        assert_eq!(out[0].name.as_str(), "alpha");
        assert_eq!(out[1].name.as_str(), "beta");
    }
}
