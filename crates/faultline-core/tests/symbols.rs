//! Tests for module lookup, backtrace capture, and thread enumeration

use faultline_core::symbols::{current_thread_stack_bounds, SymbolLookup};
use faultline_core::types::{Address, FixedString, ModuleInfo, ThreadHandle, ThreadSysId};

fn synthetic_modules() -> [ModuleInfo; 3]
{
    let mut a = ModuleInfo::empty();
    a.base = Address::new(0x10_0000);
    a.size = 0x1_0000;
    a.name = FixedString::from("first");
    let mut b = ModuleInfo::empty();
    b.base = Address::new(0x11_0000);
    b.size = 0x1_0000;
    b.name = FixedString::from("second");
    let mut c = ModuleInfo::empty();
    c.base = Address::new(0x20_0000);
    c.size = 0x4_0000;
    c.name = FixedString::from("third");
    [a, b, c]
}

#[test]
fn lookup_symbol_attributes_every_in_range_address()
{
    let mut lookup = SymbolLookup::new();
    lookup.install_modules(&synthetic_modules());
    lookup.enable_memory_allocation(false);

    // Every address inside a module's range resolves to that module.
    for probe in [0x10_0000u64, 0x10_8000, 0x10_ffff] {
        let info = lookup.lookup_symbol(Address::new(probe));
        assert_eq!(info.module_index, Some(0), "probe 0x{probe:x}");
    }

    // Addresses outside every range resolve to no module, never an error.
    for probe in [0x0u64, 0xf_ffff, 0x19_0000, 0x24_0000] {
        let info = lookup.lookup_symbol(Address::new(probe));
        assert_eq!(info.module_index, None, "probe 0x{probe:x}");
    }
}

#[test]
fn lookup_symbol_base_boundary_prefers_exact_module()
{
    let mut lookup = SymbolLookup::new();
    lookup.install_modules(&synthetic_modules());
    lookup.enable_memory_allocation(false);

    // Exactly at the second module's base.
    let info = lookup.lookup_symbol(Address::new(0x11_0000));
    assert_eq!(info.module_index, Some(1));

    // One byte below belongs to the first module, never the second.
    let info = lookup.lookup_symbol(Address::new(0x10_ffff));
    assert_eq!(info.module_index, Some(0));
}

#[test]
fn lookup_symbols_fills_pairwise()
{
    let mut lookup = SymbolLookup::new();
    lookup.install_modules(&synthetic_modules());
    lookup.enable_memory_allocation(false);

    let addrs = [Address::new(0x10_0001), Address::new(0x20_0001), Address::new(0x1)];
    let mut out = [Default::default(); 3];
    let n = lookup.lookup_symbols(&addrs, &mut out);

    assert_eq!(n, 3);
    assert_eq!(out[0].module_index, Some(0));
    assert_eq!(out[1].module_index, Some(2));
    assert_eq!(out[2].module_index, None);
}

#[test]
fn refresh_module_list_finds_this_executable()
{
    let mut lookup = SymbolLookup::new();
    lookup.initialize();
    let count = lookup.refresh_module_list();

    // At minimum the test executable itself is loaded.
    assert!(count >= 1, "no modules enumerated");

    // And the current instruction pointer must fall inside one of them.
    let here = Address::new(refresh_module_list_finds_this_executable as usize as u64);
    assert!(lookup.module_for_address(here).is_some(), "test code not covered by any module");
}

#[test]
fn lookup_symbol_resolves_own_function_module()
{
    let mut lookup = SymbolLookup::new();
    lookup.initialize();
    lookup.refresh_module_list();

    let here = Address::new(lookup_symbol_resolves_own_function_module as usize as u64 + 4);
    let info = lookup.lookup_symbol(here);
    assert!(info.module_index.is_some());
}

#[test]
fn get_backtrace_respects_capacity()
{
    let lookup = SymbolLookup::new();

    // Canary slots beyond the passed capacity must stay untouched.
    let mut frames = [Address::new(0xcafe_babe); 8];
    let count = lookup.get_backtrace(&mut frames[..4], 0, None, None);

    assert!(count <= 4);
    for slot in &frames[4..] {
        assert_eq!(*slot, Address::new(0xcafe_babe));
    }
}

#[test]
fn get_backtrace_with_zero_capacity_writes_nothing()
{
    let lookup = SymbolLookup::new();
    let mut frames: [Address; 0] = [];
    let count = lookup.get_backtrace(&mut frames, 0, None, None);
    assert_eq!(count, 0);
}

#[test]
fn get_thread_list_returns_required_count_without_output()
{
    let lookup = SymbolLookup::new();

    // Capacity zero: the true required count still comes back.
    let required = lookup.get_thread_list(None, None);
    assert!(required >= 1, "at least the calling thread must be enumerated");

    // Query-size-then-fill: a full-size buffer receives exactly that many.
    let mut ids = vec![ThreadSysId::INVALID; required + 4];
    let required_again = lookup.get_thread_list(None, Some(&mut ids));
    assert!(required_again >= 1);
    assert!(ids[..1].iter().all(|id| !id.is_invalid()));
}

#[test]
fn get_thread_list_small_capacity_still_reports_total()
{
    let lookup = SymbolLookup::new();
    let required = lookup.get_thread_list(None, None);

    let mut one = [ThreadSysId::INVALID; 1];
    let reported = lookup.get_thread_list(None, Some(&mut one));
    assert_eq!(reported, required);
}

#[test]
fn backtrace_from_current_thread_handle_matches_direct_capture()
{
    let lookup = SymbolLookup::new();

    let mut direct = [Address::ZERO; 16];
    let direct_count = lookup.get_backtrace(&mut direct, 0, None, None);

    let mut via_handle = [Address::ZERO; 16];
    let handle_count = lookup.get_backtrace_from_thread_handle(&mut via_handle, 0, ThreadHandle::INVALID);

    // Exact frames differ (different call depth), but availability must
    // agree: both empty or both populated.
    assert_eq!(direct_count == 0, handle_count == 0);
}

#[test]
fn current_thread_stack_bounds_cover_a_local()
{
    let Some(bounds) = current_thread_stack_bounds() else {
        // Unknown bounds are a documented degradation, not a failure.
        return;
    };

    let local = 0u64;
    assert!(bounds.contains(Address::new(&local as *const u64 as u64)));
    assert!(bounds.size() > 0);
}

#[test]
fn module_cache_truncation_is_reported()
{
    let mut lookup = SymbolLookup::new();
    let mut modules = Vec::new();
    for i in 0..300u64 {
        let mut m = ModuleInfo::empty();
        m.base = Address::new(0x1000 * (i + 1));
        m.size = 0x100;
        modules.push(m);
    }

    lookup.install_modules(&modules);
    assert_eq!(lookup.modules().len(), faultline_core::types::MODULE_CACHE_CAPACITY);
    assert!(lookup.modules_truncated());
}

#[test]
fn shutdown_clears_cache_but_reinitializes()
{
    let mut lookup = SymbolLookup::new();
    lookup.initialize();
    assert!(lookup.is_initialized());
    // Idempotent.
    lookup.initialize();
    assert!(lookup.is_initialized());

    lookup.install_modules(&synthetic_modules());
    assert_eq!(lookup.modules().len(), 3);

    lookup.shutdown();
    assert!(!lookup.is_initialized());
    assert!(lookup.modules().is_empty());

    lookup.initialize();
    assert!(lookup.is_initialized());
}
