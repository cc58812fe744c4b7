//! Tests for the platform-agnostic data model

use faultline_core::types::{
    module_index_for_address, Address, Backtrace, CpuContext, FixedString, ModuleInfo, StackBounds, ThreadSysId,
    X86_64Context, MAX_BACKTRACE_FRAMES,
};

#[test]
fn test_address_roundtrip()
{
    let addr = Address::from(0x1000u64);
    assert_eq!(addr.value(), 0x1000);
    assert_eq!(u64::from(addr), 0x1000);
    assert!(!addr.is_null());
    assert!(Address::ZERO.is_null());
}

#[test]
fn test_address_display_is_fixed_width_hex()
{
    let addr = Address::new(0xabcd);
    assert_eq!(addr.to_string(), "0x000000000000abcd");
}

#[test]
fn test_address_arithmetic()
{
    let addr = Address::from(0x1000u64);
    assert_eq!((addr + 0x100).value(), 0x1100);
    assert_eq!((addr - 0x100).value(), 0xf00);
    assert_eq!(addr.checked_add(u64::MAX), None);
    assert_eq!(addr.checked_sub(0x2000), None);
}

#[test]
fn test_fixed_string_truncates()
{
    let mut s = FixedString::<8>::new();
    s.push_str("0123456789");
    assert_eq!(s.as_str(), "01234567");
    assert_eq!(s.len(), 8);
    assert_eq!(s.capacity(), 8);
}

#[test]
fn test_fixed_string_set_replaces()
{
    let mut s = FixedString::<16>::from("first");
    s.set("second");
    assert_eq!(s.as_str(), "second");
}

#[test]
fn test_backtrace_capacity_and_truncation()
{
    let mut bt = Backtrace::new();
    assert!(bt.is_empty());
    assert!(!bt.truncated());

    for i in 0..MAX_BACKTRACE_FRAMES {
        assert!(bt.push(Address::new(0x1000 + i as u64)));
    }
    assert_eq!(bt.len(), MAX_BACKTRACE_FRAMES);

    // One past capacity is dropped and recorded as truncation.
    assert!(!bt.push(Address::new(0xdead)));
    assert_eq!(bt.len(), MAX_BACKTRACE_FRAMES);
    assert!(bt.truncated());
}

#[test]
fn test_backtrace_fill_from_records_thread()
{
    let frames = [Address::new(1), Address::new(2)];
    let mut bt = Backtrace::new();
    bt.fill_from(&frames, false, ThreadSysId::new(42));

    assert_eq!(bt.frames(), &frames);
    assert_eq!(bt.thread(), ThreadSysId::new(42));
    assert!(!bt.truncated());
}

#[test]
fn test_module_contains_is_half_open()
{
    let mut m = ModuleInfo::empty();
    m.base = Address::new(0x1000);
    m.size = 0x1000;

    assert!(m.contains(Address::new(0x1000)));
    assert!(m.contains(Address::new(0x1fff)));
    assert!(!m.contains(Address::new(0x0fff)));
    assert!(!m.contains(Address::new(0x2000)));
}

#[test]
fn test_module_range_search_boundaries()
{
    let mut a = ModuleInfo::empty();
    a.base = Address::new(0x1000);
    a.size = 0x1000;
    let mut b = ModuleInfo::empty();
    b.base = Address::new(0x2000);
    b.size = 0x1000;
    let mut c = ModuleInfo::empty();
    c.base = Address::new(0x5000);
    c.size = 0x1000;
    let modules = [a, b, c];

    // Exactly at base of the second module resolves to it; one below
    // resolves to its lower neighbor, never to the second module.
    assert_eq!(module_index_for_address(&modules, Address::new(0x2000)), Some(1));
    assert_eq!(module_index_for_address(&modules, Address::new(0x1fff)), Some(0));
    // A gap address resolves to nothing.
    assert_eq!(module_index_for_address(&modules, Address::new(0x4000)), None);
}

#[test]
fn test_stack_bounds_contains()
{
    let bounds = StackBounds {
        base: Address::new(0x8000),
        limit: Address::new(0x4000),
    };

    assert!(bounds.contains(Address::new(0x4000)));
    assert!(bounds.contains(Address::new(0x7fff)));
    assert!(!bounds.contains(Address::new(0x8000)));
    assert!(!bounds.contains(Address::new(0x3fff)));
    assert_eq!(bounds.size(), 0x4000);
}

#[test]
fn test_cpu_context_accessors()
{
    let ctx = CpuContext::X86_64(X86_64Context {
        rip: 0x1111,
        rsp: 0x2222,
        rbp: 0x3333,
        ..X86_64Context::default()
    });

    assert!(ctx.is_available());
    assert_eq!(ctx.instruction_pointer(), Some(Address::new(0x1111)));
    assert_eq!(ctx.stack_pointer(), Some(Address::new(0x2222)));
    assert_eq!(ctx.frame_pointer(), Some(Address::new(0x3333)));

    let none = CpuContext::Unavailable;
    assert!(!none.is_available());
    assert_eq!(none.instruction_pointer(), None);
}
