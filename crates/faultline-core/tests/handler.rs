//! Tests for the exception handler: simulated faults, report emission,
//! guard exclusivity, and trap lifecycle.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use faultline_core::handler::{ExceptionHandler, FaultResponse};
use faultline_core::types::{Address, CpuContext};

/// Serializes the tests that install the process-wide trap; the
/// registration slot is a per-process singleton and the test harness runs
/// tests concurrently.
static TRAP_LOCK: Mutex<()> = Mutex::new(());

fn temp_path(name: &str) -> PathBuf
{
    let mut path = std::env::temp_dir();
    path.push(format!("faultline-test-{}-{}", std::process::id(), name));
    path
}

fn fault_site() -> Address
{
    Address::new(fault_site as usize as u64)
}

#[test]
fn simulated_fault_writes_a_full_report()
{
    let report = temp_path("full-report.txt");
    let _ = fs::remove_file(&report);

    let mut handler = ExceptionHandler::new();
    handler.set_exception_paths(Some(report.to_str().unwrap()), None);
    handler.set_fault_response(FaultResponse::Continue);
    handler.set_app_description("handler test app");
    handler.set_code_base_directories(&["/src/faultline"]);

    assert!(handler.simulate_fault(fault_site(), CpuContext::Unavailable));
    assert!(handler.fault_occurred());

    let text = fs::read_to_string(&report).expect("report file missing");
    let _ = fs::remove_file(&report);

    // CRLF line endings throughout.
    assert!(text.contains("\r\n"));
    assert!(!text.replace("\r\n", "").contains('\n'));

    // Sections appear in their fixed order.
    let sections = [
        "Exception Info",
        "Runtime Info",
        "Runtime Device Info",
        "App Info",
        "System Info",
        "Display adapter list",
        "Thread list",
        "Module list",
        "Process list",
    ];
    let mut last = 0usize;
    for section in sections {
        let pos = text.find(section).unwrap_or_else(|| panic!("missing section {section:?}"));
        assert!(pos >= last, "section {section:?} out of order");
        last = pos;
    }

    // Absent data renders placeholders, never omitted lines.
    assert!(text.contains("No devices registered."));
    assert!(text.contains("Unable to read display adapter list"));
    assert!(text.contains("Disabled by report privacy settings"));
    assert!(text.contains("App description: handler test app"));
    assert!(text.contains("Code base directory: /src/faultline"));
    assert!(text.contains("Simulated fault at instruction"));
}

#[cfg(target_os = "linux")]
#[test]
fn report_substitutes_placeholder_for_unreadable_backtrace()
{
    use std::sync::mpsc;

    // A parked foreign thread has no readable registers on this platform,
    // so its report entry must carry the placeholder rather than being
    // skipped. The name stays under the 15-character comm limit.
    let (park_tx, park_rx) = mpsc::channel::<()>();
    let (ready_tx, ready_rx) = mpsc::channel::<()>();
    let parked = std::thread::Builder::new()
        .name("parked-report".into())
        .spawn(move || {
            ready_tx.send(()).unwrap();
            park_rx.recv().unwrap();
        })
        .unwrap();
    ready_rx.recv().unwrap();

    let report = temp_path("placeholder-report.txt");
    let _ = fs::remove_file(&report);

    let mut handler = ExceptionHandler::new();
    handler.set_exception_paths(Some(report.to_str().unwrap()), None);
    handler.set_fault_response(FaultResponse::Continue);
    assert!(handler.simulate_fault(fault_site(), CpuContext::Unavailable));

    let text = fs::read_to_string(&report).expect("report file missing");
    let _ = fs::remove_file(&report);

    assert!(text.contains("parked-report"), "thread entry missing from report");
    assert!(text.contains("<Unable to read backtrace>"));

    park_tx.send(()).unwrap();
    parked.join().unwrap();
}

#[test]
fn reentrant_fault_is_declined_and_report_is_untouched()
{
    let report = temp_path("reentrant-report.txt");
    let _ = fs::remove_file(&report);

    let mut handler = ExceptionHandler::new();
    handler.set_exception_paths(Some(report.to_str().unwrap()), None);
    handler.set_fault_response(FaultResponse::Continue);

    assert!(handler.simulate_fault(fault_site(), CpuContext::Unavailable));
    let first = fs::read(&report).expect("report file missing");

    // Hold the guard as an in-progress fault would, then inject a second
    // fault: it must be declined without touching the first report.
    assert!(handler.acquire_handling_guard());
    assert!(!handler.simulate_fault(fault_site(), CpuContext::Unavailable));
    handler.release_handling_guard();

    let after = fs::read(&report).expect("report file missing");
    let _ = fs::remove_file(&report);
    assert_eq!(first, after, "declined fault modified the report");
}

#[test]
fn paused_handling_declines_faults()
{
    let mut handler = ExceptionHandler::new();
    handler.set_fault_response(FaultResponse::Continue);

    assert_eq!(handler.pause_handling(true), 1);
    assert!(!handler.simulate_fault(fault_site(), CpuContext::Unavailable));
    assert!(!handler.fault_occurred());

    assert_eq!(handler.pause_handling(false), 0);
    assert!(handler.simulate_fault(fault_site(), CpuContext::Unavailable));
}

#[test]
fn continue_response_resumes_exactly_once_per_fault()
{
    let invocations = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&invocations);

    let mut handler = ExceptionHandler::new();
    handler.set_fault_response(FaultResponse::Continue);
    handler.set_fault_listener(
        Some(Box::new(move |user_value, _, info, _| {
            assert_eq!(user_value, 7);
            assert!(!info.instruction_address.is_null());
            seen.fetch_add(1, Ordering::SeqCst);
        })),
        7,
    );

    let site = fault_site();
    assert!(handler.simulate_fault(site, CpuContext::Unavailable));
    assert_eq!(invocations.load(Ordering::SeqCst), 1);

    let info = handler.last_exception_info().expect("no capture recorded");
    assert_eq!(info.instruction_address, site);
}

#[test]
fn throw_response_declines_after_capture()
{
    let report = temp_path("throw-report.txt");
    let _ = fs::remove_file(&report);

    let mut handler = ExceptionHandler::new();
    handler.set_exception_paths(Some(report.to_str().unwrap()), None);
    handler.set_fault_response(FaultResponse::Throw);

    // Handled (report written) but not resumed.
    assert!(!handler.simulate_fault(fault_site(), CpuContext::Unavailable));
    assert!(handler.fault_occurred());
    assert!(report.exists(), "throw response must still produce the report");
    let _ = fs::remove_file(&report);
}

#[test]
fn minidump_path_template_produces_timestamped_file()
{
    let dir = std::env::temp_dir();
    let prefix = format!("faultline-test-{}-dump ", std::process::id());
    let template = dir.join(format!("{prefix}%s.dmp"));

    let mut handler = ExceptionHandler::new();
    handler.set_exception_paths(None, Some(template.to_str().unwrap()));
    handler.set_fault_response(FaultResponse::Continue);
    assert!(handler.simulate_fault(fault_site(), CpuContext::Unavailable));

    // Find the produced file and validate the substituted timestamp.
    let mut found = None;
    for entry in fs::read_dir(&dir).unwrap().flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(&prefix) && name.ends_with(".dmp") {
            found = Some(name);
            break;
        }
    }
    let name = found.expect("no timestamped minidump produced");
    let stamp = &name[prefix.len()..name.len() - ".dmp".len()];

    // YYYY-MM-DD HH.MM.SS
    assert_eq!(stamp.len(), 19, "unexpected timestamp {stamp:?}");
    let bytes = stamp.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        match i {
            4 | 7 => assert_eq!(*b, b'-', "timestamp {stamp:?}"),
            10 => assert_eq!(*b, b' ', "timestamp {stamp:?}"),
            13 | 16 => assert_eq!(*b, b'.', "timestamp {stamp:?}"),
            _ => assert!(b.is_ascii_digit(), "timestamp {stamp:?}"),
        }
    }

    let _ = fs::remove_file(dir.join(&name));
}

#[test]
fn enable_twice_is_idempotent()
{
    let _lock = TRAP_LOCK.lock().unwrap();

    let mut handler = ExceptionHandler::new();
    handler.set_fault_response(FaultResponse::Continue);

    handler.enable(true).expect("first enable failed");
    assert!(handler.is_enabled());

    // Second enable is a no-op; the handler stays installed.
    handler.enable(true).expect("second enable failed");
    assert!(handler.is_enabled());

    handler.enable(false).expect("disable failed");
    assert!(!handler.is_enabled());

    // Disabling again is also a no-op.
    handler.enable(false).expect("second disable failed");
    assert!(!handler.is_enabled());
}

#[test]
fn second_handler_instance_is_rejected()
{
    let _lock = TRAP_LOCK.lock().unwrap();

    let mut first = ExceptionHandler::new();
    first.enable(true).expect("first enable failed");

    let mut second = ExceptionHandler::new();
    let err = second.enable(true).expect_err("second handler must be rejected");
    assert!(matches!(err, faultline_core::FaultlineError::AlreadyInstalled));

    first.enable(false).expect("disable failed");

    // With the slot free again, the second instance can take over.
    second.enable(true).expect("enable after release failed");
    second.enable(false).expect("disable failed");
}

#[test]
fn dropping_an_enabled_handler_releases_the_slot()
{
    let _lock = TRAP_LOCK.lock().unwrap();

    {
        let mut handler = ExceptionHandler::new();
        handler.enable(true).expect("enable failed");
    }

    let mut next = ExceptionHandler::new();
    next.enable(true).expect("slot was not released by drop");
    next.enable(false).expect("disable failed");
}
