//! # Exception Handler
//!
//! The orchestrator of the crash capture subsystem: owns configuration,
//! the single in-flight handling guard, and the capture sequence that runs
//! when the platform trap delivers a fault.
//!
//! ## State machine
//!
//! Disabled → (`enable(true)`) → Enabled → (fault) → Handling →
//! (Enabled | process exit), depending on the configured [`FaultResponse`].
//!
//! ## Exclusivity
//!
//! At most one fault is in handling per instance at any time, enforced by a
//! lock-free compare-and-swap guard. A fault arriving while the guard is
//! held is not queued: it is declined and falls through to the next handler
//! in the platform chain. The handler never attempts to be re-entrant; it
//! may be holding the report file and symbol state that are not
//! re-entrant-safe.
//!
//! Only one handler may be enabled per process. The process-wide
//! registration slot is checked at `enable(true)` and enabling a second
//! instance fails loudly with [`FaultlineError::AlreadyInstalled`] rather
//! than silently replacing the first.
//!
//! ## Allocation discipline
//!
//! Everything reachable from the handling sequence writes into
//! fixed-capacity buffers owned by the handler or the current stack frame.
//! Configuration setters may allocate freely; they are documented to run
//! only before enabling or between faults.
//!
//! ## Example
//!
//! ```rust,no_run
//! use faultline_core::handler::ExceptionHandler;
//!
//! let mut handler = ExceptionHandler::new();
//! handler.set_exception_paths(Some("/tmp/crash-report %s.txt"), None);
//! handler.enable(true)?;
//! // ... the application runs; a fault now produces /tmp/crash-report <datetime>.txt
//! # Ok::<(), faultline_core::error::FaultlineError>(())
//! ```

use std::cell::UnsafeCell;
use std::fmt::Write as _;
use std::fs::File;
use std::path::PathBuf;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicPtr, AtomicU32, Ordering};

use tracing::{debug, warn};

use crate::device::DeviceInfoProvider;
use crate::error::{FaultlineError, FaultlineResult};
use crate::platform::{self, FaultDisposition, FaultPayload, RawFault};
use crate::report::{expand_path_template, format_datetime, ReportWriter};
use crate::symbols::SymbolLookup;
use crate::types::{
    Address, CpuContext, ExceptionInfo, FaultDetail, FixedString, ModuleInfo, ThreadSysId, MAX_BACKTRACE_FRAMES,
};

/// What to do with the fault after the handling sequence completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultResponse
{
    /// Resume execution at the faulting instruction. The fault recurs
    /// unless its cause was fixed; meant for intentionally recoverable
    /// test faults.
    Continue,
    /// Swallow the fault and terminate with the configured exit code.
    Handle,
    /// Terminate immediately with the configured exit code.
    Terminate,
    /// Decline further handling: the next installed handler (or the OS
    /// default behavior) proceeds.
    Throw,
    /// The conservative production default; behaves like `Handle`.
    Default,
}

/// Listener invoked once per handled fault, synchronously inside the
/// handling window. It inherits the no-allocation constraint. The last
/// argument is the path of the finished report, when one was written.
pub type FaultListener = dyn Fn(usize, &ExceptionHandler, &ExceptionInfo, Option<&str>) + Send + Sync;

/// Process-wide registration slot for the single enabled handler.
///
/// The platform trap's free functions dispatch through this. Single-owner
/// semantics: set by `enable(true)`, cleared by `enable(false)`/drop.
static INSTALLED_HANDLER: AtomicPtr<ExceptionHandler> = AtomicPtr::new(ptr::null_mut());

/// Entry point for the platform traps: route a raw fault to the enabled
/// handler, declining when none is registered.
pub(crate) fn dispatch_fault(raw: &RawFault) -> FaultDisposition
{
    let handler = INSTALLED_HANDLER.load(Ordering::Acquire);
    if handler.is_null() {
        return FaultDisposition::Forward;
    }
    unsafe { &*handler }.on_fault(raw)
}

/// Mutable capture state, written only while the handling guard is held.
struct HandlingState
{
    info: ExceptionInfo,
    symbols: SymbolLookup,
    report_path_actual: FixedString<512>,
    minidump_path_actual: FixedString<512>,
    minidump_written: bool,
}

/// Asynchronous fault handling and crash report generation.
///
/// Construct, configure, then call [`Self::enable`]. The instance must stay
/// where it is while enabled: the platform trap holds its address, so
/// enabling registers the handler by location. Dropping an enabled handler
/// disables it first.
///
/// Configuration setters take `&mut self` and must only run before enabling
/// or between faults, never concurrently with an active fault.
pub struct ExceptionHandler
{
    // Configuration
    report_path: Option<String>,
    minidump_path: Option<String>,
    response: FaultResponse,
    report_privacy: bool,
    app_description: String,
    code_base_dirs: Vec<String>,
    terminate_code: i32,
    minidump_flags: u32,
    listener: Option<Box<FaultListener>>,
    listener_user_value: usize,
    device_provider: Option<Box<dyn DeviceInfoProvider>>,

    // Runtime
    enabled: bool,
    pause_count: AtomicI32,
    handling: AtomicU32,
    fault_occurred: AtomicBool,
    trap: Option<platform::TrapState>,
    state: UnsafeCell<HandlingState>,
}

// The handling state is guarded by the CAS `handling` flag (single writer),
// and configuration is contractually quiescent during faults.
unsafe impl Sync for ExceptionHandler {}

impl ExceptionHandler
{
    /// Create a disabled handler with default configuration: no output
    /// paths, privacy enabled, `FaultResponse::Default`.
    pub fn new() -> Self
    {
        let mut symbols = SymbolLookup::new();
        // The handling window cannot touch the allocator.
        symbols.enable_memory_allocation(false);

        Self {
            report_path: None,
            minidump_path: None,
            response: FaultResponse::Default,
            report_privacy: true,
            app_description: String::new(),
            code_base_dirs: Vec::new(),
            terminate_code: 1,
            minidump_flags: 0,
            listener: None,
            listener_user_value: 0,
            device_provider: None,
            enabled: false,
            pause_count: AtomicI32::new(0),
            handling: AtomicU32::new(0),
            fault_occurred: AtomicBool::new(false),
            trap: None,
            state: UnsafeCell::new(HandlingState {
                info: ExceptionInfo::default(),
                symbols,
                report_path_actual: FixedString::new(),
                minidump_path_actual: FixedString::new(),
                minidump_written: false,
            }),
        }
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    /// Set the report and minidump path templates.
    ///
    /// A `%s` in either template is substituted with a file-name-safe
    /// date-time at fault time. The literal `"default"` selects the
    /// per-user crash dump directory with standard file names. `None`
    /// disables that output entirely.
    pub fn set_exception_paths(&mut self, report_path: Option<&str>, minidump_path: Option<&str>)
    {
        self.report_path = report_path.map(|p| {
            if p.eq_ignore_ascii_case("default") {
                let mut path = crash_dump_directory(None, None);
                path.push("Exception Report (%s).txt");
                path.to_string_lossy().into_owned()
            } else {
                p.to_owned()
            }
        });

        self.minidump_path = minidump_path.map(|p| {
            if p.eq_ignore_ascii_case("default") {
                let mut path = crash_dump_directory(None, None);
                path.push("Exception Minidump (%s).dmp");
                path.to_string_lossy().into_owned()
            } else {
                p.to_owned()
            }
        });
    }

    /// Compose both output paths from organization/application names under
    /// the per-user crash dump directory, creating it as needed.
    ///
    /// The format arguments are file-name templates (with the usual `%s`
    /// date-time token), e.g. `"Exception Report (%s).txt"`.
    pub fn set_paths_from_names(&mut self, organization: &str, application: &str, report_format: &str, minidump_format: &str)
    {
        let dir = crash_dump_directory(Some(organization), Some(application));
        let report = dir.join(report_format);
        let minidump = dir.join(minidump_format);
        self.report_path = Some(report.to_string_lossy().into_owned());
        self.minidump_path = Some(minidump.to_string_lossy().into_owned());
    }

    /// Select the response applied after a fault is handled.
    pub fn set_fault_response(&mut self, response: FaultResponse)
    {
        self.response = response;
    }

    /// Exit code used by the terminating responses.
    pub fn set_terminate_code(&mut self, code: i32)
    {
        self.terminate_code = code;
    }

    /// Enable or disable report privacy. While enabled (the default), the
    /// process list section carries a placeholder instead of data that can
    /// identify what else the user is running.
    pub fn set_report_privacy(&mut self, enabled: bool)
    {
        self.report_privacy = enabled;
    }

    /// Free-text application description embedded in reports.
    pub fn set_app_description(&mut self, description: &str)
    {
        self.app_description = description.to_owned();
    }

    /// Source-code root directories, informational only, embedded in
    /// reports to help map file paths back to a checkout.
    pub fn set_code_base_directories(&mut self, directories: &[&str])
    {
        self.code_base_dirs = directories.iter().map(|d| (*d).to_owned()).collect();
    }

    /// Pass-through content flags for the platform dump writer.
    pub fn set_minidump_flags(&mut self, flags: u32)
    {
        self.minidump_flags = flags;
    }

    /// Register the per-fault listener callback.
    pub fn set_fault_listener(&mut self, listener: Option<Box<FaultListener>>, user_value: usize)
    {
        self.listener = listener;
        self.listener_user_value = user_value;
    }

    /// Register the device layer feeding the report's device-info section.
    pub fn set_device_info_provider(&mut self, provider: Option<Box<dyn DeviceInfoProvider>>)
    {
        self.device_provider = provider;
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Install or remove the process-wide trap.
    ///
    /// Idempotent in both directions: enabling an enabled handler (or
    /// disabling a disabled one) is a no-op. Enabling fails with
    /// [`FaultlineError::AlreadyInstalled`] when a different instance holds
    /// the process registration.
    pub fn enable(&mut self, enable: bool) -> FaultlineResult<()>
    {
        if enable == self.enabled {
            return Ok(());
        }

        if enable {
            let self_ptr = self as *mut ExceptionHandler;
            if let Err(existing) =
                INSTALLED_HANDLER.compare_exchange(ptr::null_mut(), self_ptr, Ordering::AcqRel, Ordering::Acquire)
            {
                if existing != self_ptr {
                    return Err(FaultlineError::AlreadyInstalled);
                }
            }

            // Pre-warm the symbol state so the handling window starts from
            // a populated module cache.
            {
                let state = self.state.get_mut();
                state.symbols.initialize();
                state.symbols.refresh_module_list();
            }

            match platform::install_trap() {
                Ok(trap) => {
                    self.trap = Some(trap);
                    self.enabled = true;
                    debug!("exception handler enabled");
                    Ok(())
                }
                Err(err) => {
                    let _ =
                        INSTALLED_HANDLER.compare_exchange(self_ptr, ptr::null_mut(), Ordering::AcqRel, Ordering::Acquire);
                    Err(err)
                }
            }
        } else {
            if let Some(mut trap) = self.trap.take() {
                if let Err(err) = platform::remove_trap(&mut trap) {
                    warn!("trap removal reported an error: {err}");
                }
            }

            let self_ptr = self as *mut ExceptionHandler;
            let _ = INSTALLED_HANDLER.compare_exchange(self_ptr, ptr::null_mut(), Ordering::AcqRel, Ordering::Acquire);

            self.state.get_mut().symbols.shutdown();
            self.enabled = false;
            debug!("exception handler disabled");
            Ok(())
        }
    }

    /// Returns `true` while the trap is installed.
    pub fn is_enabled(&self) -> bool
    {
        self.enabled
    }

    /// Pause or unpause handling without uninstalling the trap.
    ///
    /// Pauses are additive; every `pause_handling(true)` must eventually be
    /// matched by `pause_handling(false)`. While the count is nonzero the
    /// trap declines every fault immediately. Callable from any thread.
    /// Returns the new pause count.
    pub fn pause_handling(&self, pause: bool) -> i32
    {
        if pause {
            self.pause_count.fetch_add(1, Ordering::AcqRel) + 1
        } else {
            self.pause_count.fetch_sub(1, Ordering::AcqRel) - 1
        }
    }

    /// Returns `true` once any fault has been handled by this instance.
    pub fn fault_occurred(&self) -> bool
    {
        self.fault_occurred.load(Ordering::Acquire)
    }

    /// Snapshot of the most recent capture, or `None` before the first
    /// handled fault. Unreliable while a fault is actively being handled.
    pub fn last_exception_info(&self) -> Option<ExceptionInfo>
    {
        if !self.fault_occurred() || self.is_handling() {
            return None;
        }
        Some(unsafe { &*self.state.get() }.info)
    }

    // ------------------------------------------------------------------
    // Handling guard
    // ------------------------------------------------------------------

    /// Returns `true` while a fault is being handled.
    pub fn is_handling(&self) -> bool
    {
        self.handling.load(Ordering::Acquire) != 0
    }

    /// Acquire the exclusivity guard directly. Test/diagnostic use.
    #[doc(hidden)]
    pub fn acquire_handling_guard(&self) -> bool
    {
        self.handling
            .compare_exchange(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Release the exclusivity guard directly. Test/diagnostic use.
    #[doc(hidden)]
    pub fn release_handling_guard(&self)
    {
        self.handling.store(0, Ordering::Release);
    }

    // ------------------------------------------------------------------
    // Fault entry points
    // ------------------------------------------------------------------

    /// Inject a synthetic fault through the full handling sequence.
    ///
    /// Used by test harnesses and diagnostics to exercise capture, report
    /// and minidump emission, and the listener without raising a real
    /// hardware fault. Returns `true` when the fault was handled and the
    /// response would resume execution at the recorded fault site; `false`
    /// when it was declined (guard busy, handling paused).
    ///
    /// A terminating response exits the process, exactly as it would for a
    /// real fault.
    pub fn simulate_fault(&self, instruction: Address, context: CpuContext) -> bool
    {
        let raw = RawFault {
            detail: FaultDetail::Simulated,
            context,
            thread_handle: platform::current_thread_handle(),
            thread_sys_id: platform::current_thread_sys_id(),
            instruction,
            memory: instruction,
            payload: FaultPayload::None,
        };

        matches!(self.on_fault(&raw), FaultDisposition::Resume)
    }

    /// The handling sequence. Called by the platform trap (via
    /// [`dispatch_fault`]) with the raw platform fault record.
    pub(crate) fn on_fault(&self, raw: &RawFault) -> FaultDisposition
    {
        if self.pause_count.load(Ordering::Acquire) > 0 {
            return FaultDisposition::Forward;
        }

        // One capture at a time; a concurrent fault is declined, not queued.
        if !self.acquire_handling_guard() {
            return FaultDisposition::Forward;
        }

        self.fault_occurred.store(true, Ordering::Release);

        let state = unsafe { &mut *self.state.get() };
        self.capture(state, raw);

        // Dump before report so the report can reference the dump path.
        self.write_minidump(state, raw);
        self.write_report(state);

        if let Some(listener) = &self.listener {
            let report_path = if state.report_path_actual.is_empty() {
                None
            } else {
                Some(state.report_path_actual.as_str())
            };
            listener(self.listener_user_value, self, &state.info, report_path);
        }

        self.release_handling_guard();

        match self.response {
            FaultResponse::Continue => FaultDisposition::Resume,
            FaultResponse::Throw => FaultDisposition::Forward,
            FaultResponse::Terminate | FaultResponse::Handle | FaultResponse::Default => {
                // Intentional, irreversible; always the last action taken.
                unsafe { libc::_exit(self.terminate_code) }
            }
        }
    }

    // ------------------------------------------------------------------
    // Capture
    // ------------------------------------------------------------------

    fn capture(&self, state: &mut HandlingState, raw: &RawFault)
    {
        let info = &mut state.info;
        info.reset();

        info.timestamp_secs = unsafe { libc::time(ptr::null_mut()) } as i64;
        info.thread_handle = raw.thread_handle;
        info.thread_sys_id = raw.thread_sys_id;
        platform::thread_name(raw.thread_sys_id, &mut info.thread_name);

        info.context = raw.context;
        info.detail = raw.detail;
        info.instruction_address = raw.instruction;
        info.memory_address = raw.memory;

        if raw.context.is_available() {
            state
                .symbols
                .capture_backtrace(&mut info.backtrace, 0, Some(&raw.context), raw.thread_sys_id);
        } else {
            // No captured registers (simulated fault): walk our own stack,
            // hiding the handling frames.
            state
                .symbols
                .capture_backtrace(&mut info.backtrace, 2, None, raw.thread_sys_id);
        }

        build_description(info);

        info.symbol = state.symbols.lookup_symbol(raw.instruction);
    }

    // ------------------------------------------------------------------
    // Outputs
    // ------------------------------------------------------------------

    fn write_minidump(&self, state: &mut HandlingState, raw: &RawFault)
    {
        state.minidump_path_actual.clear();
        state.minidump_written = false;

        let Some(template) = self.minidump_path.as_deref() else {
            return;
        };

        expand_path_template(template, state.info.timestamp_secs, &mut state.minidump_path_actual);
        state.minidump_written = platform::write_minidump(state.minidump_path_actual.as_str(), raw, self.minidump_flags);
    }

    fn write_report(&self, state: &mut HandlingState)
    {
        state.report_path_actual.clear();

        let Some(template) = self.report_path.as_deref() else {
            return;
        };

        let mut path = FixedString::<512>::new();
        expand_path_template(template, state.info.timestamp_secs, &mut path);

        // Total failure to open the output file is the one case where no
        // report is produced, and it is deliberately silent.
        let Some(file) = open_report_file(path.as_str()) else {
            return;
        };
        state.report_path_actual.push_str(path.as_str());

        let mut w = ReportWriter::new(file);
        self.write_exception_info_section(&mut w, state);
        self.write_runtime_sections(&mut w);
        self.write_app_info_section(&mut w);
        write_system_info_section(&mut w);
        write_display_adapter_section(&mut w);
        self.write_thread_list_section(&mut w, state);
        write_module_list_section(&mut w, &mut state.symbols);
        self.write_process_list_section(&mut w);
        let _ = w.finish();
    }

    fn write_exception_info_section(&self, w: &mut ReportWriter<File>, state: &mut HandlingState)
    {
        let info = &state.info;

        w.line(format_args!("Exception Info"));
        w.line(format_args!("Exception report file: {}", state.report_path_actual));

        if !state.minidump_path_actual.is_empty() {
            if state.minidump_written {
                w.line(format_args!("Exception minidump file: {}", state.minidump_path_actual));
            } else {
                w.line(format_args!("Exception minidump file: <unavailable on this platform>"));
            }
        }

        let mut stamp = FixedString::<64>::new();
        format_datetime(info.timestamp_secs, false, false, &mut stamp);
        w.line(format_args!("Time (GMT): {stamp}"));
        format_datetime(info.timestamp_secs, true, false, &mut stamp);
        w.line(format_args!("Time (local): {stamp}"));

        if info.thread_name.is_empty() {
            w.line(format_args!("Thread name: (not available)"));
        } else {
            w.line(format_args!("Thread name: {}", info.thread_name));
        }
        w.line(format_args!("Thread handle: {}", info.thread_handle));
        w.line(format_args!("Thread sys id: {}", info.thread_sys_id));

        w.line(format_args!(
            "Exception instruction address: {} (see callstack below)",
            info.instruction_address
        ));
        w.line(format_args!("Exception memory address: {}", info.memory_address));
        w.line(format_args!("Exception description: {}", info.description));

        if info.symbol.has_source_location() {
            w.line(format_args!(
                "Exception location: {} ({})",
                info.symbol.file_path,
                info.symbol.file_line.unwrap_or(0)
            ));
        } else if info.symbol.has_function() {
            w.line(format_args!(
                "Exception location: {}+{}",
                info.symbol.function,
                info.symbol.function_offset.unwrap_or(0)
            ));
        }
    }

    fn write_runtime_sections(&self, w: &mut ReportWriter<File>)
    {
        w.blank();
        w.line(format_args!("Runtime Info"));
        w.line(format_args!("Runtime version: {}", env!("CARGO_PKG_VERSION")));

        w.blank();
        w.line(format_args!("Runtime Device Info"));
        match &self.device_provider {
            Some(provider) => {
                let mut count = 0usize;
                provider.for_each_device(&mut |record| {
                    count += 1;
                    w.line(format_args!("Device {}: {}", record.label, record.detail));
                    match record.last_error {
                        Some(err) => w.line(format_args!("Device last error: {err}")),
                        None => w.line(format_args!("Device last error: (none)")),
                    }
                });
                if count == 0 {
                    w.line(format_args!("No devices registered."));
                }
            }
            None => w.line(format_args!("No devices registered.")),
        }
    }

    fn write_app_info_section(&self, w: &mut ReportWriter<File>)
    {
        w.blank();
        w.line(format_args!("App Info"));

        let mut path = FixedString::<256>::new();
        platform::process_path(&mut path);
        if path.is_empty() {
            w.line(format_args!("Process path: (unknown)"));
        } else {
            w.line(format_args!("Process path: {path}"));
        }

        w.line(format_args!("Process id: {}", std::process::id()));
        w.line(format_args!("App format: {} bit", std::mem::size_of::<usize>() * 8));

        if !self.app_description.is_empty() {
            w.line(format_args!("App description: {}", self.app_description));
        }
        for dir in &self.code_base_dirs {
            w.line(format_args!("Code base directory: {dir}"));
        }
    }

    fn write_thread_list_section(&self, w: &mut ReportWriter<File>, state: &mut HandlingState)
    {
        w.blank();
        w.line(format_args!("Thread list"));

        let mut ids = [ThreadSysId::INVALID; 256];
        let required = state.symbols.get_thread_list(None, Some(&mut ids));
        if required == 0 {
            w.line(format_args!("<Unable to read thread list>"));
            return;
        }

        let shown = required.min(ids.len());
        for id in &ids[..shown] {
            let mut name = FixedString::<32>::new();
            platform::thread_name(*id, &mut name);
            let mut run_state = FixedString::<64>::new();
            platform::thread_run_state(*id, &mut run_state);

            let faulting = *id == state.info.thread_sys_id;
            w.line(format_args!(
                "Thread \"{}\" id: {}, state: {}{}",
                if name.is_empty() { "(unnamed)" } else { name.as_str() },
                id,
                run_state,
                if faulting { ", faulting thread" } else { "" }
            ));

            if faulting {
                let backtrace = state.info.backtrace;
                write_backtrace_lines(w, &mut state.symbols, backtrace.frames(), backtrace.truncated());
            } else {
                let mut frames = [Address::ZERO; MAX_BACKTRACE_FRAMES];
                let count = state.symbols.get_backtrace_from_thread_sys_id(&mut frames, 0, *id);
                write_backtrace_lines(w, &mut state.symbols, &frames[..count], false);
            }
            w.blank();
        }

        if required > shown {
            w.line(format_args!("(thread list truncated: {} of {required} shown)", shown));
        }
    }

    fn write_process_list_section(&self, w: &mut ReportWriter<File>)
    {
        w.blank();
        w.line(format_args!("Process list"));

        if self.report_privacy {
            w.line(format_args!("Disabled by report privacy settings"));
            return;
        }

        w.line(format_args!("Process Id File"));
        let any = platform::for_each_process(&mut |pid, path| {
            w.line(format_args!("{pid:<10} {path}"));
        });
        if !any {
            w.line(format_args!("Unable to read process list"));
        }
    }
}

impl Default for ExceptionHandler
{
    fn default() -> Self
    {
        Self::new()
    }
}

impl Drop for ExceptionHandler
{
    fn drop(&mut self)
    {
        if self.enabled {
            let _ = self.enable(false);
        }
    }
}

// ---------------------------------------------------------------------------
// Section helpers that need no handler state
// ---------------------------------------------------------------------------

fn write_system_info_section(w: &mut ReportWriter<File>)
{
    w.blank();
    w.line(format_args!("System Info"));

    let mut os = FixedString::<128>::new();
    platform::os_version(&mut os);
    w.line(format_args!("OS version: {os}"));
    w.line(format_args!(
        "Debugger present: {}",
        if platform::debugger_present() { "yes" } else { "no" }
    ));
    w.line(format_args!("Processor count: {}", platform::processor_count()));

    let memory = platform::physical_memory_bytes();
    if memory > 0 {
        w.line(format_args!("Physical memory: {} MiB", memory / (1024 * 1024)));
    } else {
        w.line(format_args!("Physical memory: (unknown)"));
    }
}

fn write_display_adapter_section(w: &mut ReportWriter<File>)
{
    w.blank();
    w.line(format_args!("Display adapter list"));
    // No adapter enumeration API on the supported platforms.
    w.line(format_args!("Unable to read display adapter list"));
}

fn write_module_list_section(w: &mut ReportWriter<File>, symbols: &mut SymbolLookup)
{
    w.blank();
    w.line(format_args!("Module list"));

    let modules: &[ModuleInfo] = symbols.modules();
    if modules.is_empty() {
        w.line(format_args!("<Unable to read module list>"));
        return;
    }

    w.line(format_args!(
        "{:<18} {:<18} {:<24} Path",
        "Base", "Size", "Name"
    ));
    for m in modules {
        w.line(format_args!(
            "{} 0x{:016x} {:<24} {}",
            m.base,
            m.size,
            m.name.as_str(),
            m.path
        ));
    }
    if symbols.modules_truncated() {
        w.line(format_args!("(module list truncated)"));
    }
}

/// Emit one resolved backtrace, or the placeholder when it is empty.
fn write_backtrace_lines(w: &mut ReportWriter<File>, symbols: &mut SymbolLookup, frames: &[Address], truncated: bool)
{
    if frames.is_empty() {
        w.line(format_args!("<Unable to read backtrace>"));
        return;
    }

    for (i, frame) in frames.iter().enumerate() {
        let info = symbols.lookup_symbol(*frame);
        let module_name = match info.module_index.and_then(|idx| symbols.modules().get(idx)) {
            Some(m) => m.name,
            None => FixedString::from_str_truncated("(unknown)"),
        };

        if info.has_function() {
            w.line(format_args!(
                "{i:<2} {:<24} {} {}+{}",
                module_name.as_str(),
                frame,
                info.function,
                info.function_offset.unwrap_or(0)
            ));
        } else {
            w.line(format_args!("{i:<2} {:<24} {} (unknown function)", module_name.as_str(), frame));
        }
    }

    if truncated {
        w.line(format_args!("(backtrace truncated)"));
    }
}

/// Map the platform fault identification to a human-readable description.
///
/// Known codes come from a fixed string table; everything else falls back
/// to the raw numeric form so the line is never empty.
fn build_description(info: &mut ExceptionInfo)
{
    let out = &mut info.description;
    out.clear();

    match info.detail {
        FaultDetail::Signal { signo, code } => {
            let name = match signo {
                libc::SIGSEGV => "SIGSEGV",
                libc::SIGBUS => "SIGBUS",
                libc::SIGFPE => "SIGFPE",
                libc::SIGILL => "SIGILL",
                libc::SIGTRAP => "SIGTRAP",
                libc::SIGABRT => "SIGABRT",
                _ => "",
            };

            let explanation = match (signo, code) {
                (libc::SIGSEGV, 1) => "address not mapped to object",
                (libc::SIGSEGV, 2) => "invalid permissions for mapped object",
                (libc::SIGBUS, 1) => "invalid address alignment",
                (libc::SIGBUS, 2) => "nonexistent physical address",
                (libc::SIGFPE, 1) => "integer divide by zero",
                (libc::SIGFPE, 2) => "integer overflow",
                (libc::SIGFPE, 3) => "floating-point divide by zero",
                (libc::SIGILL, 1) => "illegal opcode",
                (libc::SIGILL, 2) => "illegal operand",
                _ => "",
            };

            if name.is_empty() {
                let _ = write!(out, "Unknown signal {signo} (code {code}) at instruction {}", info.instruction_address);
            } else if explanation.is_empty() {
                let _ = write!(out, "{name} (code {code}) accessing address {}", info.memory_address);
            } else {
                let _ = write!(out, "{name}: {explanation}, accessing address {}", info.memory_address);
            }
        }
        FaultDetail::Mach {
            exception,
            codes,
            code_count,
        } => {
            let name = match exception {
                1 => "EXC_BAD_ACCESS",
                2 => "EXC_BAD_INSTRUCTION",
                3 => "EXC_ARITHMETIC",
                4 => "EXC_EMULATION",
                5 => "EXC_SOFTWARE",
                6 => "EXC_BREAKPOINT",
                7 => "EXC_SYSCALL",
                8 => "EXC_MACH_SYSCALL",
                9 => "EXC_RPC_ALERT",
                10 => "EXC_CRASH",
                _ => "EXC_<unknown>",
            };

            let _ = write!(out, "Mach exception {name} ({exception})");
            if code_count > 0 {
                let _ = write!(out, ", code 0x{:x}", codes[0]);
            }
            if code_count > 1 {
                let _ = write!(out, ", subcode 0x{:x}", codes[1]);
            }
        }
        FaultDetail::Simulated => {
            let _ = write!(out, "Simulated fault at instruction {}", info.instruction_address);
        }
        FaultDetail::Unknown => {
            let _ = write!(out, "Unknown fault at instruction {}", info.instruction_address);
        }
    }
}

/// Per-user crash dump directory, created on demand.
///
/// `$XDG_DATA_HOME` (or `~/.local/share`) on Linux,
/// `~/Library/Logs/DiagnosticReports` on macOS, the working directory as a
/// last resort. Configuration-time only; allocates freely.
pub fn crash_dump_directory(organization: Option<&str>, application: Option<&str>) -> PathBuf
{
    #[cfg(target_os = "macos")]
    let mut dir = std::env::var_os("HOME")
        .map(PathBuf::from)
        .map(|home| home.join("Library/Logs/DiagnosticReports"))
        .unwrap_or_else(|| PathBuf::from("."));

    #[cfg(not(target_os = "macos"))]
    let mut dir = std::env::var_os("XDG_DATA_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."));

    if let Some(org) = organization {
        dir.push(org);
    }
    if let Some(app) = application {
        dir.push(app);
    }

    if let Err(err) = std::fs::create_dir_all(&dir) {
        warn!("could not create crash dump directory {}: {err}", dir.display());
    }
    dir
}

/// Open the report file through the raw platform call so path conversion
/// does not allocate inside the handling window.
#[cfg(unix)]
fn open_report_file(path: &str) -> Option<File>
{
    use std::os::unix::io::FromRawFd;

    let mut buf = [0u8; 520];
    if path.len() + 1 > buf.len() {
        return None;
    }
    buf[..path.len()].copy_from_slice(path.as_bytes());
    buf[path.len()] = 0;

    let fd = unsafe {
        libc::open(
            buf.as_ptr() as *const libc::c_char,
            libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC | libc::O_CLOEXEC,
            0o644 as libc::c_uint,
        )
    };
    if fd < 0 {
        return None;
    }
    Some(unsafe { File::from_raw_fd(fd) })
}

#[cfg(not(unix))]
fn open_report_file(path: &str) -> Option<File>
{
    File::create(path).ok()
}
