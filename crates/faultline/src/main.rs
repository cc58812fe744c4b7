use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use faultline_core::handler::{ExceptionHandler, FaultResponse};
use faultline_core::provoke::{provoke, FaultKind};
use faultline_core::symbols::SymbolLookup;
use faultline_core::types::Address;
use faultline_core::FaultlineResult;
use faultline_utils::{info, init_logging};

/// In-process crash capture, symbolication, and crash-report generation.
#[derive(Parser, Debug)]
#[command(name = "faultline")]
#[command(version)]
#[command(about = "In-process crash capture and crash-report generation", long_about = None)]
struct Cli
{
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands
{
    /// Arm the handler, then deliberately raise a fault to produce a report
    Provoke
    {
        /// Which fault class to raise
        #[arg(value_enum)]
        kind: FaultKindArg,
        /// Report path template (%s becomes a date-time stamp)
        #[arg(long, default_value = "faultline-report %s.txt")]
        report: String,
        /// Minidump path template; omit to skip the dump
        #[arg(long)]
        minidump: Option<String>,
        /// Include the process list in the report
        #[arg(long, default_value_t = false)]
        no_privacy: bool,
    },
    /// Run a simulated (software-injected) fault through the full pipeline
    Simulate
    {
        /// Report path template (%s becomes a date-time stamp)
        #[arg(long, default_value = "faultline-report %s.txt")]
        report: String,
        /// Minidump path template; omit to skip the dump
        #[arg(long)]
        minidump: Option<String>,
    },
    /// Print the resolved callstacks of every thread in this process
    Threads,
    /// List the loaded modules of this process
    Modules,
}

/// CLI-facing fault classes.
#[derive(ValueEnum, Clone, Copy, Debug)]
enum FaultKindArg
{
    /// Null-pointer write
    AccessViolation,
    /// Integer division by zero
    DivideByZero,
    /// Undefined opcode
    IllegalInstruction,
    /// Unbounded recursion
    StackOverflow,
    /// abort()
    Abort,
}

impl From<FaultKindArg> for FaultKind
{
    fn from(kind: FaultKindArg) -> Self
    {
        match kind {
            FaultKindArg::AccessViolation => FaultKind::AccessViolation,
            FaultKindArg::DivideByZero => FaultKind::DivideByZero,
            FaultKindArg::IllegalInstruction => FaultKind::IllegalInstruction,
            FaultKindArg::StackOverflow => FaultKind::StackOverflow,
            FaultKindArg::Abort => FaultKind::Abort,
        }
    }
}

fn main()
{
    // Initialize logging (reads from RUST_LOG env var)
    if let Err(e) = init_logging() {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    if let Err(e) = run_command(Cli::parse()) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run_command(cli: Cli) -> FaultlineResult<()>
{
    match cli.command {
        Commands::Provoke {
            kind,
            report,
            minidump,
            no_privacy,
        } => {
            let mut handler = ExceptionHandler::new();
            handler.set_exception_paths(Some(&report), minidump.as_deref());
            handler.set_report_privacy(!no_privacy);
            handler.set_fault_response(FaultResponse::Handle);
            handler.set_terminate_code(70);
            handler.set_app_description("faultline CLI fault provocation");
            handler.enable(true)?;

            info!("handler armed, provoking {:?}", kind);
            println!("Provoking {:?}; the report lands at: {}", kind, report);
            provoke(kind.into());

            // A terminating response never gets here.
            unreachable!("provoked fault did not terminate the process");
        }
        Commands::Simulate { report, minidump } => {
            let mut handler = ExceptionHandler::new();
            handler.set_exception_paths(Some(&report), minidump.as_deref());
            handler.set_fault_response(FaultResponse::Continue);
            handler.set_fault_listener(
                Some(Box::new(|_, _, _, path: Option<&str>| {
                    if let Some(path) = path {
                        println!("Report written: {}", path);
                    } else {
                        println!("No report produced");
                    }
                })),
                0,
            );
            handler.enable(true)?;

            let here = Address::new(run_command as usize as u64);
            let handled = handler.simulate_fault(here, faultline_core::types::CpuContext::Unavailable);
            println!("Simulated fault handled: {}", handled);

            handler.enable(false)?;
            Ok(())
        }
        Commands::Threads => {
            let mut lookup = SymbolLookup::new();
            lookup.initialize();

            let mut out = String::new();
            lookup.report_thread_callstacks(&mut out, 0);
            print!("{out}");
            Ok(())
        }
        Commands::Modules => {
            let mut lookup = SymbolLookup::new();
            lookup.initialize();
            lookup.refresh_module_list();

            println!("{:<18} {:<18} {:<24} Path", "Base", "Size", "Name");
            for m in lookup.modules() {
                println!("{} 0x{:016x} {:<24} {}", m.base, m.size, m.name.as_str(), m.path);
            }
            if lookup.modules_truncated() {
                println!("(module list truncated)");
            }
            Ok(())
        }
    }
}
