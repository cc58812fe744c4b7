//! Tests for error construction and display

use faultline_core::error::{FaultlineError, FaultlineResult};

#[test]
fn test_already_installed_display()
{
    let err = FaultlineError::AlreadyInstalled;
    assert_eq!(
        err.to_string(),
        "Another exception handler is already installed in this process"
    );
}

#[test]
fn test_trap_install_failed_display()
{
    let err = FaultlineError::TrapInstallFailed("sigaction failed for signal 11".to_string());
    assert_eq!(err.to_string(), "Failed to install fault trap: sigaction failed for signal 11");
}

#[test]
fn test_suspend_resume_display()
{
    let suspend = FaultlineError::SuspendFailed("thread_suspend failed: 5".to_string());
    assert!(suspend.to_string().contains("suspend"));

    let resume = FaultlineError::ResumeFailed("thread_resume failed: 5".to_string());
    assert!(resume.to_string().contains("resume"));
}

#[test]
fn test_io_error_conversion()
{
    fn open_missing() -> FaultlineResult<std::fs::File>
    {
        Ok(std::fs::File::open("/definitely/not/a/real/path")?)
    }

    let err = open_missing().expect_err("open must fail");
    assert!(matches!(err, FaultlineError::Io(_)));
    assert!(err.to_string().starts_with("IO error:"));
}

#[test]
fn test_invalid_argument_display()
{
    let err = FaultlineError::InvalidArgument("capacity must be nonzero".to_string());
    assert_eq!(err.to_string(), "Invalid argument: capacity must be nonzero");
}
