//! Build script for faultline-core
//!
//! Checks system requirements before compilation:
//! - Minimum Rust version (Edition 2021 = Rust 1.56.0+)
//! - Platform support (the trap has native implementations for Linux and
//!   macOS only)

fn main()
{
    // Check minimum Rust version
    // Edition 2021 requires Rust 1.56.0
    if let Ok(rustc_version) = rustc_version::version() {
        let min_rust_version = rustc_version::Version::parse("1.56.0").unwrap();

        if rustc_version < min_rust_version {
            panic!(
                "faultline-core requires Rust {} or newer (Edition 2021), found {}",
                min_rust_version, rustc_version
            );
        }
    } else {
        // If we can't get version (e.g., in some build environments), just warn
        println!("cargo:warning=could not verify Rust version");
    }

    // The exception trap only has native backends for Linux and macOS. Other
    // targets still build: every collection operation degrades to empty
    // results, and enabling the handler reports an unsupported platform.
    let target_os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    if target_os != "linux" && target_os != "macos" {
        println!("cargo:warning=faultline-core: no native fault trap for target OS `{target_os}`");
    }
}
