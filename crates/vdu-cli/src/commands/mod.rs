pub mod harness;
#[cfg(any(target_os = "linux", target_os = "macos"))]
pub mod mount;
pub mod status;
