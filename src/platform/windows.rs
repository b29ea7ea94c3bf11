//! Windows privilege and wintun checks

use super::PlatformError;
use std::io::BufRead;
use tracing::error;
use windows::Win32::System::LibraryLoader::{FreeLibrary, LoadLibraryW};
use windows::Win32::UI::Shell::IsUserAnAdmin;
use windows::core::w;

pub fn check_permissions() -> Result<(), PlatformError> {
    if unsafe { IsUserAnAdmin().as_bool() } {
        Ok(())
    } else {
        Err(PlatformError::InsufficientPrivileges("Administrator"))
    }
}

/// The wireguard driver needs wintun.dll next to the binary or in the
/// system search path
pub fn check_wireguard_driver() -> Result<(), PlatformError> {
    let module = unsafe { LoadLibraryW(w!("wintun.dll")) }
        .map_err(|e| PlatformError::WintunUnavailable(e.to_string()))?;
    unsafe {
        let _ = FreeLibrary(module);
    }
    Ok(())
}

pub fn wait_for_keypress() {
    error!("press enter to exit");
    let mut line = String::new();
    let _ = std::io::stdin().lock().read_line(&mut line);
}
