//! macOS and BSD privilege checks

use super::PlatformError;

pub fn check_permissions() -> Result<(), PlatformError> {
    if nix::unistd::geteuid().is_root() {
        Ok(())
    } else {
        Err(PlatformError::InsufficientPrivileges("root"))
    }
}
