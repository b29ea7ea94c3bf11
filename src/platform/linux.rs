//! Linux privilege checks

use super::PlatformError;
use std::fs;

/// Bit of CAP_NET_ADMIN in the capability sets
const CAP_NET_ADMIN: u32 = 12;

/// Root, or a binary granted CAP_NET_ADMIN (e.g. via setcap)
pub fn check_permissions() -> Result<(), PlatformError> {
    if nix::unistd::geteuid().is_root() {
        return Ok(());
    }

    let has_net_admin = fs::read_to_string("/proc/self/status")
        .ok()
        .and_then(|status| effective_capabilities(&status))
        .is_some_and(|caps| caps & (1 << CAP_NET_ADMIN) != 0);

    if has_net_admin {
        Ok(())
    } else {
        Err(PlatformError::InsufficientPrivileges("root or with CAP_NET_ADMIN"))
    }
}

fn effective_capabilities(status: &str) -> Option<u64> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("CapEff:"))
        .and_then(|value| u64::from_str_radix(value.trim(), 16).ok())
}
