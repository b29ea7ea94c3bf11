//! Platform-specific implementations
//!
//! Privilege checks, virtual adapter driver availability and the per-OS
//! defaults the configuration resolver applies.

#[cfg(any(
    target_os = "macos",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "dragonfly"
))]
mod bsd;

#[cfg(target_os = "linux")]
mod linux;

#[cfg(target_os = "windows")]
mod windows;

use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("f5vpn needs to be run as {0}")]
    InsufficientPrivileges(&'static str),
    #[error("failed to load the wintun.dll driver ({0}), download it from https://www.wintun.net")]
    WintunUnavailable(String),
}

/// DNS listener used when the settings document doesn't set one
pub const DEFAULT_LISTEN_DNS: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 0xf5);

/// BSD systems can't listen on 127.0.0.1+N without extra loopback aliases
pub const BSD_LISTEN_DNS: Ipv4Addr = Ipv4Addr::LOCALHOST;

/// Operating system family, as far as configuration defaults care
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetOs {
    Linux,
    Bsd,
    Windows,
    Other,
}

impl TargetOs {
    /// Family of the running binary
    pub fn current() -> Self {
        if cfg!(target_os = "linux") {
            TargetOs::Linux
        } else if cfg!(any(
            target_os = "macos",
            target_os = "freebsd",
            target_os = "openbsd",
            target_os = "netbsd",
            target_os = "dragonfly"
        )) {
            TargetOs::Bsd
        } else if cfg!(target_os = "windows") {
            TargetOs::Windows
        } else {
            TargetOs::Other
        }
    }

    pub fn default_listen_dns(self) -> IpAddr {
        match self {
            TargetOs::Bsd => IpAddr::V4(BSD_LISTEN_DNS),
            _ => IpAddr::V4(DEFAULT_LISTEN_DNS),
        }
    }

    /// Windows has no pppd and no way to detach from the console
    pub fn is_windows(self) -> bool {
        self == TargetOs::Windows
    }
}

/// Fail early when the process can't create tunnel interfaces
pub fn check_permissions() -> Result<(), PlatformError> {
    #[cfg(target_os = "linux")]
    {
        linux::check_permissions()
    }

    #[cfg(any(
        target_os = "macos",
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "netbsd",
        target_os = "dragonfly"
    ))]
    {
        bsd::check_permissions()
    }

    #[cfg(target_os = "windows")]
    {
        windows::check_permissions()
    }

    #[cfg(not(any(
        target_os = "linux",
        target_os = "macos",
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "netbsd",
        target_os = "dragonfly",
        target_os = "windows"
    )))]
    {
        #[cfg(unix)]
        if !nix::unistd::geteuid().is_root() {
            return Err(PlatformError::InsufficientPrivileges("root"));
        }
        Ok(())
    }
}

/// Check that the wireguard driver's virtual adapter can be created
pub fn check_wireguard_driver() -> Result<(), PlatformError> {
    #[cfg(target_os = "windows")]
    {
        windows::check_wireguard_driver()
    }

    #[cfg(not(target_os = "windows"))]
    {
        Ok(())
    }
}

/// Escalated privileges on Windows open a new console which closes as soon
/// as the process exits, so fatal errors wait for the user there.
pub fn pause_on_fatal() {
    #[cfg(target_os = "windows")]
    windows::wait_for_keypress();
}
