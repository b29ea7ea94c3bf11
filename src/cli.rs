//! Command line interface

use crate::credentials::PasswordInputs;
use crate::options::Options;
use clap::Parser;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("profile-index cannot be negative")]
    NegativeProfileIndex(i64),
    #[error("profile-index {0} is out of range")]
    ProfileIndexRange(i64),
}

#[derive(Parser, Debug)]
#[command(name = "f5vpn")]
#[command(about = "Command-line F5 VPN client")]
#[command(disable_version_flag = true)]
pub struct Cli {
    /// VPN server address
    #[arg(long)]
    pub server: Option<String>,

    /// Username for VPN authentication
    #[arg(long)]
    pub username: Option<String>,

    /// Password for VPN authentication
    #[arg(long)]
    pub password: Option<String>,

    /// Path to file containing password
    #[arg(long)]
    pub password_file: Option<PathBuf>,

    /// Delete password file immediately after reading
    #[arg(long)]
    pub remove_password_file: bool,

    /// Reuse a session ID
    #[arg(long)]
    pub session: Option<String>,

    /// Path to a custom CA certificate
    #[arg(long)]
    pub ca_cert: Option<PathBuf>,

    /// Path to a user TLS certificate
    #[arg(long)]
    pub cert: Option<PathBuf>,

    /// Path to a user TLS key
    #[arg(long)]
    pub key: Option<PathBuf>,

    /// Path to config file (default: ~/.f5vpn/config.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Close HTTPS VPN session on exit
    #[arg(long)]
    pub close_session: bool,

    /// Show debug logs
    #[arg(long)]
    pub debug: bool,

    /// Select a server from available F5 servers
    #[arg(long)]
    pub select: bool,

    /// If multiple VPN profiles are found chose profile n
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    pub profile_index: i64,

    /// Show version and exit cleanly
    #[arg(long)]
    pub version: bool,

    /// Run in the background (requires a password up front)
    #[arg(long)]
    pub daemon: bool,

    /// Path to log file for daemon mode (default: /tmp/f5vpn/<username>.log)
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// f5-vpn:// link, as passed by the browser
    pub url: Option<String>,
}

/// A validated command line
#[derive(Debug)]
pub struct Invocation {
    pub options: Options,
    pub password: PasswordInputs,
    pub log_file: Option<PathBuf>,
    pub url: Option<String>,
}

impl Cli {
    pub fn into_invocation(self) -> Result<Invocation, CliError> {
        if self.profile_index < 0 {
            return Err(CliError::NegativeProfileIndex(self.profile_index));
        }
        let profile_index = u32::try_from(self.profile_index)
            .map_err(|_| CliError::ProfileIndexRange(self.profile_index))?;

        let options = Options {
            server: self.server.unwrap_or_default(),
            username: self.username.unwrap_or_default(),
            session_id: self.session.unwrap_or_default(),
            ca_cert: self.ca_cert,
            cert: self.cert,
            key: self.key,
            config_path: self.config,
            close_session: self.close_session,
            debug: self.debug,
            select: self.select,
            daemon: self.daemon,
            profile_index,
            ..Options::default()
        };

        Ok(Invocation {
            options,
            password: PasswordInputs {
                flag: self.password,
                file: self.password_file,
                remove_file: self.remove_password_file,
            },
            log_file: self.log_file,
            url: self.url,
        })
    }
}

/// Build identity printed by `--version`
pub fn build_info() -> String {
    format!(
        "f5vpn {} for {}/{}",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}
