//! Startup sequence
//!
//! command line → deep link → configuration → password → PID marker →
//! optional daemonization → engine
//!
//! Everything before the engine runs on the main thread; the async runtime
//! is only built once any fork has happened.

use crate::cli::{CliError, Invocation};
use crate::config::{self, ConfigError};
use crate::credentials::{self, CredentialError};
use crate::daemon::{self, DaemonError, PidError, PidMarker, Role, Supervisor};
use crate::engine::{Engine, EngineError};
use crate::identity::{IdentityError, InvocationContext};
use crate::platform::{self, PlatformError};
use std::io;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error(transparent)]
    Cli(#[from] CliError),
    #[error(transparent)]
    Platform(#[from] PlatformError),
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error(transparent)]
    Pid(#[from] PidError),
    #[error(transparent)]
    Daemon(#[from] DaemonError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("failed to start the async runtime: {0}")]
    Runtime(#[source] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The engine ran in this process and returned
    Finished,
    /// A daemon child took over; this process should exit successfully
    HandedOff { child_pid: u32 },
}

pub fn run<E: Engine>(
    invocation: Invocation,
    role: Role,
    engine: &E,
) -> Result<Outcome, BootstrapError> {
    let Invocation {
        mut options,
        password,
        log_file,
        url,
    } = invocation;

    platform::check_permissions()?;

    if let Some(link) = url.as_deref() {
        engine.handle_url(&mut options, link)?;
    }

    let ctx = InvocationContext::from_system()?;
    options.config = config::resolve(&ctx, options.config_path.as_deref(), options.debug)?;
    options.daemon |= options.config.daemon;

    let credential = if role == Role::DaemonChild {
        let mut stdin = io::stdin().lock();
        credentials::resolve(&password, Some(&mut stdin))?
    } else {
        credentials::resolve(&password, None)?
    };
    options.password = credential.map(|c| c.password).unwrap_or_default();

    let pid_path = daemon::pid_path(&ctx.process_user);
    let log_path = log_file.unwrap_or_else(|| daemon::default_log_path(&ctx.process_user));
    let mut supervisor = Supervisor::new(role);

    let _marker = match supervisor.role() {
        Role::DaemonChild => supervisor.attach(&pid_path, &log_path)?,
        _ => {
            let marker = PidMarker::acquire(&pid_path)?;
            if options.daemon {
                let child_pid = supervisor.daemonize(&options.password, &log_path, marker)?;
                info!("Daemon running with PID {}, logs at {:?}", child_pid, log_path);
                return Ok(Outcome::HandedOff { child_pid });
            }
            Some(marker)
        }
    };

    debug!("Starting engine with {:?}", options);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(BootstrapError::Runtime)?;
    runtime.block_on(engine.connect(&options))?;

    Ok(Outcome::Finished)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;

    #[cfg(unix)]
    struct Unreachable;

    #[cfg(unix)]
    impl Engine for Unreachable {
        fn handle_url(&self, _: &mut crate::options::Options, _: &str) -> Result<(), EngineError> {
            panic!("deep link handled before validation");
        }

        async fn connect(&self, _: &crate::options::Options) -> Result<(), EngineError> {
            panic!("engine started before validation");
        }
    }

    #[test]
    fn test_negative_profile_index_has_no_side_effects() {
        // validation happens while building the invocation, before run()
        let cli = Cli::try_parse_from(["f5vpn", "--profile-index", "-1", "f5-vpn://x"]).unwrap();
        let err: BootstrapError = cli.into_invocation().unwrap_err().into();
        assert_eq!(err.to_string(), "profile-index cannot be negative");
    }

    #[test]
    fn test_error_messages_pass_through() {
        let err: BootstrapError = DaemonError::PasswordRequired.into();
        assert!(err.to_string().starts_with("password is required for daemon mode"));

        let err: BootstrapError = ConfigError::PppdOnWindows.into();
        assert_eq!(err.to_string(), "pppd driver is not supported in Windows");
    }

    #[cfg(unix)]
    #[test]
    fn test_unprivileged_run_stops_at_permission_check() {
        if nix::unistd::geteuid().is_root() || platform::check_permissions().is_ok() {
            return;
        }
        let cli = Cli::try_parse_from(["f5vpn", "f5-vpn://x?server=vpn.example.com"]).unwrap();
        let err = run(cli.into_invocation().unwrap(), Role::Foreground, &Unreachable).unwrap_err();
        assert!(matches!(err, BootstrapError::Platform(_)));
    }
}
