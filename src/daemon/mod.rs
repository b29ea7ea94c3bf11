//! Background daemon lifecycle
//!
//! A daemonizing invocation re-executes the same binary with the same
//! arguments as a session leader, hands it the password over its stdin,
//! passes it the locked PID marker and waits until the child confirms it
//! owns the marker before exiting.
//!
//! # Roles
//!
//! - `Foreground`: a normal invocation, runs the engine itself
//! - `ParentBeforeFork`: a foreground invocation while it launches the daemon
//! - `DaemonChild`: the re-executed process, detected by `__F5VPN_DAEMONIZED=1`

pub mod handoff;
pub mod pid;

pub use handoff::AckError;
pub use pid::{PidError, PidMarker};

use std::env;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Set on the spawned daemon child only
pub const DAEMON_MARKER_VAR: &str = "__F5VPN_DAEMONIZED";
pub const DAEMON_MARKER: &str = "1";

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("daemon mode is not supported on Windows")]
    Unsupported,
    #[error(
        "password is required for daemon mode; use --password, --password-file, or F5VPN_PASSWORD environment variable"
    )]
    PasswordRequired,
    #[error("cannot use log directory {path:?}: {source}")]
    LogDir { path: PathBuf, source: io::Error },
    #[error("failed to open log file {path:?}: {source}")]
    LogFile { path: PathBuf, source: io::Error },
    #[error("failed to start daemon process: {0}")]
    Spawn(#[source] io::Error),
    #[error("failed to hand the password to the daemon process: {0}")]
    Handoff(#[source] io::Error),
    #[error("{source}, see {log:?}")]
    NotConfirmed { log: PathBuf, source: AckError },
    #[error("failed to confirm startup to the parent process: {0}")]
    Confirm(#[source] io::Error),
    #[error("failed to redirect standard streams: {0}")]
    Redirect(#[source] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Foreground,
    ParentBeforeFork,
    DaemonChild,
}

impl Role {
    /// Detect the role of this process. The daemon child removes the marker
    /// from its environment so that its own subprocesses start as
    /// `Foreground`.
    ///
    /// Must run before any other thread is started.
    pub fn detect_and_clear() -> Self {
        let role = Self::detect(|key| env::var(key));
        if role == Role::DaemonChild {
            // SAFETY: called first thing in main, the process is still single-threaded
            unsafe { env::remove_var(DAEMON_MARKER_VAR) };
        }
        role
    }

    pub fn detect<F>(get_var: F) -> Self
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        match get_var(DAEMON_MARKER_VAR) {
            Ok(value) if value == DAEMON_MARKER => Role::DaemonChild,
            _ => Role::Foreground,
        }
    }
}

/// Directory holding PID markers and daemon logs
pub fn runtime_dir() -> PathBuf {
    #[cfg(unix)]
    {
        PathBuf::from("/tmp").join("f5vpn")
    }

    #[cfg(not(unix))]
    {
        env::temp_dir().join("f5vpn")
    }
}

pub fn pid_path(user: &str) -> PathBuf {
    runtime_dir().join(format!("{}.pid", user))
}

pub fn default_log_path(user: &str) -> PathBuf {
    runtime_dir().join(format!("{}.log", user))
}

/// Open the daemon log for appending.
///
/// The shared runtime directory gets the same ownership checks as the PID
/// marker; an explicit `--log-file` elsewhere is only created.
fn open_log(path: &Path) -> Result<File, DaemonError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        let prepared = if dir == runtime_dir() {
            pid::create_trusted_dir(dir)
        } else {
            fs::create_dir_all(dir)
        };
        prepared.map_err(|source| DaemonError::LogDir {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use nix::fcntl::OFlag;
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o644).custom_flags(OFlag::O_NOFOLLOW.bits());
    }
    options.open(path).map_err(|source| DaemonError::LogFile {
        path: path.to_path_buf(),
        source,
    })
}

/// Drives the foreground/daemon transitions of one process
#[derive(Debug)]
pub struct Supervisor {
    role: Role,
}

impl Supervisor {
    pub fn new(role: Role) -> Self {
        Self { role }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Launch the daemon child and transfer `marker` to it.
    ///
    /// Returns the child's pid once it confirmed startup; the caller is
    /// expected to exit successfully right after. On failure the marker is
    /// dropped, which removes it.
    pub fn daemonize(
        &mut self,
        password: &str,
        log_path: &Path,
        marker: PidMarker,
    ) -> Result<u32, DaemonError> {
        if cfg!(windows) {
            return Err(DaemonError::Unsupported);
        }
        if password.is_empty() {
            return Err(DaemonError::PasswordRequired);
        }

        self.role = Role::ParentBeforeFork;
        debug!("Daemonizing, log file {:?}", log_path);

        let log = open_log(log_path)?;
        let child_pid = spawn_child(password, log, log_path, &marker)?;

        marker.hand_off();
        Ok(child_pid)
    }

    /// Daemon child side: take over the marker, confirm startup to the
    /// parent and detach the standard streams.
    ///
    /// Failing to take over the marker only warns, the parent is still told
    /// to exit.
    pub fn attach(&self, pid_path: &Path, log_path: &Path) -> Result<Option<PidMarker>, DaemonError> {
        let marker = adopt_marker(pid_path);

        confirm_startup()?;

        let log = open_log(log_path)?;
        redirect_stdio(&log).map_err(DaemonError::Redirect)?;
        info!("Daemon started (PID {}), logging to {:?}", std::process::id(), log_path);

        Ok(marker)
    }
}

#[cfg(unix)]
fn adopt_marker(pid_path: &Path) -> Option<PidMarker> {
    let mut marker = match PidMarker::adopt(pid_path) {
        Ok(marker) => marker,
        Err(e) => {
            warn!("Failed to take over the PID file: {}", e);
            return None;
        }
    };
    if let Err(e) = marker.rewrite() {
        warn!("Failed to rewrite PID file: {}", e);
    }
    Some(marker)
}

#[cfg(not(unix))]
fn adopt_marker(_pid_path: &Path) -> Option<PidMarker> {
    None
}

fn confirm_startup() -> Result<(), DaemonError> {
    let mut stdout = io::stdout().lock();
    handoff::send_ack(&mut stdout, std::process::id()).map_err(DaemonError::Confirm)
}

/// Re-execute this binary with the same arguments as the daemon child
#[cfg(unix)]
fn spawn_child(
    password: &str,
    log: File,
    log_path: &Path,
    marker: &PidMarker,
) -> Result<u32, DaemonError> {
    let exe = env::current_exe().map_err(DaemonError::Spawn)?;
    let mut cmd = std::process::Command::new(exe);
    cmd.args(env::args_os().skip(1))
        .env(DAEMON_MARKER_VAR, DAEMON_MARKER);
    launch(cmd, password, log, log_path, marker)
}

/// Start `cmd` detached, hand it the password and the marker, and wait for
/// its acknowledgement
#[cfg(unix)]
fn launch(
    mut cmd: std::process::Command,
    password: &str,
    log: File,
    log_path: &Path,
    marker: &PidMarker,
) -> Result<u32, DaemonError> {
    use std::os::unix::process::CommandExt;
    use std::process::Stdio;

    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::from(log));

    // SAFETY: setsid is async-signal-safe
    unsafe {
        cmd.pre_exec(|| {
            nix::unistd::setsid()?;
            Ok(())
        });
    }
    marker.pass_to(&mut cmd);

    let mut child = cmd.spawn().map_err(DaemonError::Spawn)?;
    // closes our handle to the log file
    drop(cmd);

    let confirmed = match child.stdin.take() {
        Some(stdin) => handoff::send_credential(stdin, password).map_err(DaemonError::Handoff),
        None => Err(DaemonError::Handoff(io::ErrorKind::BrokenPipe.into())),
    }
    .and_then(|()| {
        let stdout = child
            .stdout
            .take()
            .ok_or(AckError::Closed)
            .map_err(|source| DaemonError::NotConfirmed {
                log: log_path.to_path_buf(),
                source,
            })?;
        handoff::await_ack(stdout).map_err(|source| DaemonError::NotConfirmed {
            log: log_path.to_path_buf(),
            source,
        })
    });

    match confirmed {
        Ok(reported) => {
            if reported != child.id() {
                warn!("Daemon reported PID {}, launched {}", reported, child.id());
            }
            Ok(child.id())
        }
        Err(e) => {
            let _ = child.kill();
            let _ = child.wait();
            Err(e)
        }
    }
}

#[cfg(not(unix))]
fn spawn_child(
    _password: &str,
    _log: File,
    _log_path: &Path,
    _marker: &PidMarker,
) -> Result<u32, DaemonError> {
    Err(DaemonError::Unsupported)
}

/// Point stdin/stdout at the null device and stderr at the log file
#[cfg(unix)]
fn redirect_stdio(log: &File) -> io::Result<()> {
    use nix::unistd::dup2;
    use std::io::Write;
    use std::os::unix::io::AsRawFd;

    io::stdout().flush()?;
    let null = OpenOptions::new().read(true).write(true).open("/dev/null")?;

    dup2(null.as_raw_fd(), io::stdin().as_raw_fd())?;
    dup2(null.as_raw_fd(), io::stdout().as_raw_fd())?;
    dup2(log.as_raw_fd(), io::stderr().as_raw_fd())?;
    Ok(())
}

#[cfg(not(unix))]
fn redirect_stdio(_log: &File) -> io::Result<()> {
    Ok(())
}
