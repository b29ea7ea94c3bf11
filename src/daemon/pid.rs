//! Single-instance PID marker
//!
//! The marker file holds the decimal pid of the running instance and is
//! kept under an exclusive `flock` for the lifetime of that instance, so a
//! leftover file from a crashed process is recognized as stale. When
//! daemonizing, the locked descriptor is passed to the child at
//! [`MARKER_FD`] and the lock never drops in between.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process;
use thiserror::Error;
use tracing::{debug, warn};

#[cfg(unix)]
use std::os::unix::io::{AsRawFd, RawFd};

/// Descriptor number the daemon child finds the inherited marker at
#[cfg(unix)]
pub const MARKER_FD: RawFd = 3;

#[derive(Error, Debug)]
pub enum PidError {
    #[error("cannot use PID directory {path:?}: {source}")]
    RuntimeDir { path: PathBuf, source: io::Error },
    #[error("failed to open PID file {path:?}: {source}")]
    Open { path: PathBuf, source: io::Error },
    #[error("failed to lock PID file {path:?}: {source}")]
    Lock { path: PathBuf, source: io::Error },
    #[error("f5vpn is already running (PID {pid}), see {path:?}")]
    AlreadyRunning { pid: String, path: PathBuf },
    #[error("failed to write PID file {path:?}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("no PID file was handed over by the parent process: {0}")]
    NotInherited(String),
}

#[cfg(unix)]
type LockedFile = nix::fcntl::Flock<File>;

#[cfg(not(unix))]
type LockedFile = File;

#[cfg(unix)]
fn try_lock(file: File) -> Result<LockedFile, (File, io::Error)> {
    use nix::fcntl::{Flock, FlockArg};
    Flock::lock(file, FlockArg::LockExclusiveNonblock).map_err(|(file, errno)| (file, errno.into()))
}

// Without flock the marker stays purely advisory
#[cfg(not(unix))]
fn try_lock(file: File) -> Result<LockedFile, (File, io::Error)> {
    Ok(file)
}

/// Ownership of the PID marker for one logical instance
pub struct PidMarker {
    path: PathBuf,
    file: Option<LockedFile>,
    armed: bool,
}

impl PidMarker {
    /// Create or take over the marker at `path` and record this process in it
    pub fn acquire(path: &Path) -> Result<Self, PidError> {
        if let Some(dir) = path.parent() {
            create_trusted_dir(dir).map_err(|source| PidError::RuntimeDir {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let mut options = OpenOptions::new();
        options.read(true).write(true).create(true).truncate(false);
        #[cfg(unix)]
        {
            use nix::fcntl::OFlag;
            use std::os::unix::fs::OpenOptionsExt;
            // a planted symlink must not redirect the pid write
            options.mode(0o644).custom_flags(OFlag::O_NOFOLLOW.bits());
        }
        let file = options.open(path).map_err(|source| PidError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        let file = match try_lock(file) {
            Ok(file) => file,
            Err((mut file, e)) if e.kind() == io::ErrorKind::WouldBlock => {
                let mut pid = String::new();
                let _ = file.read_to_string(&mut pid);
                return Err(PidError::AlreadyRunning {
                    pid: pid.trim().to_string(),
                    path: path.to_path_buf(),
                });
            }
            Err((_, source)) => {
                return Err(PidError::Lock {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let mut marker = Self {
            path: path.to_path_buf(),
            file: Some(file),
            armed: true,
        };
        marker.rewrite()?;
        debug!("Wrote PID file {:?}", marker.path);
        Ok(marker)
    }

    /// Take over the locked marker passed down by the daemonizing parent
    #[cfg(unix)]
    pub fn adopt(path: &Path) -> Result<Self, PidError> {
        use nix::fcntl::{FcntlArg, FdFlag, fcntl};
        use std::os::unix::fs::MetadataExt;
        use std::os::unix::io::{FromRawFd, IntoRawFd};

        fcntl(MARKER_FD, FcntlArg::F_GETFD)
            .map_err(|e| PidError::NotInherited(format!("descriptor {}: {}", MARKER_FD, e)))?;

        // SAFETY: the descriptor is open and no other owner exists in this process
        let file = unsafe { File::from_raw_fd(MARKER_FD) };

        let same_file = match (file.metadata(), fs::metadata(path)) {
            (Ok(inherited), Ok(expected)) => {
                inherited.dev() == expected.dev() && inherited.ino() == expected.ino()
            }
            _ => false,
        };
        if !same_file {
            // not ours to close
            let _ = file.into_raw_fd();
            return Err(PidError::NotInherited(format!(
                "descriptor {} doesn't refer to {:?}",
                MARKER_FD, path
            )));
        }

        // Subprocesses of the engine must not keep the instance lock alive
        fcntl(MARKER_FD, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))
            .map_err(|e| PidError::NotInherited(e.to_string()))?;

        // Same open file description as the parent's lock, so this succeeds
        let file = try_lock(file).map_err(|(_, source)| PidError::Lock {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
            armed: true,
        })
    }

    /// Record the current process id
    pub fn rewrite(&mut self) -> Result<(), PidError> {
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };
        write_pid(file, process::id()).map_err(|source| PidError::Write {
            path: self.path.clone(),
            source,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Make the marker descriptor available to a spawned child at [`MARKER_FD`]
    #[cfg(unix)]
    pub fn pass_to(&self, cmd: &mut std::process::Command) {
        use nix::fcntl::{FcntlArg, FdFlag, fcntl};
        use nix::unistd::dup2;
        use std::os::unix::process::CommandExt;

        let Some(fd) = self.file.as_ref().map(|f| f.as_raw_fd()) else {
            return;
        };

        // SAFETY: only async-signal-safe calls between fork and exec
        unsafe {
            cmd.pre_exec(move || {
                if fd != MARKER_FD {
                    dup2(fd, MARKER_FD)?;
                }
                fcntl(MARKER_FD, FcntlArg::F_SETFD(FdFlag::empty()))?;
                Ok(())
            });
        }
    }

    /// The child has taken over: leave the file in place and keep the lock held
    pub fn hand_off(mut self) {
        self.armed = false;
        if let Some(file) = self.file.take() {
            // Unlocking would release the child's lock too, the descriptor
            // closes on exit instead.
            std::mem::forget(file);
        }
    }
}

impl Drop for PidMarker {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed PID file {:?}", self.path),
            Err(e) => warn!("Failed to remove PID file {:?}: {}", self.path, e),
        }
    }
}

/// Create `dir` if missing and make sure no other user can swap files in it.
///
/// The directory must belong to the effective user or root and must not be
/// writable by group or others.
#[cfg(unix)]
pub(crate) fn create_trusted_dir(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::{DirBuilderExt, MetadataExt};

    fs::DirBuilder::new().recursive(true).mode(0o755).create(dir)?;

    let meta = fs::symlink_metadata(dir)?;
    let untrusted = |reason: String| Err(io::Error::new(io::ErrorKind::PermissionDenied, reason));
    if !meta.is_dir() {
        return untrusted("not a directory".to_string());
    }
    let euid = nix::unistd::geteuid().as_raw();
    if meta.uid() != euid && meta.uid() != 0 {
        return untrusted(format!("owned by uid {}", meta.uid()));
    }
    if meta.mode() & 0o022 != 0 {
        return untrusted(format!("writable by other users (mode {:o})", meta.mode() & 0o7777));
    }
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn create_trusted_dir(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)
}

fn write_pid(file: &mut File, pid: u32) -> io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(pid.to_string().as_bytes())?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn marker_path(dir: &TempDir) -> PathBuf {
        dir.path().join("f5vpn").join("tester.pid")
    }

    #[test]
    fn test_acquire_writes_pid() {
        let dir = TempDir::new().unwrap();
        let path = marker_path(&dir);

        let marker = PidMarker::acquire(&path).unwrap();

        assert_eq!(marker.path(), path.as_path());
        assert_eq!(fs::read_to_string(&path).unwrap(), process::id().to_string());
    }

    #[test]
    fn test_drop_removes_file() {
        let dir = TempDir::new().unwrap();
        let path = marker_path(&dir);

        drop(PidMarker::acquire(&path).unwrap());

        assert!(!path.exists());
    }

    #[test]
    fn test_stale_marker_is_taken_over() {
        let dir = TempDir::new().unwrap();
        let path = marker_path(&dir);
        create_trusted_dir(path.parent().unwrap()).unwrap();
        fs::write(&path, "999999999").unwrap();

        let _marker = PidMarker::acquire(&path).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), process::id().to_string());
    }

    #[cfg(unix)]
    #[test]
    fn test_live_marker_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = marker_path(&dir);

        let _first = PidMarker::acquire(&path).unwrap();
        let err = PidMarker::acquire(&path).err().unwrap();

        match err {
            PidError::AlreadyRunning { pid, .. } => assert_eq!(pid, process::id().to_string()),
            other => panic!("unexpected error: {}", other),
        }
        // the rejected attempt must not disturb the owner's file
        assert_eq!(fs::read_to_string(&path).unwrap(), process::id().to_string());
    }

    #[test]
    fn test_hand_off_keeps_file() {
        let dir = TempDir::new().unwrap();
        let path = marker_path(&dir);

        PidMarker::acquire(&path).unwrap().hand_off();

        assert!(path.exists());
    }

    #[test]
    fn test_hand_off_keeps_lock() {
        let dir = TempDir::new().unwrap();
        let path = marker_path(&dir);

        PidMarker::acquire(&path).unwrap().hand_off();

        #[cfg(unix)]
        assert!(matches!(
            PidMarker::acquire(&path).err().unwrap(),
            PidError::AlreadyRunning { .. }
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_marker_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = marker_path(&dir);
        let victim = dir.path().join("victim");
        fs::write(&victim, "important data").unwrap();
        create_trusted_dir(path.parent().unwrap()).unwrap();
        std::os::unix::fs::symlink(&victim, &path).unwrap();

        let err = PidMarker::acquire(&path).err().unwrap();

        assert!(matches!(err, PidError::Open { .. }));
        assert_eq!(fs::read_to_string(&victim).unwrap(), "important data");
        // the failed attempt must not remove the planted link either
        assert!(fs::symlink_metadata(&path).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_shared_runtime_dir_is_rejected() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = marker_path(&dir);
        let runtime = path.parent().unwrap();
        fs::create_dir_all(runtime).unwrap();
        fs::set_permissions(runtime, fs::Permissions::from_mode(0o777)).unwrap();

        let err = PidMarker::acquire(&path).err().unwrap();

        match err {
            PidError::RuntimeDir { source, .. } => {
                assert_eq!(source.kind(), io::ErrorKind::PermissionDenied)
            }
            other => panic!("unexpected error: {}", other),
        }
        assert!(!path.exists());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_pass_to_child_inherits_marker() {
        use std::process::Command;

        let dir = TempDir::new().unwrap();
        let path = marker_path(&dir);
        let marker = PidMarker::acquire(&path).unwrap();

        // fd 3 must be open in the child and refer to the marker itself
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(r#"[ /dev/fd/3 -ef "$0" ]"#).arg(&path);
        marker.pass_to(&mut cmd);

        assert!(cmd.status().unwrap().success());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_unpassed_marker_is_not_inherited() {
        use std::process::Command;

        let dir = TempDir::new().unwrap();
        let path = marker_path(&dir);
        let _marker = PidMarker::acquire(&path).unwrap();

        let status = Command::new("sh")
            .arg("-c")
            .arg(r#"[ /dev/fd/3 -ef "$0" ]"#)
            .arg(&path)
            .status()
            .unwrap();

        assert!(!status.success());
    }

    #[test]
    fn test_rewrite_replaces_content() {
        let dir = TempDir::new().unwrap();
        let path = marker_path(&dir);
        let mut marker = PidMarker::acquire(&path).unwrap();

        fs::write(&path, "12345678901234567890").unwrap();
        marker.rewrite().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), process::id().to_string());
    }

    #[test]
    fn test_already_running_message() {
        let err = PidError::AlreadyRunning {
            pid: "42".to_string(),
            path: PathBuf::from("/tmp/f5vpn/alice.pid"),
        };
        assert_eq!(
            err.to_string(),
            "f5vpn is already running (PID 42), see \"/tmp/f5vpn/alice.pid\""
        );
    }
}
