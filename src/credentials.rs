//! VPN password resolution
//!
//! Sources, first non-empty one wins:
//!
//! 1. the handoff channel, when running as the daemon child
//! 2. `--password`
//! 3. `--password-file` (surrounding whitespace trimmed)
//! 4. the `F5VPN_PASSWORD` environment variable

use crate::daemon::handoff;
use std::env;
use std::fmt;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Environment variable supplying the password
pub const PASSWORD_VAR: &str = "F5VPN_PASSWORD";

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("failed to read password file {path:?}: {source}")]
    ReadFile { path: PathBuf, source: io::Error },
    #[error("failed to receive the password from the parent process: {0}")]
    Handoff(#[source] io::Error),
}

/// Where the password came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Handoff,
    Flag,
    File(PathBuf),
    Env,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub password: String,
    pub source: Source,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("password", &"<redacted>")
            .field("source", &self.source)
            .finish()
    }
}

/// Password-related command line inputs
#[derive(Clone, Default)]
pub struct PasswordInputs {
    pub flag: Option<String>,
    pub file: Option<PathBuf>,
    /// Delete `file` once the password has been resolved
    pub remove_file: bool,
}

impl fmt::Debug for PasswordInputs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordInputs")
            .field("flag", &self.flag.as_ref().map(|_| "<redacted>"))
            .field("file", &self.file)
            .field("remove_file", &self.remove_file)
            .finish()
    }
}

/// Resolve the password from the current process environment
pub fn resolve(
    inputs: &PasswordInputs,
    handoff: Option<&mut dyn Read>,
) -> Result<Option<Credential>, CredentialError> {
    resolve_with(inputs, handoff, |key| env::var(key))
}

/// Resolve the password using a custom environment getter (for testing).
///
/// A `handoff` channel means this is the daemon child: the parent already
/// consumed the password file, so it is neither read nor removed here.
pub fn resolve_with<F>(
    inputs: &PasswordInputs,
    handoff: Option<&mut dyn Read>,
    get_var: F,
) -> Result<Option<Credential>, CredentialError>
where
    F: Fn(&str) -> Result<String, env::VarError>,
{
    let daemon_child = handoff.is_some();
    let mut found = None;

    if let Some(channel) = handoff {
        let password = handoff::receive_credential(channel).map_err(CredentialError::Handoff)?;
        if !password.is_empty() {
            found = Some(Credential {
                password,
                source: Source::Handoff,
            });
        }
    }

    if found.is_none() {
        found = inputs
            .flag
            .as_ref()
            .filter(|p| !p.is_empty())
            .map(|password| Credential {
                password: password.clone(),
                source: Source::Flag,
            });
    }

    let file = if daemon_child {
        None
    } else {
        inputs.file.as_deref()
    };

    if found.is_none() {
        if let Some(path) = file {
            let password = read_password_file(path)?;
            if !password.is_empty() {
                found = Some(Credential {
                    password,
                    source: Source::File(path.to_path_buf()),
                });
            }
        }
    }

    if found.is_none() {
        found = get_var(PASSWORD_VAR)
            .ok()
            .filter(|p| !p.is_empty())
            .map(|password| Credential {
                password,
                source: Source::Env,
            });
    }

    if inputs.remove_file {
        if let Some(path) = file {
            remove_password_file(path);
        }
    }

    if let Some(credential) = &found {
        debug!("Password resolved from {:?}", credential.source);
    }
    Ok(found)
}

fn read_password_file(path: &Path) -> Result<String, CredentialError> {
    fs::read_to_string(path)
        .map(|content| content.trim().to_string())
        .map_err(|source| CredentialError::ReadFile {
            path: path.to_path_buf(),
            source,
        })
}

fn remove_password_file(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!("Removed password file {:?}", path),
        Err(e) => warn!("Failed to remove password file {:?}: {}", path, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn make_getter(
        vars: HashMap<String, String>,
    ) -> impl Fn(&str) -> Result<String, env::VarError> {
        move |key: &str| vars.get(key).cloned().ok_or(env::VarError::NotPresent)
    }

    fn no_env() -> impl Fn(&str) -> Result<String, env::VarError> {
        make_getter(HashMap::new())
    }

    fn env_password(value: &str) -> impl Fn(&str) -> Result<String, env::VarError> {
        let mut vars = HashMap::new();
        vars.insert(PASSWORD_VAR.to_string(), value.to_string());
        make_getter(vars)
    }

    fn password_file(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("p");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_flag_wins_over_file_and_env() {
        let dir = TempDir::new().unwrap();
        let inputs = PasswordInputs {
            flag: Some("from-flag".to_string()),
            file: Some(password_file(&dir, "from-file")),
            remove_file: false,
        };

        let credential = resolve_with(&inputs, None, env_password("from-env"))
            .unwrap()
            .unwrap();

        assert_eq!(credential.password, "from-flag");
        assert_eq!(credential.source, Source::Flag);
    }

    #[test]
    fn test_file_is_trimmed() {
        let dir = TempDir::new().unwrap();
        let path = password_file(&dir, "  secret\n");
        let inputs = PasswordInputs {
            file: Some(path.clone()),
            ..PasswordInputs::default()
        };

        let credential = resolve_with(&inputs, None, env_password("from-env"))
            .unwrap()
            .unwrap();

        assert_eq!(credential.password, "secret");
        assert_eq!(credential.source, Source::File(path.clone()));
        assert!(path.exists());
    }

    #[test]
    fn test_file_removed_after_read() {
        let dir = TempDir::new().unwrap();
        let path = password_file(&dir, "secret\n");
        let inputs = PasswordInputs {
            file: Some(path.clone()),
            remove_file: true,
            ..PasswordInputs::default()
        };

        let credential = resolve_with(&inputs, None, no_env()).unwrap().unwrap();

        assert_eq!(credential.password, "secret");
        assert!(!path.exists());
    }

    #[test]
    fn test_unread_file_still_removed() {
        let dir = TempDir::new().unwrap();
        let path = password_file(&dir, "unused");
        let inputs = PasswordInputs {
            flag: Some("from-flag".to_string()),
            file: Some(path.clone()),
            remove_file: true,
        };

        resolve_with(&inputs, None, no_env()).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_unreadable_file_is_fatal() {
        let dir = TempDir::new().unwrap();
        let inputs = PasswordInputs {
            file: Some(dir.path().join("missing")),
            ..PasswordInputs::default()
        };

        let err = resolve_with(&inputs, None, env_password("from-env")).unwrap_err();
        assert!(matches!(err, CredentialError::ReadFile { .. }));
    }

    #[test]
    fn test_env_fallback() {
        let credential = resolve_with(&PasswordInputs::default(), None, env_password("hunter2"))
            .unwrap()
            .unwrap();
        assert_eq!(credential.password, "hunter2");
        assert_eq!(credential.source, Source::Env);
    }

    #[test]
    fn test_empty_file_falls_through_to_env() {
        let dir = TempDir::new().unwrap();
        let inputs = PasswordInputs {
            file: Some(password_file(&dir, "\n")),
            ..PasswordInputs::default()
        };

        let credential = resolve_with(&inputs, None, env_password("hunter2"))
            .unwrap()
            .unwrap();
        assert_eq!(credential.source, Source::Env);
    }

    #[test]
    fn test_nothing_resolved() {
        assert!(
            resolve_with(&PasswordInputs::default(), None, no_env())
                .unwrap()
                .is_none()
        );
        assert!(resolve_with(&PasswordInputs::default(), None, env_password("")).unwrap().is_none());
    }

    #[test]
    fn test_handoff_wins_and_ignores_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("already-removed");
        let inputs = PasswordInputs {
            flag: Some("from-flag".to_string()),
            file: Some(path),
            remove_file: true,
        };
        let mut channel: &[u8] = b"from parent\n";

        let credential = resolve_with(&inputs, Some(&mut channel), env_password("from-env"))
            .unwrap()
            .unwrap();

        // the channel carries the password verbatim
        assert_eq!(credential.password, "from parent\n");
        assert_eq!(credential.source, Source::Handoff);
    }

    #[test]
    fn test_handoff_keeps_file_in_place() {
        let dir = TempDir::new().unwrap();
        let path = password_file(&dir, "secret");
        let inputs = PasswordInputs {
            file: Some(path.clone()),
            remove_file: true,
            ..PasswordInputs::default()
        };
        let mut channel: &[u8] = b"";

        let credential = resolve_with(&inputs, Some(&mut channel), no_env()).unwrap();

        assert!(credential.is_none());
        assert!(path.exists());
    }

    #[test]
    fn test_debug_redacts_password() {
        let credential = Credential {
            password: "hunter2".to_string(),
            source: Source::Flag,
        };
        let rendered = format!("{:?}", credential);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}
