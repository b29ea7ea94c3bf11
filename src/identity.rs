//! Invocation identity
//!
//! Who invoked the process is captured once at startup and passed explicitly
//! to the configuration resolver and the daemon supervisor. When running as
//! root through sudo, configuration belongs to the original user named by
//! `SUDO_UID` / `SUDO_USER` rather than to root.

use std::env;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, warn};

pub const SUDO_UID_VAR: &str = "SUDO_UID";
pub const SUDO_USER_VAR: &str = "SUDO_USER";

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("failed to detect the current user: {0}")]
    CurrentUser(String),
    #[error("failed to resolve the sudo user: lookup of user id {uid:?} failed ({by_uid}), {by_name}")]
    Unresolvable {
        uid: String,
        by_uid: String,
        by_name: String,
    },
}

/// A user account as far as file ownership is concerned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub home: PathBuf,
    pub uid: u32,
    pub gid: u32,
}

/// Account database lookups
pub trait UserDirectory {
    fn by_uid(&self, uid: u32) -> Result<Identity, String>;
    fn by_name(&self, name: &str) -> Result<Identity, String>;
    /// Real (not effective) user of this process
    fn current(&self) -> Result<Identity, String>;
}

/// The operating system's account database
pub struct SystemUsers;

#[cfg(unix)]
impl From<nix::unistd::User> for Identity {
    fn from(user: nix::unistd::User) -> Self {
        Self {
            name: user.name,
            home: user.dir,
            uid: user.uid.as_raw(),
            gid: user.gid.as_raw(),
        }
    }
}

#[cfg(unix)]
impl UserDirectory for SystemUsers {
    fn by_uid(&self, uid: u32) -> Result<Identity, String> {
        match nix::unistd::User::from_uid(nix::unistd::Uid::from_raw(uid)) {
            Ok(Some(user)) => Ok(user.into()),
            Ok(None) => Err(format!("unknown user id {}", uid)),
            Err(e) => Err(e.to_string()),
        }
    }

    fn by_name(&self, name: &str) -> Result<Identity, String> {
        match nix::unistd::User::from_name(name) {
            Ok(Some(user)) => Ok(user.into()),
            Ok(None) => Err(format!("unknown user {:?}", name)),
            Err(e) => Err(e.to_string()),
        }
    }

    fn current(&self) -> Result<Identity, String> {
        self.by_uid(nix::unistd::getuid().as_raw())
    }
}

// Windows keeps the original user's profile when elevating, so there is
// nothing to look up and no numeric ownership to apply.
#[cfg(not(unix))]
impl UserDirectory for SystemUsers {
    fn by_uid(&self, uid: u32) -> Result<Identity, String> {
        Err(format!("looking up user id {} is not supported", uid))
    }

    fn by_name(&self, name: &str) -> Result<Identity, String> {
        Err(format!("looking up user {:?} is not supported", name))
    }

    fn current(&self) -> Result<Identity, String> {
        let name = env::var("USERNAME").map_err(|e| format!("USERNAME: {}", e))?;
        let home = dirs::home_dir().ok_or_else(|| "home directory not found".to_string())?;
        Ok(Identity {
            name,
            home,
            uid: 0,
            gid: 0,
        })
    }
}

/// Whether the process runs with an effective uid of 0
pub fn is_elevated() -> bool {
    #[cfg(unix)]
    {
        nix::unistd::geteuid().is_root()
    }

    #[cfg(not(unix))]
    {
        false
    }
}

/// Identity facts gathered once per invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationContext {
    /// Owner of the configuration and cookie directories
    pub identity: Identity,
    /// Real user of this process; names the PID marker and the daemon log
    pub process_user: String,
    pub elevated: bool,
}

impl InvocationContext {
    pub fn from_system() -> Result<Self, IdentityError> {
        Self::from_env_fn(is_elevated(), |key| env::var(key), &SystemUsers)
    }

    /// Resolve using a custom environment getter and account database (for testing)
    pub fn from_env_fn<F>(
        elevated: bool,
        get_var: F,
        users: &dyn UserDirectory,
    ) -> Result<Self, IdentityError>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        let current = users.current().map_err(IdentityError::CurrentUser)?;

        let sudo_uid = get_var(SUDO_UID_VAR).ok().filter(|v| !v.is_empty());
        let identity = match sudo_uid {
            Some(uid) if elevated => resolve_sudo_user(&uid, &get_var, users)?,
            _ => current.clone(),
        };
        debug!(
            "Invocation identity: {} (uid {}, gid {}), process user {}",
            identity.name, identity.uid, identity.gid, current.name
        );

        Ok(Self {
            identity,
            process_user: current.name,
            elevated,
        })
    }
}

fn resolve_sudo_user<F>(
    uid: &str,
    get_var: &F,
    users: &dyn UserDirectory,
) -> Result<Identity, IdentityError>
where
    F: Fn(&str) -> Result<String, env::VarError>,
{
    let by_uid = match uid.parse::<u32>() {
        Ok(id) => users.by_uid(id),
        Err(e) => Err(format!("not a numeric id: {}", e)),
    };
    let by_uid = match by_uid {
        Ok(identity) => return Ok(identity),
        Err(e) => e,
    };
    warn!("Failed to look up user ID {}: {}", uid, by_uid);

    let by_name = match get_var(SUDO_USER_VAR).ok().filter(|v| !v.is_empty()) {
        Some(name) => match users.by_name(&name) {
            Ok(identity) => return Ok(identity),
            Err(e) => format!("lookup of user name {:?} failed ({})", name, e),
        },
        None => format!("no {} to fall back to", SUDO_USER_VAR),
    };

    Err(IdentityError::Unresolvable {
        uid: uid.to_string(),
        by_uid,
        by_name,
    })
}
