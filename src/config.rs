//! Configuration handling
//!
//! Resolves the configuration and cookie directories for the invoking user,
//! loads the TOML settings document and applies per-platform defaults.
//!
//! # Settings File Format
//!
//! ```toml
//! driver = "wireguard"
//! listen_dns = "127.0.0.245"
//! dns = [".corp.example.com"]
//! routes = ["10.0.0.0/8"]
//! daemon = false
//! ```
//!
//! Resolved paths, owner ids and the debug flag are never read from the
//! document, they are recomputed on every start.

use crate::identity::InvocationContext;
use crate::platform::{self, PlatformError, TargetOs};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info};

/// Per-user directory holding the settings document and session cookies
pub const CONFIG_DIR: &str = ".f5vpn";
pub const CONFIG_NAME: &str = "config.toml";

pub const SUPPORTED_DRIVERS: [&str; 2] = ["wireguard", "pppd"];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to create {path:?} {kind} directory: {source}")]
    CreateDir {
        kind: &'static str,
        path: PathBuf,
        source: io::Error,
    },
    #[error("failed to set an owner for the {path:?} {kind} directory: {source}")]
    ChownDir {
        kind: &'static str,
        path: PathBuf,
        source: io::Error,
    },
    #[error("failed to get {path:?} directory stat: {source}")]
    StatDir { path: PathBuf, source: io::Error },
    #[error("cannot parse {path:?} file: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("failed to write {path:?} file: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error(transparent)]
    DriverUnavailable(#[from] PlatformError),
    #[error("pppd driver is not supported in Windows")]
    PppdOnWindows,
    #[error("{value:?} driver is unsupported, supported drivers are: {:?}", SUPPORTED_DRIVERS)]
    UnsupportedDriver { value: String },
}

/// Mechanism providing the local tunnel interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Driver {
    #[default]
    Wireguard,
    Pppd,
}

impl Driver {
    pub fn as_str(self) -> &'static str {
        match self {
            Driver::Wireguard => "wireguard",
            Driver::Pppd => "pppd",
        }
    }
}

impl FromStr for Driver {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wireguard" => Ok(Driver::Wireguard),
            "pppd" => Ok(Driver::Pppd),
            _ => Err(ConfigError::UnsupportedDriver {
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The settings document as stored on disk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen_dns: Option<IpAddr>,
    /// Domains resolved through the tunnel
    pub dns: Vec<String>,
    /// DNS servers used instead of the ones the server pushes
    pub override_dns: Vec<IpAddr>,
    pub dns_search: Vec<String>,
    /// CIDRs routed through the tunnel instead of the server-provided ones
    pub routes: Vec<String>,
    pub pppd_args: Vec<String>,
    pub insecure_tls: bool,
    pub disable_dns: bool,
    pub ipv6: bool,
    pub daemon: bool,
}

impl Settings {
    /// Load the document; `Ok(None)` when it can't be read
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                info!("Cannot read config file {:?}: {}", path, e);
                return Ok(None);
            }
        };
        toml::from_str(&content)
            .map(Some)
            .map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Resolved runtime settings handed to the VPN engine
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub driver: Driver,
    pub listen_dns: IpAddr,
    pub dns: Vec<String>,
    pub override_dns: Vec<IpAddr>,
    pub dns_search: Vec<String>,
    pub routes: Vec<String>,
    pub pppd_args: Vec<String>,
    pub insecure_tls: bool,
    pub disable_dns: bool,
    pub ipv6: bool,
    pub daemon: bool,
    /// Configuration directory
    pub path: PathBuf,
    /// Cookie storage, always `~/.f5vpn`
    pub cookie_path: PathBuf,
    pub uid: u32,
    pub gid: u32,
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            driver: Driver::default(),
            listen_dns: TargetOs::current().default_listen_dns(),
            dns: vec![],
            override_dns: vec![],
            dns_search: vec![],
            routes: vec![],
            pppd_args: vec![],
            insecure_tls: false,
            disable_dns: false,
            ipv6: false,
            daemon: false,
            path: PathBuf::new(),
            cookie_path: PathBuf::new(),
            uid: 0,
            gid: 0,
            debug: false,
        }
    }
}

/// Where the settings document and cookies live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPaths {
    pub dir: PathBuf,
    pub file: PathBuf,
    pub cookie_dir: PathBuf,
}

impl ConfigPaths {
    pub fn resolve(home: &Path, custom_file: Option<&Path>) -> Self {
        let default_dir = home.join(CONFIG_DIR);
        match custom_file {
            Some(file) => {
                let dir = file
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .unwrap_or(Path::new("."));
                Self {
                    dir: dir.to_path_buf(),
                    file: file.to_path_buf(),
                    cookie_dir: default_dir,
                }
            }
            None => Self {
                file: default_dir.join(CONFIG_NAME),
                dir: default_dir.clone(),
                cookie_dir: default_dir,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirState {
    Existing,
    Created,
}

/// Create `path` owner-only if it is missing and hand it to `owner`.
/// Existing directories are left untouched.
pub fn prepare_dir(
    path: &Path,
    kind: &'static str,
    owner: Option<(u32, u32)>,
) -> Result<DirState, ConfigError> {
    match fs::metadata(path) {
        Ok(_) => return Ok(DirState::Existing),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(source) => {
            return Err(ConfigError::StatDir {
                path: path.to_path_buf(),
                source,
            });
        }
    }

    info!("{:?} directory doesn't exist, creating...", path);
    create_private_dir(path).map_err(|source| ConfigError::CreateDir {
        kind,
        path: path.to_path_buf(),
        source,
    })?;

    if let Some((uid, gid)) = owner {
        set_owner(path, uid, gid).map_err(|source| ConfigError::ChownDir {
            kind,
            path: path.to_path_buf(),
            source,
        })?;
    }

    Ok(DirState::Created)
}

#[cfg(unix)]
fn create_private_dir(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().recursive(true).mode(0o700).create(path)
}

#[cfg(not(unix))]
fn create_private_dir(path: &Path) -> io::Result<()> {
    fs::create_dir_all(path)
}

#[cfg(unix)]
fn set_owner(path: &Path, uid: u32, gid: u32) -> io::Result<()> {
    std::os::unix::fs::chown(path, Some(uid), Some(gid))
}

#[cfg(not(unix))]
fn set_owner(_path: &Path, _uid: u32, _gid: u32) -> io::Result<()> {
    Ok(())
}

/// Default and validate the driver and DNS listener
pub fn apply_defaults(
    settings: &Settings,
    os: TargetOs,
    wireguard_check: &dyn Fn() -> Result<(), PlatformError>,
) -> Result<(Driver, IpAddr), ConfigError> {
    let name = settings
        .driver
        .as_deref()
        .filter(|d| !d.is_empty())
        .unwrap_or(Driver::Wireguard.as_str());

    if name == Driver::Wireguard.as_str() {
        wireguard_check()?;
    }

    if name == Driver::Pppd.as_str() && os.is_windows() {
        return Err(ConfigError::PppdOnWindows);
    }

    let driver: Driver = name.parse()?;
    let listen_dns = settings
        .listen_dns
        .unwrap_or_else(|| os.default_listen_dns());

    Ok((driver, listen_dns))
}

/// Resolve the configuration for the running platform
pub fn resolve(
    ctx: &InvocationContext,
    custom_file: Option<&Path>,
    debug: bool,
) -> Result<Config, ConfigError> {
    resolve_for(
        ctx,
        custom_file,
        debug,
        TargetOs::current(),
        &platform::check_wireguard_driver,
    )
}

/// Resolve the configuration for a given platform (for testing)
pub fn resolve_for(
    ctx: &InvocationContext,
    custom_file: Option<&Path>,
    debug: bool,
    os: TargetOs,
    wireguard_check: &dyn Fn() -> Result<(), PlatformError>,
) -> Result<Config, ConfigError> {
    let identity = &ctx.identity;
    let paths = ConfigPaths::resolve(&identity.home, custom_file);

    // Windows keeps the original user on elevation, nothing to chown
    let owner = cfg!(unix).then_some((identity.uid, identity.gid));

    prepare_dir(&paths.dir, "config", owner)?;

    let settings = Settings::load(&paths.file)?.unwrap_or_default();
    let (driver, listen_dns) = apply_defaults(&settings, os, wireguard_check)?;

    if paths.cookie_dir != paths.dir {
        prepare_dir(&paths.cookie_dir, "cookie", owner)?;
    }

    debug!(
        "Resolved config: driver={}, listen_dns={}, path={:?}, cookies={:?}",
        driver, listen_dns, paths.dir, paths.cookie_dir
    );

    Ok(Config {
        driver,
        listen_dns,
        dns: settings.dns,
        override_dns: settings.override_dns,
        dns_search: settings.dns_search,
        routes: settings.routes,
        pppd_args: settings.pppd_args,
        insecure_tls: settings.insecure_tls,
        disable_dns: settings.disable_dns,
        ipv6: settings.ipv6,
        daemon: settings.daemon,
        path: paths.dir,
        cookie_path: paths.cookie_dir,
        uid: identity.uid,
        gid: identity.gid,
        debug,
    })
}
