//! The resolved invocation record

use crate::config::Config;
use std::fmt;
use std::path::PathBuf;

/// Everything the VPN engine needs to run one session.
///
/// Filled from the command line, the deep link, the configuration resolver
/// and the password resolver, then left untouched.
#[derive(Clone, Default)]
pub struct Options {
    pub server: String,
    pub username: String,
    pub password: String,
    pub session_id: String,
    pub ca_cert: Option<PathBuf>,
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
    /// Custom settings document, `~/.f5vpn/config.toml` otherwise
    pub config_path: Option<PathBuf>,
    pub close_session: bool,
    pub debug: bool,
    /// Let the user pick one of the servers the portal offers
    pub select: bool,
    pub daemon: bool,
    pub profile_index: u32,
    pub config: Config,
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let password = if self.password.is_empty() {
            ""
        } else {
            "<redacted>"
        };
        f.debug_struct("Options")
            .field("server", &self.server)
            .field("username", &self.username)
            .field("password", &password)
            .field("session_id", &self.session_id)
            .field("ca_cert", &self.ca_cert)
            .field("cert", &self.cert)
            .field("key", &self.key)
            .field("config_path", &self.config_path)
            .field("close_session", &self.close_session)
            .field("debug", &self.debug)
            .field("select", &self.select)
            .field("daemon", &self.daemon)
            .field("profile_index", &self.profile_index)
            .field("config", &self.config)
            .finish()
    }
}
