//! VPN engine contracts
//!
//! The bootstrap hands a fully resolved [`Options`] record to an [`Engine`].
//! Tunnel establishment, TLS and DNS handling live behind this trait.
//!
//! [`Standby`] is the engine the binary ships with: it interprets deep links,
//! completes missing credentials interactively and keeps the instance (and
//! its PID marker) alive until it is told to stop.

pub mod deeplink;

pub use deeplink::DeepLink;

use crate::options::Options;
use std::fmt;
use std::fs;
use std::future::Future;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid f5-vpn link: {0}")]
    InvalidLink(String),
    #[error("failed to parse link: {0}")]
    Url(#[from] url::ParseError),
    #[error("server is required, use --server")]
    MissingServer,
    #[error("username is required, use --username")]
    MissingUsername,
    #[error("password is required, use --password")]
    MissingPassword,
    #[error("failed to read the {kind} {path:?}: {source}")]
    TlsMaterial {
        kind: &'static str,
        path: PathBuf,
        source: io::Error,
    },
    #[error("failed to read {0} from the terminal: {1}")]
    Prompt(&'static str, #[source] io::Error),
    #[error("failed to listen for shutdown signals: {0}")]
    Signal(#[source] io::Error),
}

pub trait Engine {
    /// Fill options from a deep-link invocation
    fn handle_url(&self, options: &mut Options, link: &str) -> Result<(), EngineError>;

    /// Run the VPN session to completion
    fn connect(&self, options: &Options) -> impl Future<Output = Result<(), EngineError>>;
}

/// Holds a validated session open until Ctrl-C or SIGTERM
#[derive(Debug, Default)]
pub struct Standby;

impl Engine for Standby {
    fn handle_url(&self, options: &mut Options, link: &str) -> Result<(), EngineError> {
        DeepLink::parse(link)?.apply(options);
        debug!("Deep link resolved to server {}", options.server);
        Ok(())
    }

    async fn connect(&self, options: &Options) -> Result<(), EngineError> {
        if options.server.is_empty() {
            return Err(EngineError::MissingServer);
        }
        check_tls_material(options)?;

        let login = Login::complete(
            options,
            || prompt_line("Username"),
            |username| {
                rpassword::prompt_password(format!("Password for {}: ", username))
                    .map_err(|e| EngineError::Prompt("password", e))
            },
        )?;

        let config = &options.config;
        info!(
            "Session for {}@{} ready (driver {}, DNS listener {}, profile {})",
            login.username, options.server, config.driver, config.listen_dns, options.profile_index
        );
        debug!("Login: {:?}", login);
        if !options.session_id.is_empty() {
            info!("Reusing session {}", options.session_id);
        }
        debug!("Cookies are kept in {:?}", config.cookie_path);

        wait_for_shutdown().await?;

        if options.close_session {
            info!("Closing session of {} on {}", login.username, options.server);
        }
        Ok(())
    }
}

/// Credentials the session runs with
#[derive(Clone, PartialEq, Eq)]
struct Login {
    username: String,
    password: String,
}

impl fmt::Debug for Login {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Login")
            .field("username", &self.username)
            .field("password", &redacted(&self.password))
            .finish()
    }
}

fn redacted(secret: &str) -> &'static str {
    if secret.is_empty() { "<empty>" } else { "<redacted>" }
}

impl Login {
    /// Take the credentials from `options`, asking for whatever is missing
    fn complete<U, P>(
        options: &Options,
        ask_username: U,
        ask_password: P,
    ) -> Result<Self, EngineError>
    where
        U: FnOnce() -> Result<String, EngineError>,
        P: FnOnce(&str) -> Result<String, EngineError>,
    {
        let username = if options.username.is_empty() {
            ask_username()?
        } else {
            options.username.clone()
        };
        if username.is_empty() {
            return Err(EngineError::MissingUsername);
        }

        let password = if options.password.is_empty() {
            ask_password(&username)?
        } else {
            options.password.clone()
        };
        if password.is_empty() {
            return Err(EngineError::MissingPassword);
        }

        Ok(Self { username, password })
    }
}

fn check_tls_material(options: &Options) -> Result<(), EngineError> {
    let files = [
        ("CA certificate", &options.ca_cert),
        ("certificate", &options.cert),
        ("key", &options.key),
    ];
    for (kind, path) in files {
        if let Some(path) = path {
            fs::metadata(path).map_err(|source| EngineError::TlsMaterial {
                kind,
                path: path.clone(),
                source,
            })?;
        }
    }
    Ok(())
}

fn prompt_line(label: &'static str) -> Result<String, EngineError> {
    print!("{}: ", label);
    io::stdout()
        .flush()
        .map_err(|e| EngineError::Prompt(label, e))?;

    let mut input = String::new();
    io::stdin()
        .lock()
        .read_line(&mut input)
        .map_err(|e| EngineError::Prompt(label, e))?;
    Ok(input.trim().to_string())
}

async fn wait_for_shutdown() -> Result<(), EngineError> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut terminate = signal(SignalKind::terminate()).map_err(EngineError::Signal)?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.map_err(EngineError::Signal)?;
                info!("Interrupted, shutting down");
            }
            _ = terminate.recv() => info!("Received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.map_err(EngineError::Signal)?;
        info!("Interrupted, shutting down");
    }

    Ok(())
}
