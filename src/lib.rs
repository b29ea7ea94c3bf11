//! f5vpn - command-line F5 VPN client
//!
//! This crate turns one invocation into a correctly configured,
//! single-instance, optionally daemonized process and hands it to a VPN
//! engine.
//!
//! # Architecture
//!
//! - `cli`: Command line parsing and validation
//! - `identity`: Invoking user, including sudo-escalated invocations
//! - `config`: Configuration/cookie directories and the TOML settings document
//! - `credentials`: Password resolution
//! - `daemon`: Daemonization, credential handoff and the PID marker
//! - `platform`: Per-OS privilege checks and defaults
//! - `engine`: The contract to the VPN engine, deep links
//! - `bootstrap`: The startup sequence tying it together
//!
//! # Usage
//!
//! ```bash
//! sudo f5vpn --server vpn.example.com --username alice \
//!   --password-file ~/.vpnpass --remove-password-file --daemon
//! ```

pub mod bootstrap;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod daemon;
pub mod engine;
pub mod identity;
pub mod options;
pub mod platform;

pub use bootstrap::{BootstrapError, Outcome};
pub use cli::Cli;
pub use config::{Config, Driver};
pub use engine::{Engine, Standby};
pub use options::Options;
