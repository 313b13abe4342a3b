//! Command-line interface definitions for the `machinist` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser};

/// Top-level CLI for the `machinist` binary.
#[derive(Debug, Parser)]
#[command(
    name = "machinist",
    version,
    about = "Provision and track remote hosts through pluggable provider drivers",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Serve the HTTP API.
    #[command(name = "serve", about = "Serve the HTTP API")]
    Serve(ServeCommand),
    /// List registered providers.
    #[command(name = "providers", about = "List registered providers")]
    Providers,
    /// Show the options a provider accepts.
    #[command(name = "options", about = "Show the options a provider accepts")]
    Options(ProviderArgs),
    /// Run a lifecycle action against a host.
    #[command(name = "exec", about = "Run a lifecycle action against a host")]
    Exec(ExecCommand),
    /// Report the recorded host's current status.
    #[command(name = "status", about = "Report a recorded host's current status")]
    Status(HostArgs),
    /// List recorded hosts.
    #[command(name = "hosts", about = "List recorded hosts")]
    Hosts(HostsCommand),
    /// Show the snapshot history of a host.
    #[command(name = "history", about = "Show the snapshot history of a host")]
    History(HostArgs),
}

/// Arguments for `machinist serve`.
#[derive(Debug, Args)]
pub(crate) struct ServeCommand {
    /// Address to bind instead of the configured one.
    #[arg(long, value_name = "IP")]
    pub(crate) bind: Option<String>,
    /// Port to listen on instead of the configured one.
    #[arg(long, value_name = "PORT")]
    pub(crate) port: Option<u16>,
}

/// A provider name.
#[derive(Debug, Args)]
pub(crate) struct ProviderArgs {
    /// Provider name, for example `none` or `scaleway`.
    pub(crate) provider: String,
}

/// A provider and host pair.
#[derive(Debug, Args)]
pub(crate) struct HostArgs {
    /// Provider name.
    pub(crate) provider: String,
    /// Host name.
    pub(crate) host: String,
}

/// Arguments for `machinist exec`.
#[derive(Debug, Args)]
pub(crate) struct ExecCommand {
    /// Provider name.
    pub(crate) provider: String,
    /// Host name.
    pub(crate) host: String,
    /// One of create, start, stop, restart, kill, or remove.
    pub(crate) action: String,
    /// Override a declared option for a host without recorded state.
    ///
    /// Values are parsed as JSON when possible (`size=2`, `debug=true`,
    /// `tags=["a","b"]`) and taken as plain strings otherwise.
    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub(crate) overrides: Vec<String>,
}

/// Arguments for `machinist hosts`.
#[derive(Debug, Args)]
pub(crate) struct HostsCommand {
    /// Only list hosts of this provider.
    pub(crate) provider: Option<String>,
}
