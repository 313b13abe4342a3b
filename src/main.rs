//! Binary entry point for the machinist CLI.

mod cli;

use std::io::{self, Write};
use std::net::{IpAddr, SocketAddr};
use std::process;
use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use thiserror::Error;

use machinist::{
    AppState, ConfigError, Inventory, LifecycleOrchestrator, OptionValue, OrchestratorError,
    Overrides, ScalewayConfig, ServeError, ServerConfig, StateStore, StateStoreError,
    builtin_registry, logging, server,
};

use cli::{Cli, ExecCommand, HostArgs, HostsCommand, ProviderArgs, ServeCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Logging(String),
    #[error("driver registry error: {0}")]
    Registry(String),
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
    #[error(transparent)]
    Store(#[from] StateStoreError),
    #[error("invalid override {0:?}: expected KEY=VALUE")]
    InvalidOverride(String),
    #[error(transparent)]
    Serve(#[from] ServeError),
    #[error("failed to write output: {0}")]
    Output(String),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

/// Wiring shared by every subcommand.
struct Context {
    server: ServerConfig,
    store: StateStore,
    orchestrator: Arc<LifecycleOrchestrator>,
}

impl Context {
    fn load() -> Result<Self, CliError> {
        let server = ServerConfig::load_without_cli_args()?;
        server.validate()?;
        let scaleway = ScalewayConfig::load_without_cli_args()?;
        let registry =
            builtin_registry(scaleway).map_err(|err| CliError::Registry(err.to_string()))?;
        let store = StateStore::new(server.store_root());
        let orchestrator = LifecycleOrchestrator::with_store(Arc::new(registry), store.clone());
        Ok(Self {
            server,
            store,
            orchestrator: Arc::new(orchestrator),
        })
    }

    fn inventory(&self) -> Inventory {
        Inventory::new(self.store.clone())
    }
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    logging::init().map_err(|err| CliError::Logging(err.to_string()))?;
    let context = Context::load()?;

    match cli {
        Cli::Serve(command) => serve(context, &command).await,
        Cli::Providers => print_json(&context.orchestrator.providers()),
        Cli::Options(ProviderArgs { provider }) => {
            print_json(&context.orchestrator.describe(&provider)?)
        }
        Cli::Exec(command) => exec(&context, &command).await,
        Cli::Status(HostArgs { provider, host }) => {
            print_json(&context.orchestrator.inspect(&provider, &host).await?)
        }
        Cli::Hosts(HostsCommand { provider: Some(provider) }) => {
            print_json(&context.inventory().hosts(&provider)?)
        }
        Cli::Hosts(HostsCommand { provider: None }) => {
            print_json(&context.inventory().all_hosts()?)
        }
        Cli::History(HostArgs { provider, host }) => {
            print_json(&context.inventory().history(&provider, &host)?)
        }
    }
}

async fn serve(context: Context, command: &ServeCommand) -> Result<(), CliError> {
    let configured = context.server.socket_addr()?;
    let ip = match &command.bind {
        Some(bind) => bind.trim().parse::<IpAddr>().map_err(|_| {
            ConfigError::Invalid(format!("bind address {bind:?} is not an IP address"))
        })?,
        None => configured.ip(),
    };
    let default_port = configured.port();
    let addr = SocketAddr::new(ip, command.port.unwrap_or(default_port));
    server::serve(AppState::new(context.orchestrator), addr).await?;
    Ok(())
}

async fn exec(context: &Context, command: &ExecCommand) -> Result<(), CliError> {
    let overrides = parse_overrides(&command.overrides)?;
    let status = context
        .orchestrator
        .execute(&command.provider, &command.host, &command.action, &overrides)
        .await?;
    print_json(&status)
}

fn parse_overrides(raw: &[String]) -> Result<Overrides, CliError> {
    raw.iter().map(|pair| parse_override(pair)).collect()
}

fn parse_override(pair: &str) -> Result<(String, OptionValue), CliError> {
    let Some((key, value)) = pair.split_once('=') else {
        return Err(CliError::InvalidOverride(pair.to_owned()));
    };
    let name = key.trim();
    if name.is_empty() {
        return Err(CliError::InvalidOverride(pair.to_owned()));
    }
    let parsed = serde_json::from_str::<OptionValue>(value)
        .unwrap_or_else(|_| OptionValue::from(value));
    Ok((name.to_owned(), parsed))
}

fn print_json(value: &impl Serialize) -> Result<(), CliError> {
    let rendered =
        serde_json::to_string_pretty(value).map_err(|err| CliError::Output(err.to_string()))?;
    writeln!(io::stdout(), "{rendered}").map_err(|err| CliError::Output(err.to_string()))
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
