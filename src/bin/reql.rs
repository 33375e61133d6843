//! ReQL command-line client
//!
//! Runs raw wire-format queries against a server and prints the results as
//! JSON.
//!
//! # Examples
//!
//! ```bash
//! # List databases
//! reql run '[59]'
//!
//! # r.db("blog").table("posts").count()
//! reql --db blog run '[43, [[15, ["posts"]]]]'
//!
//! # Server name and id
//! reql server-info
//!
//! # Connection settings from a file, password from the environment
//! REQL_PASSWORD=secret reql --config reql.toml run '[59]'
//! ```

use clap::{Args, Parser, Subcommand};
use reql_driver::network::{ConnectionOptions, ProtocolVersion, QueryOutput};
use reql_driver::reql::{FormatOptions, TermCompiler};
use reql_driver::{Connection, RunOptions};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// ReQL client - run queries against a RethinkDB server
#[derive(Parser, Debug)]
#[command(name = "reql")]
#[command(version = reql_driver::VERSION)]
#[command(about = "ReQL client - run queries against a RethinkDB server", long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    connection: ConnectionArgs,

    /// Log directory path (console only when unset)
    #[arg(long, global = true, env = "REQL_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG directives apply on top
    #[arg(long, global = true, default_value = "warn", env = "REQL_LOG_LEVEL")]
    log_level: String,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

/// Connection settings; flags override the config file.
#[derive(Args, Debug)]
struct ConnectionArgs {
    /// TOML file with connection options
    #[arg(short, long, global = true, env = "REQL_CONFIG")]
    config: Option<PathBuf>,

    /// Server host
    #[arg(long, global = true, env = "REQL_HOST")]
    host: Option<String>,

    /// Client driver port
    #[arg(short, long, global = true, env = "REQL_PORT")]
    port: Option<u16>,

    /// Default database
    #[arg(long, global = true, env = "REQL_DB")]
    db: Option<String>,

    /// User name
    #[arg(short, long, global = true, env = "REQL_USER")]
    user: Option<String>,

    /// Password
    #[arg(long, global = true, env = "REQL_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Authorization key (implies the V0_4 handshake)
    #[arg(long, global = true, env = "REQL_AUTH_KEY", hide_env_values = true)]
    auth_key: Option<String>,

    /// Handshake version (v1_0 or v0_4)
    #[arg(long, global = true)]
    handshake: Option<ProtocolVersion>,

    /// Connect timeout in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,
}

impl ConnectionArgs {
    fn options(&self) -> anyhow::Result<ConnectionOptions> {
        let mut options = match &self.config {
            Some(path) => ConnectionOptions::from_toml_file(path)?,
            None => ConnectionOptions::default(),
        };

        if let Some(host) = &self.host {
            options.host = host.clone();
        }
        if let Some(port) = self.port {
            options.port = port;
        }
        if let Some(db) = &self.db {
            options.db = Some(db.clone());
        }
        if let Some(user) = &self.user {
            options.user = user.clone();
        }
        if let Some(password) = &self.password {
            options.password = password.clone();
        }
        if let Some(key) = &self.auth_key {
            options.auth_key = Some(key.clone());
            options.handshake = ProtocolVersion::V0_4;
        }
        if let Some(handshake) = self.handshake {
            options.handshake = handshake;
        }
        if let Some(timeout) = self.timeout {
            options.connect_timeout_secs = timeout;
        }
        Ok(options)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a query given in wire JSON form
    Run(RunArgs),

    /// Show server information
    ServerInfo,

    /// Show client version
    Version,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Query as wire JSON, e.g. '[59]' for r.db_list()
    query: String,

    /// Return TIME, GROUPED_DATA and BINARY values as raw objects
    #[arg(long)]
    raw: bool,

    /// Include the query profile
    #[arg(long)]
    profile: bool,

    /// Don't wait for the result
    #[arg(long)]
    noreply: bool,

    /// Give up waiting for the result after this many seconds
    #[arg(long)]
    wait_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli)?;

    match cli.command {
        Commands::Run(args) => run_command(cli.connection.options()?, args).await,
        Commands::ServerInfo => server_info_command(cli.connection.options()?).await,
        Commands::Version => {
            println!("reql {}", reql_driver::VERSION);
            Ok(())
        }
    }
}

/// Console logging on stderr plus an optional daily rolling file
fn setup_logging(cli: &Cli) -> anyhow::Result<()> {
    let file_layer = match &cli.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = RollingFileAppender::new(Rotation::DAILY, dir, "reql.log");
            Some(fmt::layer().with_writer(file_appender).with_ansi(false))
        }
        None => None,
    };

    let log_level = cli
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::WARN);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(!cli.no_color),
        )
        .with(file_layer)
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .init();

    Ok(())
}

async fn run_command(options: ConnectionOptions, args: RunArgs) -> anyhow::Result<()> {
    let term = TermCompiler::compile_str(&args.query)?;
    debug!(query = %term, "Compiled query");

    let connection = Connection::connect(options).await?;
    info!(address = %connection.options().address(), "Connected");

    let run_options = RunOptions::new()
        .noreply(args.noreply)
        .profile(args.profile)
        .format(if args.raw {
            FormatOptions::raw()
        } else {
            FormatOptions::default()
        });

    let mut pending = connection.submit(term, &run_options)?;
    let output = pending.wait(args.wait_secs.map(Duration::from_secs)).await?;
    match output {
        QueryOutput::NoReply => {}
        other => {
            let datum = other.into_datum().await?;
            println!("{}", serde_json::to_string_pretty(&serde_json::Value::from(datum))?);
        }
    }

    connection.close(args.noreply).await?;
    Ok(())
}

async fn server_info_command(options: ConnectionOptions) -> anyhow::Result<()> {
    let connection = Connection::connect(options).await?;
    let info = connection.server_info().await?;
    println!("{}", serde_json::to_string_pretty(&serde_json::Value::from(info))?);
    connection.close(false).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_log_level_has_its_own_env() {
        let command = Cli::command();
        let log_level = command
            .get_arguments()
            .find(|arg| arg.get_id() == "log_level")
            .unwrap();
        assert_eq!(log_level.get_env(), Some(std::ffi::OsStr::new("REQL_LOG_LEVEL")));
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from(["reql", "--db", "blog", "run", "[59]", "--raw"]).unwrap();
        assert_eq!(cli.connection.db.as_deref(), Some("blog"));
        assert!(matches!(cli.command, Commands::Run(RunArgs { raw: true, .. })));
    }
}
