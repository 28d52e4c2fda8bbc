//! Main entry point for CLI command to start the gateway over the demo services.

use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use configuration::Configuration;
use gateway::demo;
use gateway::Gateway;
use gateway::Request;
use json_ext::Object;
use tracing_subscriber::EnvFilter;

/// Options for the gateway.
#[derive(Parser, Debug)]
#[command(name = "federation-gateway", about = "Federated graph gateway")]
struct Opt {
    /// Log level (off|error|warn|info|debug|trace).
    #[arg(long = "log", default_value = "info", alias = "log-level", env = "GATEWAY_LOG")]
    log_level: String,

    /// Configuration file location.
    #[arg(short, long = "config", env = "GATEWAY_CONFIG_PATH")]
    config_path: Option<PathBuf>,

    /// Prints the composed schema and exits.
    #[arg(long)]
    schema: bool,

    /// The operation to run.
    #[arg(short, long, required_unless_present = "schema")]
    query: Option<String>,

    /// The operation name, when the query holds several operations.
    #[arg(long)]
    operation_name: Option<String>,

    /// Variables of the operation, as a JSON object.
    #[arg(long)]
    variables: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let opt = Opt::parse();

    tracing_subscriber::fmt::fmt()
        .with_env_filter(
            EnvFilter::try_new(&opt.log_level).context("could not parse log configuration")?,
        )
        .with_writer(std::io::stderr)
        .init();

    let configuration = match &opt.config_path {
        Some(path) => Configuration::from_file(path)?,
        None => Configuration::default(),
    };
    let gateway = Gateway::new(configuration, demo::services()?)?;

    if opt.schema {
        println!("{}", serde_json::to_string_pretty(gateway.schema().as_ref())?);
        return Ok(());
    }

    let variables = match &opt.variables {
        Some(variables) => serde_json::from_str::<Object>(variables)
            .context("variables must be a JSON object")?,
        None => Object::new(),
    };
    let request = Request::builder()
        .query(opt.query.unwrap_or_default())
        .operation_name(opt.operation_name)
        .variables(variables)
        .build();

    let response = gateway.execute(request).await;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
