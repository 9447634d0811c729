use anyhow::{anyhow, bail, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;

use signature_gateway::comms::gateway_api;
use signature_gateway::gateway::config::GatewayConfig;
use signature_gateway::security::signature_codec::{self, SignatureEnvelope};
use signature_gateway::utils::logging;

#[derive(Parser)]
#[command(name = "signature-gateway", version, about = "Signature and token verification gateway")]
struct AppCli {
    /// Debug-level logging unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
        /// Config file path
        #[arg(short, long, default_value = "gateway.json")]
        config: String,
    },
    /// Print a fresh `sign` header value
    Sign {
        #[arg(long)]
        secret: String,
        /// Signed parameter, `name=value`; repeatable
        #[arg(long = "param", value_name = "NAME=VALUE")]
        params: Vec<String>,
        /// Leave query parameters unchecked (sign time only)
        #[arg(long)]
        no_parameter: bool,
    },
}

fn sign_header(secret: &str, params: &[String], validate_parameter: bool) -> Result<String> {
    let mut envelope =
        SignatureEnvelope::new(secret.trim(), Utc::now().timestamp_millis(), validate_parameter);
    for raw in params {
        let (name, value) = raw
            .split_once('=')
            .ok_or_else(|| anyhow!("parameter `{raw}` is not NAME=VALUE"))?;
        let name = name.trim();
        if signature_codec::is_reserved(name) {
            bail!("`{name}` is a reserved envelope key and cannot be signed as a parameter");
        }
        envelope = envelope.with_param(name, value);
    }
    Ok(signature_codec::encrypt(&envelope, secret)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = AppCli::parse();
    logging::init(if args.verbose { "debug" } else { "info" });

    match args.command {
        Commands::Serve { port, config } => {
            info!("loading gateway config from {}", config);
            let config = GatewayConfig::load(&config)?;
            gateway_api::serve(config, port).await?;
        }
        Commands::Sign {
            secret,
            params,
            no_parameter,
        } => {
            println!("{}", sign_header(&secret, &params, !no_parameter)?);
        }
    }

    Ok(())
}
