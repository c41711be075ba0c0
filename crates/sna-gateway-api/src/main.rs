use anyhow::Result;
use clap::Parser;
use sna_gateway_api::Server;
use sna_gateway_core::GatewaySettings;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "sna-gateway", version, about = "Caching gateway in front of the SNA and DNA analysis services")]
struct Args {
    /// Directory holding default.toml, {env}.toml and local.toml
    #[arg(long, env = "SNA_GATEWAY_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Environment overlay to load
    #[arg(long, env = "APP_ENV")]
    env: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config_dir = args
        .config_dir
        .unwrap_or_else(GatewaySettings::default_config_dir);
    let env_name = args.env.unwrap_or_else(GatewaySettings::default_env);
    let settings = GatewaySettings::load(&config_dir, &env_name)?;

    let level = settings.logging.level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("sna_gateway_api={level},tower_http={level}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Server::new(settings)?.run().await
}
