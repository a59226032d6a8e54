use std::path::PathBuf;
use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use passport_photo::ServiceCfg;

#[derive(Debug, Parser)]
#[command(name = "passport-photo")]
#[command(about = "Upload a photo, get a preview, download a passport-size JPEG")]
struct Cli {
    /// YAML config file; unset keys fall back to built-in defaults.
    #[arg(long, env = "PHOTO_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on, overrides config and PHOTO_BIND.
    #[arg(long)]
    bind: Option<String>,

    #[arg(long)]
    upload_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "passport_photo=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut cfg = match &cli.config {
        Some(path) => ServiceCfg::load(path).await?,
        None => ServiceCfg::default(),
    };
    cfg.apply_env()?;
    if let Some(bind) = cli.bind { cfg.bind = bind; }
    if let Some(dir) = cli.upload_dir { cfg.upload_dir = dir; }

    passport_photo::serve(cfg).await
}
