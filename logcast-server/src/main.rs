use std::path::PathBuf;

use clap::Parser;

use logcast_server::{LogcastServer, ServerConfig};

/// Live log ingestion and streaming server.
#[derive(Parser, Debug)]
#[command(name = "logcast-server", version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind, overrides the config file and LOGCAST_BIND_ADDR
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = match ServerConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{e}");
            std::process::exit(2);
        }
    };
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }

    let result = match LogcastServer::open(config) {
        Ok(server) => server.run().await,
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        log::error!("Server error: {e}");
        std::process::exit(1);
    }
}
