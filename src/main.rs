use anyhow::Context;
use clap::Parser;
use pingora::server::configuration::Opt;
use pingora_core::server::Server;
use resize_server::config::Config;
use resize_server::proxy::ResizeProxy;
use std::path::PathBuf;

/// Resize Server - image transformation proxy built on Cloudflare's Pingora
#[derive(Parser, Debug)]
#[command(name = "resize-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Daemon mode
    #[arg(short = 'd', long)]
    daemon: bool,

    /// Test configuration and exit
    #[arg(long)]
    test: bool,
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("validating configuration")?;
    Ok(config)
}

fn build_server(args: &Args, config: &Config) -> anyhow::Result<Server> {
    std::fs::create_dir_all(&config.cache.directory)
        .with_context(|| format!("creating cache directory {}", config.cache.directory))?;

    let opt = Opt {
        daemon: args.daemon,
        ..Default::default()
    };

    let mut server = Server::new(Some(opt))
        .map_err(|e| anyhow::anyhow!("{}", e))
        .context("creating Pingora server")?;
    server.bootstrap();

    let proxy = ResizeProxy::new(config.clone()).context("initializing proxy")?;

    let mut proxy_service = pingora_proxy::http_proxy_service(&server.configuration, proxy);
    let listen_addr = config.server.listen_address();
    proxy_service.add_tcp(&listen_addr);
    proxy_service.threads = Some(config.server.threads);

    tracing::info!(
        address = %listen_addr,
        threads = config.server.threads,
        "Starting Resize Server"
    );

    server.add_service(proxy_service);
    Ok(server)
}

fn main() {
    let args = Args::parse();

    let config = load_config(&args).unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {:#}", e);
        std::process::exit(1);
    });

    if let Err(e) = resize_server::logging::init_subscriber(&config.logging) {
        eprintln!("Failed to initialize logging subsystem: {}", e);
        std::process::exit(1);
    }

    tracing::info!(
        config_file = ?args.config,
        server_address = %config.server.address,
        server_port = config.server.port,
        convert_command = %config.engine.convert_command,
        cache_directory = %config.cache.directory,
        blob_storages = config.blob_storage.len(),
        "Configuration loaded successfully"
    );

    if args.test {
        println!("Configuration is valid");
        return;
    }

    match build_server(&args, &config) {
        // Blocks until shutdown
        Ok(server) => server.run_forever(),
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "Startup failed");
            std::process::exit(1);
        }
    }
}
