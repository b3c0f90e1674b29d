// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 xmsg developers

//! xMsg node server
//!
//! Runs the three services an xMsg node offers in one process:
//! - the proxy broker actors publish and subscribe through
//! - the registrar actors register with and query
//! - the name server remote clients handshake with (direct TCP or multicast)
//!
//! # Usage
//!
//! ```bash
//! # Defaults: proxy 7771, registrar 8888, name server 45000
//! xmsg-server
//!
//! # Mirror registrations to a front-end registrar
//! xmsg-server --frontend frontend.lab:8888
//!
//! # Password-protected name server without multicast
//! xmsg-server --password secret --no-multicast
//!
//! # From a JSON file
//! xmsg-server --config node.json
//! ```

use clap::Parser;
use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use xmsg::config::TransportSettings;
use xmsg::{
    Context, NameServer, NameServerSettings, Proxy, ProxyAddress, RegAddress, Registrar,
    RegistrarSettings,
};

mod config;

pub use config::{ConfigError, ServerConfig};

type BoxError = Box<dyn Error + Send + Sync>;

/// xMsg node: proxy, registrar and name server
#[derive(Parser, Debug)]
#[command(name = "xmsg-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Bind address (0.0.0.0 for all interfaces)
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// Proxy publish port (subscribe and control ports follow it)
    #[arg(long, default_value_t = xmsg::config::DEFAULT_PROXY_PORT)]
    proxy_port: u16,

    /// Registrar port
    #[arg(long, default_value_t = xmsg::config::DEFAULT_REGISTRAR_PORT)]
    registrar_port: u16,

    /// Front-end registrar to mirror registrations to (host[:port])
    #[arg(long)]
    frontend: Option<String>,

    /// Front-end synchronisation interval in seconds
    #[arg(long, default_value = "5")]
    sync_interval: u64,

    /// Do not run the name server
    #[arg(long)]
    no_name_server: bool,

    /// Name-server TCP port
    #[arg(long, default_value_t = xmsg::config::DEFAULT_NAME_SERVER_TCP_PORT)]
    ns_port: u16,

    /// Name-server UDP port
    #[arg(long, default_value_t = xmsg::config::DEFAULT_NAME_SERVER_UDP_PORT)]
    ns_udp_port: u16,

    /// Do not answer multicast discovery
    #[arg(long)]
    no_multicast: bool,

    /// Password clients must present to the name server
    #[arg(long)]
    password: Option<String>,

    /// Port advertised by the name server (default: proxy port)
    #[arg(long)]
    domain_port: Option<u16>,

    /// Configuration file (JSON format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the effective configuration to this file and exit
    #[arg(long)]
    dump_config: Option<PathBuf>,

    /// Log filter (trace, debug, info, warn, error or a full directive)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn to_config(&self) -> Result<ServerConfig, BoxError> {
        let (frontend_host, frontend_port) = match &self.frontend {
            Some(frontend) => {
                let (host, port) = parse_frontend(frontend)?;
                (Some(host), port)
            }
            None => (None, xmsg::config::DEFAULT_REGISTRAR_PORT),
        };
        Ok(ServerConfig {
            bind_address: self.bind.parse()?,
            proxy_port: self.proxy_port,
            registrar_port: self.registrar_port,
            frontend_host,
            frontend_port,
            sync_interval_secs: self.sync_interval,
            name_server: !self.no_name_server,
            ns_tcp_port: self.ns_port,
            ns_udp_port: self.ns_udp_port,
            multicast: !self.no_multicast,
            password: self.password.clone(),
            domain_port: self.domain_port,
            ..ServerConfig::default()
        })
    }
}

/// Split `host[:port]`, defaulting the port to the registrar's.
fn parse_frontend(value: &str) -> Result<(String, u16), ConfigError> {
    let value = value.trim();
    let (host, port) = match value.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse()
                .map_err(|_| ConfigError::InvalidValue(format!("bad front-end port in {:?}", value)))?;
            (host, port)
        }
        None => (value, xmsg::config::DEFAULT_REGISTRAR_PORT),
    };
    if host.is_empty() {
        return Err(ConfigError::InvalidValue("front-end host is empty".into()));
    }
    Ok((host.to_string(), port))
}

/// The running services, stopped in reverse start order.
struct Node {
    name_server: Option<NameServer>,
    registrar: Registrar,
    proxy: Proxy,
    ctx: Arc<Context>,
}

impl Node {
    fn start(config: &ServerConfig) -> Result<Self, BoxError> {
        let ctx = Context::with_settings(TransportSettings {
            max_message_size: config.max_message_size,
            ..TransportSettings::default()
        });

        let proxy = Proxy::start(
            &ctx,
            ProxyAddress::new(config.bind_address.to_string(), config.proxy_port),
        )?;
        info!("Proxy on {}", proxy.address());

        let frontend = config
            .frontend_host
            .as_ref()
            .map(|host| RegAddress::new(host.clone(), config.frontend_port));
        let registrar = Registrar::start(
            &ctx,
            SocketAddr::new(config.bind_address, config.registrar_port),
            RegistrarSettings {
                sync_interval: config.sync_interval(),
                ..RegistrarSettings::default()
            },
            frontend,
        )?;
        info!("Registrar on {}", registrar.local_addr());

        let name_server = if config.name_server {
            let advertised = match config.domain_port {
                Some(port) => port,
                None => proxy.address().pub_port(),
            };
            let server = NameServer::start(NameServerSettings {
                tcp_port: config.ns_tcp_port,
                udp_port: config.ns_udp_port,
                multicast: config.multicast,
                multicast_addr: config.multicast_addr,
                password: config.password.clone(),
                domain_port: advertised,
                ..NameServerSettings::default()
            })?;
            info!("Name server on {}", server.local_addr());
            if let Some(udp) = server.multicast_addr() {
                info!("Multicast responder on {} ({})", udp, config.multicast_addr);
            }
            Some(server)
        } else {
            None
        };

        Ok(Self {
            name_server,
            registrar,
            proxy,
            ctx,
        })
    }

    fn stop(mut self) {
        if let Some(mut server) = self.name_server.take() {
            server.stop();
        }
        self.registrar.stop();
        self.proxy.stop();
        self.ctx.terminate();
    }
}

fn main() -> Result<(), BoxError> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init()?;

    let config = if let Some(config_path) = &args.config {
        info!("Loading config from {:?}", config_path);
        ServerConfig::from_file(config_path)?
    } else {
        args.to_config()?
    };
    config.validate()?;

    if let Some(path) = &args.dump_config {
        config.to_file(path)?;
        info!("Configuration written to {:?}", path);
        return Ok(());
    }

    info!("+----------------------------------------------------+");
    info!("|          xMsg node server v{:24}|", env!("CARGO_PKG_VERSION"));
    info!("+----------------------------------------------------+");
    info!("|  Bind:      {:38} |", config.bind_address);
    info!("|  Proxy:     {:38} |", config.proxy_port);
    info!("|  Registrar: {:38} |", config.registrar_port);
    info!(
        "|  Front-end: {:38} |",
        config
            .frontend_host
            .as_ref()
            .map_or_else(|| "none".to_string(), |h| format!("{}:{}", h, config.frontend_port))
    );
    info!(
        "|  Names:     {:38} |",
        if config.name_server {
            format!("tcp {} / udp {}", config.ns_tcp_port, config.ns_udp_port)
        } else {
            "disabled".to_string()
        }
    );
    info!("+----------------------------------------------------+");

    let node = match Node::start(&config) {
        Ok(node) => node,
        Err(e) => {
            error!("Startup failed: {}", e);
            return Err(e);
        }
    };

    let (stop_tx, stop_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        info!("Received Ctrl+C, shutting down...");
        let _ = stop_tx.send(());
    })?;
    let _ = stop_rx.recv();

    node.stop();
    info!("xMsg node stopped");
    Ok(())
}
