//! Orange RPC: remote call server
//!
//! Exposes a small set of built-in objects over the Orange envelope protocol
//! on a WebSocket endpoint, and rebroadcasts events posted by local processes
//! to a Unix datagram socket.
//!
//! Usage:
//!   orange-rpc                                   # Default port 5303, 4 workers
//!   orange-rpc --port 8080 --workers 8           # Custom port and pool size
//!   orange-rpc --emit link.up '{"iface":"eth0"}' # Post an event to a running server

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use orange_server::{
    CallError, OrangeRpc, RpcConfig, Service, ServiceRouter, UnixEventSource, post_event,
    router::CallResult,
};
use orange_transport::{TransportConfig, TransportServer};
use serde_json::{Map, Value, json};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "orange-rpc", about = "Orange RPC Server")]
struct Cli {
    /// Port to listen on (0 for OS-assigned)
    #[arg(long, default_value = "5303")]
    port: u16,

    /// Hostname to bind to
    #[arg(long, default_value = "127.0.0.1")]
    hostname: String,

    /// Number of request workers
    #[arg(long, default_value = "4")]
    workers: usize,

    /// Receive timeout per worker iteration, in milliseconds
    #[arg(long, default_value = "1000")]
    recv_timeout_ms: u64,

    /// Time after which a running call is reported as possibly hung, in milliseconds
    #[arg(long, default_value = "10000")]
    call_timeout_ms: u64,

    /// Maximum concurrent connections
    #[arg(long, default_value = "32")]
    max_connections: usize,

    /// Enable permissive CORS on the HTTP endpoints
    #[arg(long)]
    cors: bool,

    /// Unix datagram socket local processes post events to
    #[arg(long, default_value = "/tmp/orange-rpc.events")]
    event_socket: PathBuf,

    /// Post one event to a running server and exit
    #[arg(long, num_args = 2, value_names = ["NAME", "PAYLOAD"])]
    emit: Option<Vec<String>>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    /// Write logs to a file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

/// Built-in `system` object.
struct SystemService {
    started: Instant,
    workers: usize,
}

impl SystemService {
    fn new(workers: usize) -> Self {
        Self {
            started: Instant::now(),
            workers,
        }
    }
}

impl Service for SystemService {
    fn object(&self) -> &str {
        "system"
    }

    fn methods(&self) -> Vec<String> {
        vec!["info".into(), "echo".into()]
    }

    async fn call(&self, method: &str, args: &Map<String, Value>) -> CallResult {
        match method {
            "info" => Ok(json!({
                "version": env!("CARGO_PKG_VERSION"),
                "uptime": self.started.elapsed().as_secs(),
                "workers": self.workers,
            })),
            "echo" => Ok(Value::Object(args.clone())),
            _ => Err(CallError::not_found(self.object(), method)),
        }
    }
}

fn init_tracing(cli: &Cli) {
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    if let Some(ref log_path) = cli.log_file {
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let file = match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
        {
            Ok(file) => file,
            Err(e) => {
                eprintln!("Failed to open log file {}: {e}", log_path.display());
                std::process::exit(1);
            }
        };

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .init();

        eprintln!("Logging to {}", log_path.display());
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn emit(socket: &Path, args: &[String]) {
    let [name, payload] = args else {
        eprintln!("--emit takes NAME and PAYLOAD");
        std::process::exit(2);
    };
    // Payloads that are not JSON are sent as plain strings.
    let payload = serde_json::from_str(payload).unwrap_or_else(|_| Value::String(payload.clone()));

    if let Err(e) = post_event(socket, name, payload).await {
        eprintln!("Failed to post event to {}: {e}", socket.display());
        std::process::exit(1);
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Some(ref args) = cli.emit {
        emit(&cli.event_socket, args).await;
        return;
    }

    init_tracing(&cli);

    let transport_config = TransportConfig {
        port: cli.port,
        hostname: cli.hostname.clone(),
        enable_cors: cli.cors,
        max_connections: Some(cli.max_connections),
    };

    let mut transport = match TransportServer::start(transport_config).await {
        Ok(t) => t,
        Err(e) => {
            error!("Failed to start transport: {e}");
            std::process::exit(1);
        }
    };

    let config = RpcConfig::new(Duration::from_millis(cli.recv_timeout_ms), cli.workers)
        .with_call_timeout(Duration::from_millis(cli.call_timeout_ms));

    let mut router = ServiceRouter::new();
    router.register_service(SystemService::new(config.worker_count()));

    let objects: Vec<String> = router.objects().into_iter().map(String::from).collect();

    let rpc = OrangeRpc::start_with_events(
        config,
        Arc::new(transport.hub().clone()),
        Arc::new(router),
        UnixEventSource::new(&cli.event_socket),
    );

    println!();
    println!("  Orange RPC Server");
    println!();
    println!("  WebSocket endpoint:  ws://{}:{}/ws", cli.hostname, transport.port());
    println!("  Workers:             {}", rpc.worker_count());
    println!("  Objects:             {}", objects.join(", "));
    println!("  Event socket:        {}", cli.event_socket.display());
    println!();
    println!("  Press Ctrl+C to stop.");
    println!();

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to wait for Ctrl+C: {e}");
    }

    println!();
    println!("  Shutting down...");
    rpc.shutdown().await;
    transport.stop().await;
    println!("  Server stopped.");
}
