//! TreeKV - An Event-Driven Key-Value Server Backed by a B-Tree
//!
//! This is the main entry point for the TreeKV server.
//! It parses the command line, sets up logging and runs the listener until
//! Ctrl+C or a client's `shutdown` command.

use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;
use treekv::server::{Server, ServerConfig};
use treekv::storage::StorageEngine;

/// Parse configuration from command-line arguments
fn config_from_args() -> ServerConfig {
    let mut config = ServerConfig::default();
    let args: Vec<String> = std::env::args().collect();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--host" | "-h" => {
                config.host = value_of(&args, i, "--host").to_string();
                i += 2;
            }
            "--port" | "-p" => {
                config.port = value_of(&args, i, "--port").parse().unwrap_or_else(|_| {
                    eprintln!("Error: invalid port number");
                    std::process::exit(1);
                });
                i += 2;
            }
            "--read-buffer" => {
                config.read_buffer_size = parse_size(value_of(&args, i, "--read-buffer"));
                i += 2;
            }
            "--send-buffer" => {
                config.send_buffer_size = parse_size(value_of(&args, i, "--send-buffer"));
                i += 2;
            }
            "--help" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-v" => {
                println!("TreeKV version {}", treekv::VERSION);
                std::process::exit(0);
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_help();
                std::process::exit(1);
            }
        }
    }

    config
}

fn value_of<'a>(args: &'a [String], i: usize, flag: &str) -> &'a str {
    match args.get(i + 1) {
        Some(value) => value,
        None => {
            eprintln!("Error: {} requires a value", flag);
            std::process::exit(1);
        }
    }
}

fn parse_size(value: &str) -> usize {
    value.parse().unwrap_or_else(|_| {
        eprintln!("Error: invalid buffer size: {}", value);
        std::process::exit(1);
    })
}

fn print_help() {
    println!(
        r#"
TreeKV - An Event-Driven Key-Value Server Backed by a B-Tree

USAGE:
    treekv [OPTIONS]

OPTIONS:
    -h, --host <HOST>          Host to bind to (default: 127.0.0.1)
    -p, --port <PORT>          Port to listen on (default: 7878)
        --read-buffer <BYTES>  Per-connection read buffer (default: 16384)
        --send-buffer <BYTES>  Per-connection send buffer (default: 65536)
    -v, --version              Print version information
        --help                 Print this help message

EXAMPLES:
    treekv                         # Start on 127.0.0.1:7878
    treekv --port 7879             # Start on port 7879
    treekv --host 0.0.0.0          # Listen on all interfaces

CONNECTING:
    Any line-based client works:
    $ nc 127.0.0.1 7878
    set name 4
    Ariz
    STORED
    get name
    VALUE name 4
    Ariz
    END
"#
    );
}

fn print_banner(config: &ServerConfig) {
    println!(
        r#"
TreeKV v{} - Event-Driven B-Tree Key-Value Server
──────────────────────────────────────────────────
Server started on {}
Buffers: {} bytes read / {} bytes send per connection
Ready to accept connections.

Use Ctrl+C or send `shutdown` to stop.
"#,
        treekv::VERSION,
        config.bind_address(),
        config.read_buffer_size,
        config.send_buffer_size,
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let config = config_from_args();

    // Set up logging; RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    // Create the storage engine (shared across all connections)
    let storage = Arc::new(StorageEngine::new());
    info!("Storage engine initialized");

    let server = Server::bind(config, storage).await?;
    print_banner(server.config());
    info!("Listening on {}", server.local_addr()?);

    // Graceful shutdown on Ctrl+C
    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received, stopping server...");
    };

    tokio::select! {
        _ = server.run() => {}
        _ = shutdown => {}
    }

    info!("Server shutdown complete");
    Ok(())
}
