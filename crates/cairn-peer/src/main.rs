//! cairn-peer — interactive peer for the cairn file-sharing network.
//!
//! Control-plane commands go to the registry over one long-lived
//! connection; FETCH opens a direct connection to the owning peer. A
//! data-plane file server runs on its own task the whole time, sharing
//! the control socket's local port so other peers can dial the endpoint
//! the registry hands out.

mod commands;

use std::io::Write as _;
use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use cairn_core::config::{CairnConfig, PeerConfig};
use cairn_services::{fetch, FetchOutcome, FileLibrary, FileServer, RegistryClient};

use commands::Command;

fn print_usage() {
    eprintln!("Usage: cairn-peer <registry-host> <registry-port> <peer-id>");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let [host, port, id] = args.as_slice() else {
        print_usage();
        std::process::exit(1);
    };
    let registry_port: u16 = match port.parse() {
        Ok(p) => p,
        Err(_) => {
            eprintln!("cairn-peer: invalid port '{port}'");
            print_usage();
            std::process::exit(1);
        }
    };
    let peer_id: u32 = match id.parse() {
        Ok(p) => p,
        Err(_) => {
            eprintln!("cairn-peer: invalid peer id '{id}'");
            print_usage();
            std::process::exit(1);
        }
    };

    let config = CairnConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        CairnConfig::default()
    });

    // Data-plane listener first: its port is the one the control
    // connection must be bound to.
    let library = FileLibrary::new(&config.peer.shared_dir);
    let file_server = FileServer::bind(config.peer.data_port, library.clone())
        .await
        .context("failed to bind data-plane listener")?;
    let data_port = file_server.local_port().context("data-plane port")?;
    tracing::info!(
        port = data_port,
        shared = %library.root().display(),
        "file server ready"
    );

    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);
    let server_task = tokio::spawn(file_server.run(shutdown_tx.subscribe()));

    let registry_addr = resolve(host, registry_port)
        .await
        .with_context(|| format!("could not resolve {host}:{registry_port}"))?;
    let mut client = RegistryClient::connect(registry_addr, data_port, peer_id)
        .await
        .with_context(|| format!("could not connect to registry at {registry_addr}"))?;
    println!("Connected to registry at {registry_addr} as peer {peer_id}.");

    run_commands(&mut client, &library, &config.peer).await?;

    let _ = shutdown_tx.send(());
    let _ = server_task.await;
    Ok(())
}

/// Resolve the registry host to an IPv4 endpoint.
async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await
        .context("lookup failed")?
        .find(SocketAddr::is_ipv4)
        .context("no IPv4 address found")
}

/// The interactive loop. Per-command failures are reported and the
/// loop continues; only EXIT or end of input leaves it.
async fn run_commands(
    client: &mut RegistryClient,
    library: &FileLibrary,
    config: &PeerConfig,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        prompt("Enter a command: ")?;
        let Some(line) = lines.next_line().await? else {
            break; // end of input behaves like EXIT
        };
        let command = match Command::parse(&line) {
            Some(c) => c,
            None => {
                if !line.trim().is_empty() {
                    println!("Unknown command: {}", line.trim());
                    println!("Commands: JOIN, PUBLISH, SEARCH, FETCH, EXIT");
                }
                continue;
            }
        };

        match command {
            Command::Exit => break,

            Command::Join => match client.join().await {
                Ok(()) => println!("JOIN request sent."),
                Err(e) => println!("JOIN failed: {e}"),
            },

            Command::Publish => cmd_publish(client, library, config).await,

            Command::Search => {
                let Some(name) = read_filename(&mut lines).await? else {
                    break;
                };
                match client.search(&name).await {
                    Ok(Some(owner)) => println!(
                        "File found at peer {} ({}:{}).",
                        owner.peer_id, owner.addr, owner.port
                    ),
                    Ok(None) => println!("File not indexed by registry."),
                    Err(e) => println!("SEARCH failed: {e}"),
                }
            }

            Command::Fetch => {
                let Some(name) = read_filename(&mut lines).await? else {
                    break;
                };
                cmd_fetch(client, config, &name).await;
            }
        }
    }

    println!("Goodbye.");
    Ok(())
}

async fn cmd_publish(client: &mut RegistryClient, library: &FileLibrary, config: &PeerConfig) {
    let mut names = match library.scan() {
        Ok(n) => n,
        Err(e) => {
            println!("Could not read {}: {e}", library.root().display());
            return;
        }
    };
    if names.is_empty() {
        println!("Nothing to publish in {}.", library.root().display());
        return;
    }
    let cap = config.max_publish_files;
    if names.len() as u32 > cap {
        tracing::warn!(have = names.len(), cap, "truncating publish list");
        names.truncate(cap as usize);
    }
    match client.publish(&names, cap).await {
        Ok(()) => println!("PUBLISH request sent with {} file(s).", names.len()),
        Err(e) => println!("PUBLISH failed: {e}"),
    }
}

/// SEARCH the registry, then pull the file straight from its owner.
async fn cmd_fetch(client: &mut RegistryClient, config: &PeerConfig, name: &str) {
    let owner = match client.search(name).await {
        Ok(Some(o)) => o,
        Ok(None) => {
            println!("File not indexed by registry.");
            return;
        }
        Err(e) => {
            println!("SEARCH failed: {e}");
            return;
        }
    };
    println!(
        "File found at peer {} ({}:{}), fetching...",
        owner.peer_id, owner.addr, owner.port
    );
    match fetch(owner, name, &config.download_dir).await {
        Ok(FetchOutcome::Fetched { path, bytes }) => {
            println!("Saved {} ({bytes} bytes).", path.display());
        }
        Ok(FetchOutcome::NotFound) => println!("Peer no longer has \"{name}\"."),
        Err(e) => println!("FETCH failed: {e}"),
    }
}

/// Second-line filename prompt for SEARCH and FETCH. `None` on EOF.
async fn read_filename(lines: &mut Lines<BufReader<Stdin>>) -> Result<Option<String>> {
    prompt("Enter a file name: ")?;
    Ok(lines.next_line().await?.map(|l| l.trim().to_string()))
}

fn prompt(text: &str) -> Result<()> {
    print!("{text}");
    std::io::stdout().flush().context("stdout")?;
    Ok(())
}
