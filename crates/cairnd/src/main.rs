//! cairnd — the cairn registry daemon.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use anyhow::{Context, Result};

use cairn_core::config::CairnConfig;
use cairn_services::{RegistryServer, RegistrySettings, SessionTable};

fn print_usage() {
    eprintln!("Usage: cairnd [<port>]");
    eprintln!();
    eprintln!("Without a port argument the configured port is used.");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    if let Err(e) = CairnConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = CairnConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        CairnConfig::default()
    });

    let port: u16 = match args.as_slice() {
        [] => config.registry.port,
        [arg] => match arg.parse() {
            Ok(p) => p,
            Err(_) => {
                eprintln!("cairnd: invalid port '{arg}'");
                print_usage();
                std::process::exit(1);
            }
        },
        _ => {
            print_usage();
            std::process::exit(1);
        }
    };

    let table = SessionTable::new(config.registry.max_peers);
    let server = RegistryServer::bind(
        SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port),
        table.clone(),
        RegistrySettings::from(&config.registry),
    )
    .await
    .with_context(|| format!("failed to bind port {port}"))?;

    tracing::info!(
        addr = %server.local_addr().context("local addr")?,
        max_peers = config.registry.max_peers,
        max_files = config.registry.max_files_per_peer,
        "registry listening"
    );

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // Periodic table snapshot in the logs.
    let snapshot = {
        let table = table.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            loop {
                interval.tick().await;
                tracing::debug!(peers = table.len().await, "session table snapshot");
            }
        })
    };

    let result = server.run(shutdown_tx.subscribe()).await;
    snapshot.abort();
    result.context("registry server failed")
}
