// hopshare: share a directory with link-local peers and fetch theirs over multi-hop routes.

mod config;
mod console;
mod indexer;
mod node;
mod transport;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use hopshare_core::PeerId;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const USAGE: &str = "usage: hopshare <directory of content to share>";

fn main() -> anyhow::Result<()> {
    let mut share_dir: Option<PathBuf> = None;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("hopshare {}", VERSION);
                return Ok(());
            }
            "--help" | "-h" => {
                println!("{USAGE}");
                return Ok(());
            }
            _ if share_dir.is_none() => share_dir = Some(PathBuf::from(&arg)),
            _ => {
                println!("{USAGE}");
                return Ok(());
            }
        }
    }
    let Some(share_dir) = share_dir else {
        println!("{USAGE}");
        return Ok(());
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cfg = config::load();
    let protocol = cfg.protocol();
    let files = indexer::index(&share_dir)?;
    info!(dir = %share_dir.display(), files = files.len(), "sharing directory");

    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(async {
        let transport = transport::Transport::join(cfg.group, cfg.port)
            .with_context(|| format!("join {}:{}", cfg.group, cfg.port))?;
        let id = cfg
            .node_id
            .clone()
            .map(PeerId::new)
            .filter(|id| !id.is_sentinel())
            .unwrap_or_else(PeerId::generate);
        let node = Arc::new(node::Node::new(
            id,
            protocol.clone(),
            cfg.download_dir.clone(),
            transport,
        ));
        indexer::seed(node.state(), files, protocol.chunk_size);

        let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
        let mut runner = tokio::spawn(node.clone().run(stop_rx.clone()));
        tokio::spawn(console::run(node.clone(), stop_tx.clone(), stop_rx.clone()));

        let mut stopped = stop_rx;
        tokio::select! {
            res = shutdown_signal() => res?,
            _ = stopped.changed() => {}
            res = &mut runner => {
                let _ = stop_tx.send(true);
                return res.context("node task")?;
            }
        }
        let _ = stop_tx.send(true);
        runner.await.context("node task")??;
        Ok::<(), anyhow::Error>(())
    });
    // the console may still be parked in a blocking stdin read
    rt.shutdown_timeout(Duration::from_millis(500));
    result
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).context("install SIGTERM handler")?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
