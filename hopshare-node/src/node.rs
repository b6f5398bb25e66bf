//! A running node: shared state, transport, and the receive and keepalive workers.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use hopshare_core::{
    AssembledFile, Dispatcher, Keepalive, NodeState, OutboundAction, PeerId, ProtocolConfig,
};
use tokio::sync::watch;
use tracing::{debug, info, info_span, warn, Span};

use crate::transport::{recv_buffer, Transport};

/// Prefix given to downloaded files in the download directory.
pub const DOWNLOAD_PREFIX: &str = "transfered_";

pub struct Node {
    state: Arc<NodeState>,
    dispatcher: Dispatcher,
    transport: Transport,
    protocol: ProtocolConfig,
    download_dir: PathBuf,
    span: Span,
}

impl Node {
    pub fn new(
        id: PeerId,
        protocol: ProtocolConfig,
        download_dir: PathBuf,
        transport: Transport,
    ) -> Self {
        let span = info_span!("node", id = %id);
        let state = Arc::new(NodeState::new(id, protocol.max_strikes));
        Self {
            dispatcher: Dispatcher::new(state.clone(), span.clone()),
            state,
            transport,
            protocol,
            download_dir,
            span,
        }
    }

    pub fn state(&self) -> &Arc<NodeState> {
        &self.state
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Announce ourselves, then run both workers until `shutdown` fires or the transport
    /// closes. The keepalive worker never outlives the receive worker.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        {
            let _guard = self.span.enter();
            info!(version = %self.state.table_version(), "node starting");
        }
        let hello = self.dispatcher.hello(PeerId::multicast());
        self.transport
            .send(&hello)
            .await
            .context("initial announcement")?;

        let (halt, halted) = watch::channel(false);
        let keepalive = tokio::spawn(keepalive_loop(self.clone(), halted));
        receive_loop(self.clone(), shutdown).await;
        let _ = halt.send(true);
        keepalive.await.context("keepalive worker")?;

        self.log_statistics();
        Ok(())
    }

    /// Carry out what the core asked for. Failures are logged, never fatal.
    pub async fn perform(&self, actions: Vec<OutboundAction>) {
        for action in actions {
            match action {
                OutboundAction::SendMessage(msg) => {
                    if let Err(e) = self.transport.send(&msg).await {
                        warn!(parent: &self.span, kind = ?msg.kind(), error = %e, "send failed");
                    }
                }
                OutboundAction::DownloadComplete(file) => match self.save(&file).await {
                    Ok(path) => {
                        info!(parent: &self.span, path = %path.display(), "download saved")
                    }
                    Err(e) => {
                        warn!(parent: &self.span, name = %file.name, error = %e, "saving download failed")
                    }
                },
                OutboundAction::RequestFailed {
                    source,
                    code,
                    reason,
                } => {
                    warn!(parent: &self.span, %source, ?code, %reason, "content request failed");
                }
            }
        }
    }

    async fn save(&self, file: &AssembledFile) -> anyhow::Result<PathBuf> {
        let path = download_path(&self.download_dir, &file.name)?;
        tokio::fs::write(&path, &file.bytes)
            .await
            .with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }

    fn log_statistics(&self) {
        let _guard = self.span.enter();
        info!(
            peers = self.state.known_peers().len(),
            version = %self.state.table_version(),
            "node stopped; routing table:\n{}",
            self.state.routing_summary()
        );
    }
}

/// Where a download called `name` is written. The name comes from a remote peer, so only a
/// bare file name is accepted; directory parts, `..` and empty names are refused.
fn download_path(dir: &Path, name: &str) -> anyhow::Result<PathBuf> {
    let base = Path::new(name)
        .file_name()
        .filter(|base| base.len() == name.len())
        .with_context(|| format!("refusing download name {name:?}"))?;
    let mut file = std::ffi::OsString::from(DOWNLOAD_PREFIX);
    file.push(base);
    Ok(dir.join(file))
}

/// Receive errors a datagram socket can report without being unusable, such as ICMP
/// feedback for an earlier send.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}

async fn receive_loop(node: Arc<Node>, mut shutdown: watch::Receiver<bool>) {
    let mut buf = recv_buffer();
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            res = node.transport.recv(&mut buf) => match res {
                Ok(n) => {
                    let actions = node.dispatcher.on_datagram(&buf[..n]);
                    node.perform(actions).await;
                }
                Err(e) if is_transient(&e) => {
                    debug!(parent: &node.span, error = %e, "receive error; continuing");
                }
                Err(e) => {
                    warn!(parent: &node.span, error = %e, "transport closed");
                    break;
                }
            },
        }
    }
}

async fn keepalive_loop(node: Arc<Node>, mut shutdown: watch::Receiver<bool>) {
    let mut keepalive = Keepalive::new(node.state.clone(), &node.protocol, node.span.clone());
    loop {
        node.perform(keepalive.begin_round()).await;
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(node.protocol.probe_interval) => {}
        }
        node.perform(keepalive.end_round()).await;
    }
}
