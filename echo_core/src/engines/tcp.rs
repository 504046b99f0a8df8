use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::{EchoEngine, EngineContext};
use crate::error::{EchoError, Result};
use crate::events::EventSink;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpEchoConfig {
    /// Address the listener binds to.
    pub bind_ip: IpAddr,
    /// How long in-flight connections may drain after the accept loop exits
    /// before they are force-closed.
    pub drain_grace: Duration,
    /// Per-connection read buffer size.
    pub buffer_size: usize,
}

impl Default for TcpEchoConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            drain_grace: Duration::from_secs(3),
            buffer_size: 4096,
        }
    }
}

/// TCP echo workload: accept connections and reflect every received byte
/// back to its sender, one handler task per connection.
pub struct TcpEchoEngine {
    config: TcpEchoConfig,
}

impl TcpEchoEngine {
    pub fn new(config: TcpEchoConfig) -> Self {
        Self { config }
    }
}

impl Default for TcpEchoEngine {
    fn default() -> Self {
        Self::new(TcpEchoConfig::default())
    }
}

#[async_trait]
impl EchoEngine for TcpEchoEngine {
    async fn run(&self, ctx: EngineContext) -> Result<()> {
        let addr = SocketAddr::new(self.config.bind_ip, ctx.port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| EchoError::BindFailure {
                port: ctx.port,
                source,
            })?;
        let local = listener.local_addr()?;
        ctx.report_bound(local);
        ctx.sink.log(format!("Listening on {local} (tcp)."));
        info!(%local, "tcp listener bound");

        let handlers = TaskTracker::new();
        let force_close = CancellationToken::new();

        let outcome = loop {
            tokio::select! {
                _ = ctx.shutdown.cancelled() => {
                    ctx.sink.log("Stopped accepting connections.");
                    break Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        ctx.sink.log(format!("Client connection from {peer}."));
                        debug!(%peer, "accepted connection");
                        let sink = ctx.sink.clone();
                        let stop = force_close.child_token();
                        let buffer_size = self.config.buffer_size;
                        handlers.spawn(async move {
                            serve_connection(stream, peer, sink, stop, buffer_size).await;
                        });
                    }
                    Err(err) => match ctx.classify_loop_error("accept failed", err) {
                        Some(fatal) => break Err(fatal),
                        None => break Ok(()),
                    },
                },
            }
        };

        // The listener must be gone before the drain so no new peer can
        // slip in while handlers finish.
        drop(listener);

        handlers.close();
        if tokio::time::timeout(self.config.drain_grace, handlers.wait())
            .await
            .is_err()
        {
            warn!("drain grace elapsed, force-closing remaining connections");
            ctx.sink.log("Force-closing remaining connections.");
            force_close.cancel();
            handlers.wait().await;
        }

        outcome
    }

    fn name(&self) -> &str {
        "tcp"
    }
}

enum ConnectionEnd {
    PeerClosed,
    ForceClosed,
    Fault(std::io::Error),
}

/// Echoes one connection until the peer closes, an I/O error occurs, or
/// the task is force-closed. A failure here is contained to this handler;
/// the accept loop never sees it.
async fn serve_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    sink: EventSink,
    stop: CancellationToken,
    buffer_size: usize,
) {
    let mut buffer = vec![0u8; buffer_size];
    let mut total: u64 = 0;

    let end = loop {
        let read = tokio::select! {
            _ = stop.cancelled() => break ConnectionEnd::ForceClosed,
            read = stream.read(&mut buffer) => read,
        };
        match read {
            Ok(0) => break ConnectionEnd::PeerClosed,
            Ok(n) => {
                if let Err(err) = stream.write_all(&buffer[..n]).await {
                    break ConnectionEnd::Fault(err);
                }
                total += n as u64;
                debug!(%peer, bytes = n, "echoed");
            }
            Err(err) => break ConnectionEnd::Fault(err),
        }
    };

    match end {
        ConnectionEnd::PeerClosed => {
            sink.log(format!("Connection from {peer} closed, {total} bytes echoed."));
        }
        ConnectionEnd::ForceClosed => {
            sink.log(format!(
                "Connection from {peer} force-closed, {total} bytes echoed."
            ));
        }
        ConnectionEnd::Fault(err) => {
            let fault = EchoError::ConnectionFault { peer, source: err };
            warn!(%peer, "{fault}");
            sink.log(fault.to_string());
        }
    }
    // The stream drops here, closing this handler's socket.
}
