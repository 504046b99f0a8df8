use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use super::{EchoEngine, EngineContext};
use crate::error::{EchoError, Result};

/// Largest payload a single datagram can carry.
const MAX_DATAGRAM: usize = 65_535;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UdpEchoConfig {
    /// Address the socket binds to.
    pub bind_ip: IpAddr,
}

impl Default for UdpEchoConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        }
    }
}

/// UDP echo workload: one identical reply datagram per received datagram,
/// sent back to the originating address. No per-sender state; each
/// datagram is handled synchronously in the loop, which is fast enough
/// that the next receive is never meaningfully delayed.
pub struct UdpEchoEngine {
    config: UdpEchoConfig,
}

impl UdpEchoEngine {
    pub fn new(config: UdpEchoConfig) -> Self {
        Self { config }
    }
}

impl Default for UdpEchoEngine {
    fn default() -> Self {
        Self::new(UdpEchoConfig::default())
    }
}

#[async_trait]
impl EchoEngine for UdpEchoEngine {
    async fn run(&self, ctx: EngineContext) -> Result<()> {
        let addr = SocketAddr::new(self.config.bind_ip, ctx.port);
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| EchoError::BindFailure {
                port: ctx.port,
                source,
            })?;
        let local = socket.local_addr()?;
        ctx.report_bound(local);
        ctx.sink.log(format!("Listening on {local} (udp)."));
        info!(%local, "udp socket bound");

        let mut buffer = vec![0u8; MAX_DATAGRAM];
        loop {
            let received = tokio::select! {
                _ = ctx.shutdown.cancelled() => {
                    ctx.sink.log("Stopped receiving datagrams.");
                    return Ok(());
                }
                received = socket.recv_from(&mut buffer) => received,
            };
            match received {
                Ok((len, peer)) => match socket.send_to(&buffer[..len], peer).await {
                    Ok(sent) => {
                        ctx.sink.log(format!("Echoed {sent} bytes to {peer}."));
                        debug!(%peer, bytes = sent, "echoed datagram");
                    }
                    // One failed reply does not end the service.
                    Err(err) => {
                        warn!(%peer, "send failed: {err}");
                        ctx.sink.log(format!("Failed to echo to {peer}: {err}."));
                    }
                },
                Err(err) => match ctx.classify_loop_error("receive failed", err) {
                    Some(fatal) => return Err(fatal),
                    None => return Ok(()),
                },
            }
        }
    }

    fn name(&self) -> &str {
        "udp"
    }
}
