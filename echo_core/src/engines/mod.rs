pub mod tcp;
pub mod udp;

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::{EchoError, Result};
use crate::events::EventSink;

pub use tcp::{TcpEchoConfig, TcpEchoEngine};
pub use udp::{UdpEchoConfig, UdpEchoEngine};

/// Core trait for the echo workloads driven by a task lifecycle.
#[async_trait]
pub trait EchoEngine: Send + Sync {
    /// Runs the engine to completion: bind, serve until a stop request or a
    /// fatal error, release the socket before returning.
    async fn run(&self, ctx: EngineContext) -> Result<()>;

    /// Transport name used in logs.
    fn name(&self) -> &str;
}

pub type DynEngine = Arc<dyn EchoEngine>;

/// Everything an engine needs from the task that runs it.
#[derive(Clone)]
pub struct EngineContext {
    /// Requested port; 0 binds an ephemeral port.
    pub port: u16,
    pub sink: EventSink,
    /// Cancelled when a stop was requested.
    pub shutdown: CancellationToken,
    bound: Arc<watch::Sender<Option<SocketAddr>>>,
}

impl EngineContext {
    pub(crate) fn new(
        port: u16,
        sink: EventSink,
        shutdown: CancellationToken,
        bound: Arc<watch::Sender<Option<SocketAddr>>>,
    ) -> Self {
        Self {
            port,
            sink,
            shutdown,
            bound,
        }
    }

    /// Publishes the address the engine actually bound, meaningful when the
    /// requested port was 0.
    pub fn report_bound(&self, addr: SocketAddr) {
        self.bound.send_replace(Some(addr));
    }

    /// Maps a failed accept/receive to the task outcome: after a stop
    /// request an unblocked socket is normal termination, otherwise the
    /// failure is its own distinct terminal condition.
    pub fn classify_loop_error(&self, what: &str, err: std::io::Error) -> Option<EchoError> {
        if self.shutdown.is_cancelled() {
            None
        } else {
            Some(EchoError::UnexpectedStop(format!("{what}: {err}")))
        }
    }
}

/// Which echo workload a task runs. One engine instance serves per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Tcp,
    Udp,
}

impl Transport {
    /// Default-configured engine for this transport.
    pub fn engine(self) -> DynEngine {
        match self {
            Transport::Tcp => Arc::new(TcpEchoEngine::default()),
            Transport::Udp => Arc::new(UdpEchoEngine::default()),
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Tcp => write!(f, "tcp"),
            Transport::Udp => write!(f, "udp"),
        }
    }
}

impl FromStr for Transport {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Transport::Tcp),
            "udp" => Ok(Transport::Udp),
            other => Err(format!("unknown transport '{other}', expected tcp or udp")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events;

    fn context(cancelled: bool) -> EngineContext {
        let (sink, _stream) = events::channel(16);
        let shutdown = CancellationToken::new();
        if cancelled {
            shutdown.cancel();
        }
        EngineContext::new(0, sink, shutdown, Arc::new(watch::channel(None).0))
    }

    #[test]
    fn test_loop_error_after_stop_is_normal_termination() {
        let ctx = context(true);
        let err = std::io::Error::new(std::io::ErrorKind::Other, "socket closed");
        assert!(ctx.classify_loop_error("receive failed", err).is_none());
    }

    #[test]
    fn test_loop_error_without_stop_is_unexpected() {
        let ctx = context(false);
        let err = std::io::Error::new(std::io::ErrorKind::Other, "socket closed");
        match ctx.classify_loop_error("receive failed", err) {
            Some(EchoError::UnexpectedStop(text)) => {
                assert!(text.contains("receive failed"));
                assert!(text.contains("socket closed"));
            }
            other => panic!("expected UnexpectedStop, got {other:?}"),
        }
    }

    #[test]
    fn test_transport_round_trips_through_str() {
        assert_eq!("tcp".parse::<Transport>().unwrap(), Transport::Tcp);
        assert_eq!("UDP".parse::<Transport>().unwrap(), Transport::Udp);
        assert!("icmp".parse::<Transport>().is_err());
        assert_eq!(Transport::Tcp.to_string(), "tcp");
    }
}
