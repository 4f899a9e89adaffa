//! Upstream reachability probing.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tracing::debug;

use crate::GatewayError;

/// Datagram sent by [`UdpProbe`]
pub const PROBE_PAYLOAD: &[u8] = b"ntn-bridge-probe";

/// Checks whether an upstream endpoint is reachable
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// Probe `address:port`, returning the elapsed time on success
    async fn probe(&self, address: &str, port: u16) -> Result<Duration, GatewayError>;
}

/// Connected-UDP probe.
///
/// Sends one datagram and waits briefly for an answer. An ICMP port-unreachable
/// surfaces as `ConnectionRefused` on the following receive and fails the probe;
/// silence is treated as reachable since the endpoint need not reply.
#[derive(Debug, Clone, Copy)]
pub struct UdpProbe {
    timeout: Duration,
}

impl Default for UdpProbe {
    fn default() -> Self {
        Self::new(Duration::from_millis(800))
    }
}

impl UdpProbe {
    /// Probe bounded by `timeout`
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Overall probe timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn exchange(&self, endpoint: &str) -> Result<(), std::io::Error> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(endpoint).await?;
        socket.send(PROBE_PAYLOAD).await?;

        let mut buf = [0u8; 64];
        match tokio::time::timeout(self.timeout / 4, socket.recv(&mut buf)).await {
            Ok(Ok(_)) | Err(_) => Ok(()),
            Ok(Err(e)) => Err(e),
        }
    }
}

#[async_trait]
impl ReachabilityProbe for UdpProbe {
    async fn probe(&self, address: &str, port: u16) -> Result<Duration, GatewayError> {
        let endpoint = format!("{}:{}", address, port);
        let started = Instant::now();

        let failure = |reason: String| GatewayError::ProbeFailure {
            endpoint: endpoint.clone(),
            reason,
        };

        match tokio::time::timeout(self.timeout, self.exchange(&endpoint)).await {
            Ok(Ok(())) => {
                let elapsed = started.elapsed();
                debug!("Probe {} ok in {:?}", endpoint, elapsed);
                Ok(elapsed)
            }
            Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => {
                Err(failure("connection refused".to_string()))
            }
            Ok(Err(e)) => Err(failure(e.to_string())),
            Err(_) => Err(failure(format!("timed out after {:?}", self.timeout))),
        }
    }
}
