//! Single-shot UDP reachability checks against a Bedrock server

use crate::raknet::{ServerStatus, UnconnectedPing, UnconnectedPong};
use crate::ProbeError;
use log::debug;
use std::net::SocketAddr;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::net::UdpSocket;
use tokio::time::timeout;

/// Wait used by the plain port check.
pub const RAW_PING_TIMEOUT: Duration = Duration::from_millis(2000);
/// Wait used by the status query.
pub const QUERY_TIMEOUT: Duration = Duration::from_millis(3000);

/// Reply to a status query.
#[derive(Debug, Clone)]
pub struct QueryReply {
    pub latency: Duration,
    /// Advertisement text, or the lossy text of the datagram if it was not
    /// a well-formed pong.
    pub advertisement: String,
    pub status: Option<ServerStatus>,
}

impl QueryReply {
    /// Whether the reply looks like it came from a Bedrock server.
    pub fn is_bedrock(&self) -> bool {
        self.advertisement.contains("MCPE")
    }
}

/// Sends one datagram and waits for the first reply. No retries.
#[derive(Debug, Clone)]
pub struct Prober {
    timeout: Duration,
}

impl Prober {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Sends a single `0x01` byte and waits for any answer.
    pub async fn ping_raw(&self, target: SocketAddr) -> Result<Duration, ProbeError> {
        let (_, latency) = self.exchange(target, &[0x01]).await?;
        Ok(latency)
    }

    /// Sends a RakNet unconnected ping and decodes the pong if possible.
    pub async fn query(&self, target: SocketAddr) -> Result<QueryReply, ProbeError> {
        let ping = UnconnectedPing::new(get_timestamp(), rand::random());
        let (datagram, latency) = self.exchange(target, &ping.encode()?).await?;

        let reply = match UnconnectedPong::decode(&datagram) {
            Ok(pong) => QueryReply {
                latency,
                status: ServerStatus::parse(&pong.advertisement),
                advertisement: pong.advertisement,
            },
            Err(e) => {
                debug!("Reply from {} is not a pong: {}", target, e);
                QueryReply {
                    latency,
                    advertisement: String::from_utf8_lossy(&datagram).into_owned(),
                    status: None,
                }
            }
        };

        Ok(reply)
    }

    async fn exchange(
        &self,
        target: SocketAddr,
        payload: &[u8],
    ) -> Result<(Vec<u8>, Duration), ProbeError> {
        let bind_addr = if target.is_ipv4() {
            "0.0.0.0:0"
        } else {
            "[::]:0"
        };
        let socket = UdpSocket::bind(bind_addr).await?;

        let sent_at = Instant::now();
        socket.send_to(payload, target).await?;
        debug!("Sent {} bytes to {}", payload.len(), target);

        let mut buffer = [0u8; 2048];
        let (len, from) = timeout(self.timeout, socket.recv_from(&mut buffer))
            .await
            .map_err(|_| ProbeError::Timeout(self.timeout))??;

        debug!("Received {} bytes from {}", len, from);
        Ok((buffer[..len].to_vec(), sent_at.elapsed()))
    }
}

impl Default for Prober {
    fn default() -> Self {
        Self::new(QUERY_TIMEOUT)
    }
}

// Get current timestamp in milliseconds
fn get_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}
