//! # Bedrock Reachability Probe
//!
//! Answers one question: does anything answer on the server's UDP port, and
//! if so, is it a Bedrock server?
//!
//! ## Checks
//!
//! ### Raw ping
//! A single `0x01` byte is sent and any datagram coming back counts as a
//! success. This is what the port check uses after it has found the host
//! port Docker mapped for the container.
//!
//! ### Status query
//! A RakNet unconnected ping is sent. A Bedrock server answers with an
//! unconnected pong whose trailing string advertises the edition, MOTD,
//! protocol and game version, player counts and level name. Replies that do
//! not decode as a pong are still returned so the caller can tell "something
//! answered" apart from "nothing answered".
//!
//! Both checks wait a bounded time for the first reply and never retry.
//!
//! ## Module Organization
//!
//! - `raknet`: unconnected ping/pong layout and advertisement parsing
//! - `network`: the [`Prober`] that performs a single exchange over UDP
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use probe::Prober;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let prober = Prober::new(Duration::from_secs(3));
//!     let reply = prober.query("127.0.0.1:19132".parse()?).await?;
//!
//!     if let Some(status) = reply.status {
//!         println!("{} ({} / {} players)", status.motd, status.players_online, status.max_players);
//!     }
//!     Ok(())
//! }
//! ```

pub mod network;
pub mod raknet;

pub use network::{Prober, QueryReply, QUERY_TIMEOUT, RAW_PING_TIMEOUT};
pub use raknet::ServerStatus;

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("no UDP response within {0:?}")]
    Timeout(Duration),

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("packet encoding error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("malformed reply: {0}")]
    Malformed(String),
}
