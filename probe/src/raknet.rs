//! RakNet offline messages used to query a Bedrock server's status.
//!
//! Only the unconnected ping/pong pair is implemented. Both share a fixed
//! big-endian header layout which is (de)serialized with bincode configured
//! for fixed-width integers; the variable-length advertisement string that
//! trails a pong is read by hand.

use crate::ProbeError;
use bincode::Options;
use serde::{Deserialize, Serialize};
use std::io::Read;

pub const UNCONNECTED_PING: u8 = 0x01;
pub const UNCONNECTED_PONG: u8 = 0x1c;

/// Magic sequence that marks RakNet offline messages.
pub const OFFLINE_MAGIC: [u8; 16] = [
    0x00, 0xff, 0xff, 0x00, 0xfe, 0xfe, 0xfe, 0xfe, 0xfd, 0xfd, 0xfd, 0xfd, 0x12, 0x34, 0x56, 0x78,
];

fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_big_endian()
        .with_fixint_encoding()
        .allow_trailing_bytes()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnconnectedPing {
    pub id: u8,
    pub time: u64,
    pub magic: [u8; 16],
    pub client_guid: u64,
}

impl UnconnectedPing {
    pub fn new(time: u64, client_guid: u64) -> Self {
        Self {
            id: UNCONNECTED_PING,
            time,
            magic: OFFLINE_MAGIC,
            client_guid,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProbeError> {
        Ok(codec().serialize(self)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct PongHeader {
    id: u8,
    time: u64,
    server_guid: u64,
    magic: [u8; 16],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnconnectedPong {
    pub time: u64,
    pub server_guid: u64,
    pub advertisement: String,
}

impl UnconnectedPong {
    pub fn decode(datagram: &[u8]) -> Result<Self, ProbeError> {
        let mut reader = datagram;
        let header: PongHeader = codec().deserialize_from(&mut reader)?;

        if header.id != UNCONNECTED_PONG {
            return Err(ProbeError::Malformed(format!(
                "unexpected packet id 0x{:02x}",
                header.id
            )));
        }
        if header.magic != OFFLINE_MAGIC {
            return Err(ProbeError::Malformed("offline magic mismatch".to_string()));
        }

        let len: u16 = codec().deserialize_from(&mut reader)?;
        let mut text = vec![0u8; len as usize];
        reader
            .read_exact(&mut text)
            .map_err(|_| ProbeError::Malformed("advertisement truncated".to_string()))?;

        Ok(Self {
            time: header.time,
            server_guid: header.server_guid,
            advertisement: String::from_utf8_lossy(&text).into_owned(),
        })
    }

    #[cfg(test)]
    pub(crate) fn encode(&self) -> Vec<u8> {
        let header = PongHeader {
            id: UNCONNECTED_PONG,
            time: self.time,
            server_guid: self.server_guid,
            magic: OFFLINE_MAGIC,
        };
        let mut out = codec().serialize(&header).unwrap();
        out.extend_from_slice(&(self.advertisement.len() as u16).to_be_bytes());
        out.extend_from_slice(self.advertisement.as_bytes());
        out
    }
}

/// Parsed `MCPE;motd;protocol;version;online;max;server_id;level;mode;...`
/// advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStatus {
    pub edition: String,
    pub motd: String,
    pub protocol: u32,
    pub version: String,
    pub players_online: u32,
    pub max_players: u32,
    pub server_id: Option<String>,
    pub level_name: Option<String>,
    pub game_mode: Option<String>,
}

impl ServerStatus {
    pub fn parse(advertisement: &str) -> Option<Self> {
        let fields: Vec<&str> = advertisement.split(';').collect();
        if fields.len() < 6 || !fields[0].starts_with("MC") {
            return None;
        }

        let optional = |index: usize| {
            fields
                .get(index)
                .filter(|value| !value.is_empty())
                .map(|value| value.to_string())
        };

        Some(Self {
            edition: fields[0].to_string(),
            motd: fields[1].to_string(),
            protocol: fields[2].parse().ok()?,
            version: fields[3].to_string(),
            players_online: fields[4].parse().ok()?,
            max_players: fields[5].parse().ok()?,
            server_id: optional(6),
            level_name: optional(7),
            game_mode: optional(8),
        })
    }
}
