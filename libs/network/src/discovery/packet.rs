//! UDP discovery packets
//!
//! ```text
//! offset 0   4     5          8
//!        ┌───┬─────┬──────────┬──────────────────────────┐
//!        │TCF2│code │ reserved │ payload (NUL-terminated) │
//!        └───┴─────┴──────────┴──────────────────────────┘
//! ```
//!
//! | code | packet          | payload                      |
//! |------|-----------------|------------------------------|
//! | 1    | `REQ_INFO`      | empty                        |
//! | 2    | `PEER_INFO`     | `key=value\0` per attribute  |
//! | 3    | `REQ_SLAVES`    | empty                        |
//! | 4    | `SLAVES_INFO`   | `<ms>:<port>:<host>\0` each  |
//! | 5    | `PEERS_REMOVED` | `<id>\0` each                |

use crate::error::DiscoveryError;
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::BTreeMap;

pub const MAGIC: &[u8; 4] = b"TCF2";
pub const HEADER_LEN: usize = 8;

pub mod codes {
    pub const REQ_INFO: u8 = 1;
    pub const PEER_INFO: u8 = 2;
    pub const REQ_SLAVES: u8 = 3;
    pub const SLAVES_INFO: u8 = 4;
    pub const PEERS_REMOVED: u8 = 5;
}

/// One agent bound to an ephemeral port on a host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlaveEntry {
    /// When the slave was last heard from, in clock milliseconds
    pub timestamp_ms: u64,
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryPacket {
    RequestInfo,
    PeerInfo(BTreeMap<String, String>),
    RequestSlaves,
    SlavesInfo(Vec<SlaveEntry>),
    PeersRemoved(Vec<String>),
}

impl DiscoveryPacket {
    pub fn code(&self) -> u8 {
        match self {
            Self::RequestInfo => codes::REQ_INFO,
            Self::PeerInfo(_) => codes::PEER_INFO,
            Self::RequestSlaves => codes::REQ_SLAVES,
            Self::SlavesInfo(_) => codes::SLAVES_INFO,
            Self::PeersRemoved(_) => codes::PEERS_REMOVED,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + 64);
        buf.put_slice(MAGIC);
        buf.put_u8(self.code());
        buf.put_slice(&[0, 0, 0]);

        match self {
            Self::RequestInfo | Self::RequestSlaves => {}
            Self::PeerInfo(attributes) => {
                for (key, value) in attributes {
                    buf.put_slice(key.as_bytes());
                    buf.put_u8(b'=');
                    buf.put_slice(value.as_bytes());
                    buf.put_u8(0);
                }
            }
            Self::SlavesInfo(slaves) => {
                for slave in slaves {
                    buf.put_slice(format!("{}:{}:{}", slave.timestamp_ms, slave.port, slave.host).as_bytes());
                    buf.put_u8(0);
                }
            }
            Self::PeersRemoved(ids) => {
                for id in ids {
                    buf.put_slice(id.as_bytes());
                    buf.put_u8(0);
                }
            }
        }
        buf.freeze()
    }

    pub fn decode(data: &[u8]) -> Result<Self, DiscoveryError> {
        if data.len() < HEADER_LEN {
            return Err(DiscoveryError::malformed(format!(
                "{} bytes is shorter than the header",
                data.len()
            )));
        }
        if &data[..4] != MAGIC {
            return Err(DiscoveryError::malformed("bad magic"));
        }
        let code = data[4];
        let payload = &data[HEADER_LEN..];

        match code {
            codes::REQ_INFO => Ok(Self::RequestInfo),
            codes::REQ_SLAVES => Ok(Self::RequestSlaves),
            codes::PEER_INFO => {
                let mut attributes = BTreeMap::new();
                for entry in entries(payload)? {
                    let (key, value) = entry
                        .split_once('=')
                        .ok_or_else(|| DiscoveryError::malformed(format!("attribute without '=': {entry:?}")))?;
                    attributes.insert(key.to_string(), value.to_string());
                }
                Ok(Self::PeerInfo(attributes))
            }
            codes::SLAVES_INFO => entries(payload)?
                .into_iter()
                .map(parse_slave)
                .collect::<Result<Vec<_>, _>>()
                .map(Self::SlavesInfo),
            codes::PEERS_REMOVED => Ok(Self::PeersRemoved(
                entries(payload)?.into_iter().map(str::to_string).collect(),
            )),
            code => Err(DiscoveryError::UnknownCode { code }),
        }
    }
}

/// NUL-terminated UTF-8 entries; a missing final terminator is tolerated
fn entries(payload: &[u8]) -> Result<Vec<&str>, DiscoveryError> {
    payload
        .split(|b| *b == 0)
        .filter(|entry| !entry.is_empty())
        .map(|entry| std::str::from_utf8(entry).map_err(|e| DiscoveryError::malformed(e.to_string())))
        .collect()
}

fn parse_slave(entry: &str) -> Result<SlaveEntry, DiscoveryError> {
    let bad = || DiscoveryError::malformed(format!("bad slave entry {entry:?}"));
    let mut parts = entry.splitn(3, ':');
    let timestamp_ms = parts.next().and_then(|s| s.parse().ok()).ok_or_else(bad)?;
    let port = parts.next().and_then(|s| s.parse().ok()).ok_or_else(bad)?;
    let host = parts.next().filter(|h| !h.is_empty()).ok_or_else(bad)?;
    Ok(SlaveEntry {
        timestamp_ms,
        port,
        host: host.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let bytes = DiscoveryPacket::RequestInfo.encode();
        assert_eq!(&bytes[..], b"TCF2\x01\x00\x00\x00");
    }

    #[test]
    fn test_peer_info_layout() {
        let mut attrs = BTreeMap::new();
        attrs.insert("ID".to_string(), "TCP:h:1".to_string());
        attrs.insert("TransportName".to_string(), "TCP".to_string());
        let bytes = DiscoveryPacket::PeerInfo(attrs.clone()).encode();
        assert_eq!(&bytes[8..], b"ID=TCP:h:1\0TransportName=TCP\0");
        assert_eq!(DiscoveryPacket::decode(&bytes).unwrap(), DiscoveryPacket::PeerInfo(attrs));
    }

    #[test]
    fn test_slaves_info_host_may_contain_colons() {
        let packet = DiscoveryPacket::SlavesInfo(vec![SlaveEntry {
            timestamp_ms: 1200,
            port: 40001,
            host: "fe80::1".to_string(),
        }]);
        let bytes = packet.encode();
        assert_eq!(&bytes[8..], b"1200:40001:fe80::1\0");
        assert_eq!(DiscoveryPacket::decode(&bytes).unwrap(), packet);
    }

    #[test]
    fn test_peers_removed() {
        let bytes = b"TCF2\x05\x00\x00\x00a\0b\0";
        assert_eq!(
            DiscoveryPacket::decode(bytes).unwrap(),
            DiscoveryPacket::PeersRemoved(vec!["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn test_malformed_packets() {
        assert!(matches!(
            DiscoveryPacket::decode(b"TCF2"),
            Err(DiscoveryError::MalformedPacket { .. })
        ));
        assert!(matches!(
            DiscoveryPacket::decode(b"TCF1\x01\x00\x00\x00"),
            Err(DiscoveryError::MalformedPacket { .. })
        ));
        assert_eq!(
            DiscoveryPacket::decode(b"TCF2\x09\x00\x00\x00"),
            Err(DiscoveryError::UnknownCode { code: 9 })
        );
        assert!(DiscoveryPacket::decode(b"TCF2\x02\x00\x00\x00no-equals\0").is_err());
        assert!(DiscoveryPacket::decode(b"TCF2\x04\x00\x00\x00x:1:h\0").is_err());
        assert!(DiscoveryPacket::decode(b"TCF2\x02\x00\x00\x00ID=\xff\0").is_err());
    }
}
