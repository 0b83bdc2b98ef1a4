//! Peer descriptions
//!
//! A peer is an attribute map. Only `ID` and `TransportName` are required;
//! everything else is advisory and passed through untouched.

use crate::error::DiscoveryError;
use codec::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Well-known peer attribute keys
pub mod keys {
    pub const ID: &str = "ID";
    pub const SERVICE_MANAGER_ID: &str = "ServiceManagerID";
    pub const AGENT_ID: &str = "AgentID";
    pub const NAME: &str = "Name";
    pub const OS_NAME: &str = "OSName";
    pub const USER_NAME: &str = "UserName";
    pub const TRANSPORT_NAME: &str = "TransportName";
    pub const PROXY: &str = "Proxy";
    pub const NEED_SYMS: &str = "NeedSyms";
    pub const HOST: &str = "Host";
    pub const ALIASES: &str = "Aliases";
    pub const ADDRESSES: &str = "Addresses";
    pub const PORT: &str = "Port";
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    attributes: BTreeMap<String, String>,
}

impl Peer {
    pub fn from_attributes(attributes: BTreeMap<String, String>) -> Result<Self, DiscoveryError> {
        for key in [keys::ID, keys::TRANSPORT_NAME] {
            if attributes.get(key).map_or(true, |v| v.is_empty()) {
                return Err(DiscoveryError::MissingAttribute { key });
            }
        }
        Ok(Self { attributes })
    }

    /// TCP peer with the conventional `TCP:<host>:<port>` id
    pub fn tcp(host: &str, port: u16) -> Self {
        let mut attributes = BTreeMap::new();
        attributes.insert(keys::ID.to_string(), format!("TCP:{host}:{port}"));
        attributes.insert(keys::TRANSPORT_NAME.to_string(), "TCP".to_string());
        attributes.insert(keys::HOST.to_string(), host.to_string());
        attributes.insert(keys::PORT.to_string(), port.to_string());
        Self { attributes }
    }

    /// Set an advisory attribute; `ID` and `TransportName` cannot be cleared
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        if value.is_empty() && (key == keys::ID || key == keys::TRANSPORT_NAME) {
            return self;
        }
        self.attributes.insert(key, value);
        self
    }

    pub fn id(&self) -> &str {
        self.get(keys::ID).unwrap_or_default()
    }

    pub fn transport_name(&self) -> &str {
        self.get(keys::TRANSPORT_NAME).unwrap_or_default()
    }

    pub fn name(&self) -> Option<&str> {
        self.get(keys::NAME)
    }

    pub fn host(&self) -> Option<&str> {
        self.get(keys::HOST)
    }

    pub fn port(&self) -> Option<u16> {
        self.get(keys::PORT).and_then(|p| p.parse().ok())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn to_value(&self) -> Value {
        Value::map(self.attributes.iter().map(|(k, v)| (k.clone(), v.as_str())))
    }

    /// Parse a wire attribute map; non-text values are skipped
    pub fn from_value(value: &Value) -> Result<Self, DiscoveryError> {
        let map = value
            .as_map()
            .ok_or_else(|| DiscoveryError::malformed(format!("peer must be a map, got {}", value.type_name())))?;
        let attributes = map
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
            .collect();
        Self::from_attributes(attributes)
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({name})", self.id()),
            None => f.write_str(self.id()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_attributes() {
        let mut attrs = BTreeMap::new();
        attrs.insert(keys::ID.to_string(), "p1".to_string());
        assert_eq!(
            Peer::from_attributes(attrs.clone()),
            Err(DiscoveryError::MissingAttribute { key: keys::TRANSPORT_NAME })
        );

        attrs.insert(keys::TRANSPORT_NAME.to_string(), "TCP".to_string());
        let peer = Peer::from_attributes(attrs).unwrap();
        assert_eq!(peer.id(), "p1");
        assert_eq!(peer.port(), None);
    }

    #[test]
    fn test_tcp_peer_value_round_trip() {
        let peer = Peer::tcp("10.0.0.7", 1534).with_attribute(keys::NAME, "board");
        assert_eq!(peer.id(), "TCP:10.0.0.7:1534");
        assert_eq!(peer.port(), Some(1534));
        assert_eq!(peer.to_string(), "TCP:10.0.0.7:1534 (board)");

        let back = Peer::from_value(&peer.to_value()).unwrap();
        assert_eq!(back, peer);
    }

    #[test]
    fn test_from_value_rejects_non_map() {
        assert!(matches!(
            Peer::from_value(&Value::from("p1")),
            Err(DiscoveryError::MalformedPacket { .. })
        ));
    }

    #[test]
    fn test_required_attribute_cannot_be_cleared() {
        let peer = Peer::tcp("h", 1).with_attribute(keys::ID, "");
        assert_eq!(peer.id(), "TCP:h:1");
    }
}
