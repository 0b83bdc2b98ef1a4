//! # Peer Discovery
//!
//! ## Purpose
//!
//! Tracks the peers reachable from this process and shares that view with
//! connected clients.
//!
//! ## Architecture
//!
//! ```text
//!                ┌──────────────┐  handle_packet   ┌──────────────────────┐
//!   UDP 1534 ───►│ UdpDiscovery │─────────────────►│ Locator              │
//!            ◄───│ (PacketSink) │◄─────────────────│  PeerTable + Clock   │
//!                └──────────────┘   send_packet    └──────────┬───────────┘
//!                                                             │ LocatorListener
//!                                                  ┌──────────▼───────────┐
//!                                                  │ LocatorService       │── peer events ──► channels
//!                                                  └──────────────────────┘
//!
//!   remote Locator ── getPeers + events ──► LocatorProxy ──► LocatorListener
//! ```
//!
//! Discovered peers expire when no packet refreshes them within the
//! retention window. Local and manually registered peers never expire.

pub mod clock;
pub mod locator;
pub mod packet;
pub mod peer;
pub mod proxy;
pub mod service;
pub mod table;
pub mod udp;

pub use clock::{Clock, ManualClock, SystemClock};
pub use locator::{Locator, LocatorListener, PacketSink, PacketTarget};
pub use packet::{DiscoveryPacket, SlaveEntry};
pub use peer::{keys, Peer};
pub use proxy::LocatorProxy;
pub use service::LocatorService;
pub use table::{PeerSource, PeerTable, Upsert};
pub use udp::{DiscoveryRole, UdpDiscovery};
