//! Protocol Infrastructure
//!
//! Command/response channels over framed transports, a single-threaded
//! dispatcher that owns all protocol state, and UDP peer discovery.
//!
//! ```text
//!  Service handlers      Command listeners      Locator listeners
//!        ▲                      ▲                      ▲
//!        └──────────── Channel ─┘          Locator ────┘
//!                        │  Frame (C/R/P/N/E/F)        │ DiscoveryPacket
//!                   Transport (TCP, memory)      UdpDiscovery
//!                        └──────── Dispatcher thread ──┘
//! ```

pub mod channel;
pub mod config;
pub mod discovery;
pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod transports;

pub use channel::{
    Channel, ChannelListener, CommandFuture, CommandListener, CommandResult, EventListener, Responder, Service,
    State, Token,
};
pub use config::ProtocolConfig;
pub use discovery::{Locator, LocatorListener, LocatorProxy, LocatorService, Peer, UdpDiscovery};
pub use dispatch::Dispatcher;
pub use error::{ChannelError, ConfigError, DiscoveryError, DispatchError, Result, TransportError};
pub use protocol::{ErrorReport, Frame};
pub use transports::{MemoryTransport, TcpTransport, TcpTransportListener, Transport, TransportInfo, TransportType};
