//! GATT layer for the blex BLE toolkit
//!
//! Turns the callback-driven GATT model of BLE stacks into sequential async
//! operations and builds client and server sessions on top.
//!
//! ## Architecture
//!
//! - [`coordinator`] - one in-flight operation per peer, bounded by a timeout
//! - [`workspace`] - per-peer operation state shared with the event path
//! - [`executor`] - serial execution contexts for operations and callbacks
//! - [`transport`] - traits a radio backend implements
//! - [`central`] / [`peripheral`] - client and server sessions
//! - [`profile`] / [`profiles`] - service layouts and profile clients/servers
//! - [`loopback`] - in-process transport joining a central and a peripheral
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use blex_gatt::{GattConfig, LoopbackLink, NoopCallback, PingClient, PingServer};
//!
//! # async fn example() -> Result<(), blex_core::GattError> {
//! let link = LoopbackLink::new();
//!
//! let server = PingServer::session(GattConfig::default(), link.peripheral_transport());
//! link.bind_peripheral(server.event_sink());
//! server.start().await?;
//!
//! let client = PingClient::new(link.central_transport(), Arc::new(NoopCallback));
//! link.bind_central(client.session().event_sink());
//! client.session().connect(link.peripheral_address()).await?;
//! client.send_ping().await?;
//! # Ok(())
//! # }
//! ```

pub mod advertising;
pub mod central;
pub mod config;
pub mod coordinator;
pub mod executor;
pub mod loopback;
pub mod pending_write;
pub mod peripheral;
pub mod profile;
pub mod profiles;
pub mod transport;
pub mod workspace;

// Public API exports
pub use advertising::{AdvertiseMode, AdvertiseSettings, TxPowerLevel};
pub use central::{CentralCallback, CentralSession, NoopCallback};
pub use config::{GattConfig, LogConfig};
pub use coordinator::GattCoordinator;
pub use executor::SerialExecutor;
pub use loopback::{random_address, LoopbackLink};
pub use pending_write::PendingWrites;
pub use peripheral::{PeripheralHandler, PeripheralSession};
pub use profile::Profile;
pub use profiles::{
    BatteryClient, BatteryServer, ExactTime, PingClient, PingServer, RadioClient, RadioServer,
    TimeClient, TimeServer,
};
pub use transport::{
    GattEventSink, GattResponse, GattServerEventSink, GattServerTransport, GattTransport,
};
pub use workspace::{PeerWorkspace, WorkspaceSnapshot};

// Re-export the shared types for convenience
pub use blex_core::{
    CharacteristicRef, ConnectionState, GattError, GattResult, GattService, GattStatus,
    OperationKind, OperationTarget, PeerAddress,
};
