//! # uavcan-bridge: bus parameter & enumeration orchestrator
//!
//! `uavcan-bridge` runs next to a flight controller's main bus node and exposes
//! the configuration parameters of peripheral devices through the legacy
//! request-by-index/name parameter protocol. It also drives ESC index
//! enumeration and a handful of node maintenance commands.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────── Orchestrator (one thread) ──────────────────┐
//! │  tick:                                                                    │
//! │   1. refresh flag      ──► NodeDirectory::invalidate_all                  │
//! │   2. Transport::spin   ──► BusEvent (completions, indications) ─┐         │
//! │   3. param request     ──► ParameterBridge ◄────────────────────┤         │
//! │   4/5. list advance    ──► ParameterBridge                      │         │
//! │   6. vehicle command   ──► CommandDispatcher / EnumerationDriver◄┘        │
//! │   7. armed state       ──► exit                                           │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Remote calls never block. Every call goes through a [`service::ServiceClient`]
//! which hands it to the [`transport::Transport`]; the transport reports the
//! outcome later, from inside `spin`, through an [`transport::EventSink`].
//!
//! ## Getting started
//!
//! ```rust,ignore
//! use uavcan_bridge::prelude::*;
//!
//! let network = SimNetwork::new();
//! let orchestrator = BridgeBuilder::default()
//!     .with_transport(network.transport())
//!     .with_directory(network.directory())
//!     .build()?;
//! let handle = orchestrator.spawn()?;
//! ```

pub mod command;
pub mod config;
pub mod directory;
pub mod enumeration;
pub mod error;
pub mod legacy;
pub mod msg;
pub mod node_id;
pub mod orchestrator;
pub mod param;
pub mod prelude;
pub mod service;
pub mod sim;
pub mod topic;
pub mod transport;

pub use error::{Error, Result};
pub use node_id::NodeId;

/// Builds a configured object, consuming the builder.
///
/// ```rust,ignore
/// use uavcan_bridge::Builder;
/// let orchestrator = BridgeBuilder::default().build()?;
/// ```
pub trait Builder {
    /// The type produced by this builder.
    type Output;
    /// Consume the builder and construct the configured object.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or a required
    /// collaborator was not supplied.
    fn build(self) -> Result<Self::Output>;
}
