//! Convenience re-exports for common bridge types.
//!
//! ```rust,ignore
//! use uavcan_bridge::prelude::*;
//!
//! let network = SimNetwork::new();
//! let orchestrator = BridgeBuilder::default()
//!     .with_transport(network.transport())
//!     .with_directory(network.directory())
//!     .build()?;
//! ```

/// Needed to call `.build()` on a builder.
pub use crate::Builder;

/// The entry point: build an orchestrator and run it.
pub use crate::orchestrator::{
    BridgeBuilder, BridgeHandle, BridgeTopics, ExitReason, Orchestrator, Tick,
};

pub use crate::NodeId;
pub use crate::config::BridgeConfig;
pub use crate::error::{CallFailure, Error, Result, SubmitError};

/// Messages exchanged with the rest of the vehicle.
pub use crate::legacy::{
    ArmedState, LegacyParamRequest, LegacyParamValue, MessageKind, ParamSelector, ParamType,
    VehicleCommand,
};
pub use crate::topic::{Publisher, Subscriber, Topic};

/// State machine views.
pub use crate::command::{BridgeCommand, CommandFlow};
pub use crate::enumeration::EnumerationPhase;
pub use crate::param::{ListCursor, ParamFlow};

/// Collaborator traits and the simulated bus implementing them.
pub use crate::directory::NodeDirectory;
pub use crate::msg::{BeepCommand, Value};
pub use crate::sim::{SimNetwork, SimNode};
pub use crate::transport::Transport;
