//! Maintenance commands arriving as generic vehicle commands.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::NodeId;
use crate::directory::BusContext;
use crate::enumeration::EnumerationDriver;
use crate::error::SubmitError;
use crate::legacy::VehicleCommand;
use crate::msg::{ExecuteOpcode, Opcode, OpcodeRequest, RestartNode, RestartRequest};
use crate::service::{CallCounter, CallKind, ServiceClient};
use crate::transport::Completion;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::FromRepr)]
#[repr(i32)]
pub enum BridgeCommand {
    #[strum(serialize = "stop enumeration")]
    StopEnumeration = 0,
    #[strum(serialize = "start enumeration")]
    StartEnumeration = 1,
    #[strum(serialize = "restart node")]
    RestartNode = 2,
    #[strum(serialize = "save params")]
    SaveParams = 3,
    #[strum(serialize = "erase params")]
    EraseParams = 4,
}

impl BridgeCommand {
    pub fn from_id(id: i32) -> Option<Self> {
        Self::from_repr(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandFlow {
    Idle,
    Awaiting { command: BridgeCommand, node: NodeId },
}

/// What a dispatch did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    /// Enumeration was started or stopped.
    Enumeration(BridgeCommand),
    /// A node command is now in flight.
    Sent(BridgeCommand, NodeId),
    /// Unknown command or bad target; nothing changed.
    Ignored,
}

pub struct CommandDispatcher {
    flow: CommandFlow,
    restart: ServiceClient<RestartNode>,
    opcode: ServiceClient<ExecuteOpcode>,
}

impl CommandDispatcher {
    pub fn new(counter: Arc<CallCounter>) -> Self {
        Self {
            flow: CommandFlow::Idle,
            restart: ServiceClient::new(CallKind::RestartNode, counter.clone()),
            opcode: ServiceClient::new(CallKind::ExecuteOpcode, counter),
        }
    }

    pub fn flow(&self) -> CommandFlow {
        self.flow
    }

    pub fn is_idle(&self) -> bool {
        self.flow == CommandFlow::Idle
    }

    /// Handle a vehicle command. Anything but `PREFLIGHT_UAVCAN` is ignored.
    pub fn handle(
        &mut self,
        cmd: &VehicleCommand,
        enumeration: &mut EnumerationDriver,
        bus: &mut BusContext<'_>,
    ) -> Result<Dispatched, SubmitError> {
        if cmd.command != VehicleCommand::PREFLIGHT_UAVCAN {
            return Ok(Dispatched::Ignored);
        }
        self.dispatch(cmd.command_id(), cmd.target_node(), enumeration, bus)
    }

    pub fn dispatch(
        &mut self,
        command_id: i32,
        node: i32,
        enumeration: &mut EnumerationDriver,
        bus: &mut BusContext<'_>,
    ) -> Result<Dispatched, SubmitError> {
        if let CommandFlow::Awaiting { command, .. } = self.flow {
            debug!("[CMD] {command} still in flight, command {command_id} refused");
            return Err(SubmitError::Busy {
                kind: match command {
                    BridgeCommand::RestartNode => CallKind::RestartNode,
                    _ => CallKind::ExecuteOpcode,
                },
            });
        }

        info!("[CMD] received command {command_id} for node {node}");
        let Some(command) = BridgeCommand::from_id(command_id) else {
            warn!("[CMD] unknown command id {command_id}");
            return Ok(Dispatched::Ignored);
        };

        let opcode = match command {
            BridgeCommand::StopEnumeration => {
                enumeration.stop(bus);
                return Ok(Dispatched::Enumeration(command));
            }
            BridgeCommand::StartEnumeration => {
                enumeration.start(bus);
                return Ok(Dispatched::Enumeration(command));
            }
            BridgeCommand::RestartNode => None,
            BridgeCommand::SaveParams => Some(Opcode::Save),
            BridgeCommand::EraseParams => Some(Opcode::Erase),
        };

        let Some(target) = NodeId::from_wide(i64::from(node)) else {
            warn!("[CMD] {command}: invalid node {node}");
            return Ok(Dispatched::Ignored);
        };

        let sent = match opcode {
            None => self
                .restart
                .call(&mut *bus.transport, target, RestartRequest::new(), ()),
            Some(opcode) => self
                .opcode
                .call(&mut *bus.transport, target, OpcodeRequest { opcode }, ()),
        };

        match sent {
            Ok(_) => {
                debug!("[CMD] sent {command} to node {target}");
                self.flow = CommandFlow::Awaiting {
                    command,
                    node: target,
                };
                Ok(Dispatched::Sent(command, target))
            }
            Err(e) => {
                warn!("[CMD] couldn't send {command} to node {target}: {e}");
                Err(e)
            }
        }
    }

    /// Resolve a restart/opcode completion. The flow returns to idle
    /// whatever the outcome.
    pub fn on_completion(&mut self, completion: Completion) {
        let outcome = match completion.kind {
            CallKind::RestartNode => self.restart.resolve(completion).map(|reply| {
                (
                    reply.server,
                    reply
                        .outcome
                        .map(|r| r.ok)
                        .map_err(|e| e.to_string()),
                )
            }),
            CallKind::ExecuteOpcode => self.opcode.resolve(completion).map(|reply| {
                (
                    reply.server,
                    reply
                        .outcome
                        .map(|r| r.ok)
                        .map_err(|e| e.to_string()),
                )
            }),
            _ => None,
        };
        let Some((node, outcome)) = outcome else {
            return;
        };

        let command = match self.flow {
            CommandFlow::Awaiting { command, .. } => command,
            CommandFlow::Idle => return,
        };
        match outcome {
            Ok(true) => info!("[CMD] {command} on node {node} succeeded"),
            Ok(false) => warn!("[CMD] {command} on node {node} rejected"),
            Err(e) => warn!("[CMD] {command} on node {node} failed: {e}"),
        }
        self.flow = CommandFlow::Idle;
    }
}
