//! ESC index enumeration.
//!
//! Starting enumeration sends "begin" to every known node, one node at a
//! time. The user then touches each controller in turn; the controller
//! reports an [`Indication`], the driver writes the next free index into the
//! node's index parameter, asks the node to persist it, and beeps. Once
//! every node that accepted "begin" has been assigned an index (or the last
//! slot is taken) enumeration is stopped on all nodes.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::NodeId;
use crate::directory::BusContext;
use crate::msg::{
    BeepCommand, Begin, BeginRequest, ExecuteOpcode, GetSet, GetSetRequest, Indication, Opcode,
    OpcodeRequest, Value,
};
use crate::service::{CallCounter, CallKind, ServiceClient};
use crate::transport::{Broadcast, Completion};

/// Number of ESC output slots on the bus.
pub const ESC_SLOTS: usize = 20;

/// Clamp a raw index into `[0, ESC_SLOTS - 1]`.
pub fn clamp_esc_slot(raw: i64) -> u8 {
    raw.clamp(0, ESC_SLOTS as i64 - 1) as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumerationPhase {
    Idle,
    /// "begin" (start or stop) outstanding on this node.
    Requesting(NodeId),
    AwaitingIndication,
    /// Index claim outstanding for this slot.
    Resolving(u8),
    /// Save outstanding for this slot.
    Persisting(u8),
}

pub struct EnumerationDriver {
    parameter_name: String,
    start_timeout_sec: u16,
    active: bool,
    highest: u8,
    accepted: u32,
    slots: [Option<NodeId>; ESC_SLOTS],
    /// Timeout sent by the current begin walk.
    walk_timeout: u16,
    /// Bumped whenever a new walk is requested.
    walk_generation: u32,
    /// Context: the walk generation the call belongs to.
    begin: ServiceClient<Begin, u32>,
    /// Context: the slot requested.
    claim: ServiceClient<GetSet, u8>,
    /// Context: the slot being saved.
    save: ServiceClient<ExecuteOpcode, u8>,
}

impl EnumerationDriver {
    pub fn new(
        parameter_name: impl Into<String>,
        start_timeout_sec: u16,
        claim_concurrency: usize,
        counter: Arc<CallCounter>,
    ) -> Self {
        Self {
            parameter_name: parameter_name.into(),
            start_timeout_sec,
            active: false,
            highest: 0,
            accepted: 0,
            slots: [None; ESC_SLOTS],
            walk_timeout: start_timeout_sec,
            walk_generation: 0,
            begin: ServiceClient::new(CallKind::EnumerationBegin, counter.clone()),
            claim: ServiceClient::with_capacity(
                CallKind::EnumerationGetSet,
                counter.clone(),
                claim_concurrency,
            ),
            save: ServiceClient::with_capacity(
                CallKind::EnumerationSave,
                counter,
                claim_concurrency,
            ),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn highest_index(&self) -> u8 {
        self.highest
    }

    /// Nodes that accepted "begin" since the last start/stop.
    pub fn accepted(&self) -> u32 {
        self.accepted
    }

    pub fn slots(&self) -> &[Option<NodeId>; ESC_SLOTS] {
        &self.slots
    }

    pub fn slot_of(&self, node: NodeId) -> Option<u8> {
        self.slots
            .iter()
            .position(|s| *s == Some(node))
            .map(|i| i as u8)
    }

    pub fn phase(&self) -> EnumerationPhase {
        if let Some((node, _)) = self.begin.pending_contexts().next() {
            return EnumerationPhase::Requesting(node);
        }
        if let Some((_, slot)) = self.claim.pending_contexts().next() {
            return EnumerationPhase::Resolving(*slot);
        }
        if let Some((_, slot)) = self.save.pending_contexts().next() {
            return EnumerationPhase::Persisting(*slot);
        }
        if self.active {
            EnumerationPhase::AwaitingIndication
        } else {
            EnumerationPhase::Idle
        }
    }

    pub fn start(&mut self, bus: &mut BusContext<'_>) {
        info!("[ENUM] starting ESC enumeration");
        self.reset(true);
        self.begin_walk(self.start_timeout_sec, bus);
    }

    pub fn stop(&mut self, bus: &mut BusContext<'_>) {
        info!("[ENUM] stopping ESC enumeration");
        self.reset(false);
        self.begin_walk(0, bus);
    }

    fn reset(&mut self, active: bool) {
        self.active = active;
        self.highest = 0;
        self.accepted = 0;
        self.slots = [None; ESC_SLOTS];
    }

    /// Send begin with `timeout_sec` to every known node. A walk already in
    /// flight is restarted from the first node once its pending call completes.
    fn begin_walk(&mut self, timeout_sec: u16, bus: &mut BusContext<'_>) {
        self.walk_timeout = timeout_sec;
        self.walk_generation = self.walk_generation.wrapping_add(1);
        if !self.begin.is_idle() {
            debug!("[ENUM] begin walk in progress, restarting it with timeout {timeout_sec}s");
            return;
        }
        self.walk_from_first(bus);
    }

    fn walk_from_first(&mut self, bus: &mut BusContext<'_>) {
        let Some(first) = bus.walk().first() else {
            info!("[ENUM] no known nodes to send begin to");
            return;
        };
        self.send_begin(first, bus);
    }

    fn send_begin(&mut self, node: NodeId, bus: &mut BusContext<'_>) {
        let timeout_sec = self.walk_timeout;
        let req = BeginRequest {
            parameter_name: self.parameter_name.clone(),
            timeout_sec,
        };
        match self.begin.call(&mut *bus.transport, node, req, self.walk_generation) {
            Ok(_) => debug!("[ENUM] sent begin (timeout {timeout_sec}s) to node {node}"),
            Err(e) => warn!("[ENUM] couldn't send begin to node {node}: {e}"),
        }
    }

    /// Slot to offer `node`: its existing slot, the slot of a claim still in
    /// flight for it, else the lowest slot neither assigned nor in flight.
    fn candidate_slot(&self, node: NodeId) -> u8 {
        if let Some(slot) = self.slot_of(node) {
            debug!("[ENUM] node {node} already enumerated as index {slot}");
            return slot;
        }
        if let Some((_, slot)) = self.claim.pending_contexts().find(|(n, _)| *n == node) {
            return *slot;
        }
        let taken = |slot: u8| {
            self.slots[slot as usize].is_some()
                || self.claim.pending_contexts().any(|(_, s)| *s == slot)
        };
        (0..ESC_SLOTS as u8)
            .find(|slot| !taken(*slot))
            .unwrap_or(ESC_SLOTS as u8 - 1)
    }

    pub fn on_indication(&mut self, indication: &Indication, bus: &mut BusContext<'_>) {
        let node = indication.source;
        debug!("[ENUM] indication from node {node}");
        if !self.active {
            return;
        }

        let slot = clamp_esc_slot(i64::from(self.candidate_slot(node)));
        let req = GetSetRequest::by_name(self.parameter_name.as_str())
            .with_value(Value::Integer(i64::from(slot)));
        match self.claim.call(&mut *bus.transport, node, req, slot) {
            Ok(_) => debug!("[ENUM] offered index {slot} to node {node}"),
            Err(e) => warn!("[ENUM] couldn't send index claim to node {node}: {e}"),
        }
    }

    pub fn on_completion(&mut self, completion: Completion, bus: &mut BusContext<'_>) {
        match completion.kind {
            CallKind::EnumerationBegin => self.on_begin(completion, bus),
            CallKind::EnumerationGetSet => self.on_claim(completion, bus),
            CallKind::EnumerationSave => self.on_save(completion, bus),
            _ => {}
        }
    }

    fn on_begin(&mut self, completion: Completion, bus: &mut BusContext<'_>) {
        let Some(reply) = self.begin.resolve(completion) else {
            return;
        };
        let node = reply.server;
        if reply.context != self.walk_generation {
            debug!("[ENUM] begin reply from node {node} belongs to an abandoned walk");
            self.walk_from_first(bus);
            return;
        }
        match reply.outcome {
            Ok(resp) if resp.error == 0 => {
                self.accepted += 1;
                debug!("[ENUM] node {node} accepted begin");
            }
            Ok(resp) => warn!("[ENUM] node {node} rejected begin: error {}", resp.error),
            Err(e) => warn!("[ENUM] begin on node {node} failed: {e}"),
        }

        match bus.walk().next_known_after(node) {
            Some(next) => self.send_begin(next, bus),
            None => info!(
                "[ENUM] begin sent to all nodes, {} accepted",
                self.accepted
            ),
        }
    }

    fn on_claim(&mut self, completion: Completion, bus: &mut BusContext<'_>) {
        let Some(reply) = self.claim.resolve(completion) else {
            return;
        };
        let node = reply.server;
        let raw = match reply.outcome {
            Ok(resp) => match resp.value {
                Value::Integer(raw) => raw,
                other => {
                    warn!("[ENUM] node {node} answered index claim with {other:?}");
                    return;
                }
            },
            Err(e) => {
                warn!("[ENUM] index claim on node {node} failed: {e}");
                return;
            }
        };

        let slot = clamp_esc_slot(raw);
        self.record(node, slot);

        let req = OpcodeRequest {
            opcode: Opcode::Save,
        };
        match self.save.call(&mut *bus.transport, node, req, slot) {
            Ok(_) => debug!("[ENUM] saving index {slot} on node {node}"),
            Err(e) => warn!("[ENUM] couldn't send save to node {node}: {e}"),
        }
    }

    fn record(&mut self, node: NodeId, slot: u8) {
        let slot = match self.slots[slot as usize] {
            Some(holder) if holder != node => {
                warn!("[ENUM] node {node} reported index {slot} held by node {holder}");
                ESC_SLOTS as u8 - 1
            }
            _ => slot,
        };
        for entry in self.slots.iter_mut() {
            if *entry == Some(node) {
                *entry = None;
            }
        }
        self.slots[slot as usize] = Some(node);
        self.highest = self.highest.max(slot);
        info!("[ENUM] node {node} is ESC index {slot}");
    }

    fn on_save(&mut self, completion: Completion, bus: &mut BusContext<'_>) {
        let Some(reply) = self.save.resolve(completion) else {
            return;
        };
        let node = reply.server;
        let beep = match reply.outcome {
            Ok(resp) if resp.ok => BeepCommand::SUCCESS,
            Ok(_) => {
                warn!("[ENUM] node {node} rejected save");
                BeepCommand::FAILURE
            }
            Err(e) => {
                warn!("[ENUM] save on node {node} failed: {e}");
                BeepCommand::FAILURE
            }
        };
        if let Err(e) = bus.transport.broadcast(Broadcast::Beep(beep)) {
            warn!("[ENUM] couldn't broadcast beep: {e}");
        }

        if self.active && self.is_complete() {
            info!(
                "[ENUM] enumeration complete, highest index {}",
                self.highest
            );
            self.active = false;
            self.begin_walk(0, bus);
        }
    }

    fn is_complete(&self) -> bool {
        let highest = i64::from(self.highest);
        highest == ESC_SLOTS as i64 - 1 || highest == i64::from(self.accepted) - 1
    }
}
