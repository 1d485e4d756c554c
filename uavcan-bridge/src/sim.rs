//! Deterministic in-memory bus for tests and demos.
//!
//! [`SimNetwork`] holds a set of simulated nodes. Its [`SimTransport`] and
//! [`SimDirectory`] handles implement the bridge's collaborator traits;
//! calls submitted through the transport are answered by the addressed node
//! on the next [`Transport::spin`].
//!
//! ```rust,ignore
//! let network = SimNetwork::new();
//! network.add_node(node(5), SimNode::new().with_param("rate", Value::Integer(50)));
//! network.press(node(5)); // user touches the controller
//! ```

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::NodeId;
use crate::directory::NodeDirectory;
use crate::error::{BusError, CallFailure, SubmitError};
use crate::msg::{
    BeepCommand, BeginResponse, GetSetRequest, GetSetResponse, Indication, Opcode,
    OpcodeResponse, RequestPayload, ResponsePayload, RestartRequest, RestartResponse, Value,
};
use crate::service::CallKind;
use crate::transport::{Broadcast, Call, Completion, EventSink, Transport};

/// A simulated node.
#[derive(Debug, Clone, PartialEq)]
pub struct SimNode {
    pub params: Vec<(String, Value)>,
    /// Error code answered to "begin"; 0 accepts.
    pub begin_error: u8,
    /// Timeout of the last "begin" received.
    pub begin_timeout: Option<u16>,
    pub opcode_ok: bool,
    pub restart_ok: bool,
    /// Ignore parameter writes.
    pub read_only: bool,
    pub saves: usize,
    pub erases: usize,
    pub restarts: usize,
}

impl Default for SimNode {
    fn default() -> Self {
        Self {
            params: Vec::new(),
            begin_error: 0,
            begin_timeout: None,
            opcode_ok: true,
            restart_ok: true,
            read_only: false,
            saves: 0,
            erases: 0,
            restarts: 0,
        }
    }
}

impl SimNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// A motor controller exposing an unassigned `esc_index`.
    pub fn esc() -> Self {
        Self::new().with_param("esc_index", Value::Integer(-1))
    }

    pub fn with_param(mut self, name: impl Into<String>, value: Value) -> Self {
        self.params.push((name.into(), value));
        self
    }

    pub fn rejecting_begin(mut self, error: u8) -> Self {
        self.begin_error = error;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn rejecting_opcodes(mut self) -> Self {
        self.opcode_ok = false;
        self
    }

    pub fn param(&self, name: &str) -> Option<Value> {
        self.params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    fn getset(&mut self, req: &GetSetRequest) -> GetSetResponse {
        let slot = if req.name.is_empty() {
            self.params.get_mut(req.index as usize)
        } else {
            self.params.iter_mut().find(|(n, _)| *n == req.name)
        };
        let Some((name, value)) = slot else {
            return GetSetResponse::default();
        };
        if req.value != Value::Empty && !self.read_only {
            *value = req.value;
        }
        GetSetResponse {
            name: name.clone(),
            value: *value,
        }
    }

    fn answer(&mut self, request: &RequestPayload) -> ResponsePayload {
        match request {
            RequestPayload::GetSet(req) => self.getset(req).into(),
            RequestPayload::Begin(req) => {
                self.begin_timeout = Some(req.timeout_sec);
                BeginResponse {
                    error: self.begin_error,
                }
                .into()
            }
            RequestPayload::Restart(req) => {
                let ok = req.magic_number == RestartRequest::MAGIC_NUMBER && self.restart_ok;
                if ok {
                    self.restarts += 1;
                }
                RestartResponse { ok }.into()
            }
            RequestPayload::Opcode(req) => {
                match req.opcode {
                    Opcode::Save => self.saves += 1,
                    Opcode::Erase => self.erases += 1,
                }
                OpcodeResponse { ok: self.opcode_ok }.into()
            }
        }
    }
}

#[derive(Default)]
struct SimState {
    nodes: BTreeMap<NodeId, SimNode>,
    queued: VecDeque<Call>,
    indications: VecDeque<Indication>,
    log: Vec<Call>,
    broadcasts: Vec<Broadcast>,
    failures: HashMap<NodeId, CallFailure>,
    reject_submissions: bool,
    holding: bool,
    realtime: bool,
    refreshes: usize,
    spins: usize,
}

/// Shared handle to the simulated bus. Clones see the same bus.
#[derive(Clone, Default)]
pub struct SimNetwork {
    state: Arc<Mutex<SimState>>,
}

impl SimNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transport(&self) -> SimTransport {
        SimTransport {
            state: self.state.clone(),
        }
    }

    pub fn directory(&self) -> SimDirectory {
        SimDirectory {
            state: self.state.clone(),
        }
    }

    /// Make every spin sleep for its full budget, like a real bus.
    pub fn set_realtime(&self, realtime: bool) {
        self.state.lock().realtime = realtime;
    }

    pub fn add_node(&self, id: NodeId, node: SimNode) {
        self.state.lock().nodes.insert(id, node);
    }

    /// Snapshot of a node's state.
    pub fn node(&self, id: NodeId) -> Option<SimNode> {
        self.state.lock().nodes.get(&id).cloned()
    }

    /// The user touches node `id` during enumeration.
    pub fn press(&self, id: NodeId) {
        self.state.lock().indications.push_back(Indication {
            source: id,
            parameter_name: "esc_index".to_string(),
        });
    }

    /// Every call ever submitted, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().log.clone()
    }

    pub fn calls_of(&self, kind: CallKind) -> Vec<Call> {
        self.state
            .lock()
            .log
            .iter()
            .filter(|c| c.kind == kind)
            .cloned()
            .collect()
    }

    pub fn beeps(&self) -> Vec<BeepCommand> {
        self.state
            .lock()
            .broadcasts
            .iter()
            .map(|Broadcast::Beep(beep)| *beep)
            .collect()
    }

    /// Refuse every submission with a transport error.
    pub fn set_reject_submissions(&self, reject: bool) {
        self.state.lock().reject_submissions = reject;
    }

    /// Complete every call to `id` with `failure`, or clear it with `None`.
    pub fn set_failure(&self, id: NodeId, failure: Option<CallFailure>) {
        let mut state = self.state.lock();
        match failure {
            Some(failure) => state.failures.insert(id, failure),
            None => state.failures.remove(&id),
        };
    }

    /// While holding, submitted calls stay in flight.
    pub fn hold(&self, holding: bool) {
        self.state.lock().holding = holding;
    }

    /// Calls submitted but not yet completed.
    pub fn in_flight(&self) -> usize {
        self.state.lock().queued.len()
    }

    /// How many times the directory was told to drop its cache.
    pub fn refreshes(&self) -> usize {
        self.state.lock().refreshes
    }

    pub fn spins(&self) -> usize {
        self.state.lock().spins
    }
}

pub struct SimTransport {
    state: Arc<Mutex<SimState>>,
}

impl Transport for SimTransport {
    fn submit(&mut self, call: Call) -> Result<(), SubmitError> {
        let mut state = self.state.lock();
        if state.reject_submissions {
            return Err(SubmitError::Transport { code: -2 });
        }
        tracing::trace!("[SIM] {} call {:?} -> node {}", call.kind, call.id, call.target);
        state.log.push(call.clone());
        state.queued.push_back(call);
        Ok(())
    }

    fn broadcast(&mut self, message: Broadcast) -> Result<(), SubmitError> {
        self.state.lock().broadcasts.push(message);
        Ok(())
    }

    fn spin(&mut self, budget: Duration, sink: &EventSink) -> Result<(), BusError> {
        let realtime = {
            let mut state = self.state.lock();
            state.spins += 1;
            if !state.holding {
                while let Some(call) = state.queued.pop_front() {
                    let completion = complete(&mut state, &call);
                    sink.complete(completion);
                }
            }
            while let Some(indication) = state.indications.pop_front() {
                sink.indicate(indication);
            }
            state.realtime
        };
        if realtime {
            std::thread::sleep(budget);
        }
        Ok(())
    }
}

fn complete(state: &mut SimState, call: &Call) -> Completion {
    if let Some(failure) = state.failures.get(&call.target) {
        return Completion::failure(call, failure.clone());
    }
    match state.nodes.get_mut(&call.target) {
        Some(node) => Completion::success(call, node.answer(&call.request)),
        None => Completion::failure(call, CallFailure::Timeout),
    }
}

pub struct SimDirectory {
    state: Arc<Mutex<SimState>>,
}

impl NodeDirectory for SimDirectory {
    fn is_known(&self, node: NodeId) -> bool {
        self.state.lock().nodes.contains_key(&node)
    }

    fn invalidate_all(&mut self) {
        self.state.lock().refreshes += 1;
    }
}
