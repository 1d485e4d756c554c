//! Legacy parameter protocol on top of the bus's indexed get/set service.
//!
//! The bridge serves three flows over one get/set client:
//!
//! - **count**: walk indices from 0 until a node returns an empty name, to
//!   learn the length of its parameter table;
//! - **fetch**: one read or write, standalone or as a step of a list;
//! - **list**: fetch every index of one node, or of every known node in
//!   ascending address order.
//!
//! A list sits underneath count and fetch: while it is active, counting the
//! next node or fetching the next index suspends it, and the list resumes
//! when that step completes.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::NodeId;
use crate::directory::BusContext;
use crate::error::SubmitError;
use crate::legacy::{
    BROADCAST_NODE_ID, LegacyParamRequest, LegacyParamValue, MessageKind, ParamSelector,
};
use crate::msg::{GetSet, GetSetRequest, GetSetResponse};
use crate::node_id::NodeTable;
use crate::service::{CallCounter, CallKind, Reply, ServiceClient};
use crate::topic::{Publisher, Topic};
use crate::transport::Completion;

/// Which flow currently owns the get/set client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamFlow {
    Idle,
    /// Counting `node`'s parameters. `listing` resumes a list afterwards.
    Counting { node: NodeId, listing: bool },
    /// One get/set outstanding on `node`.
    Fetching { node: NodeId, listing: bool },
    /// A list is active and ready for its next step.
    Listing,
}

/// Position of the current (or last) list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListCursor {
    pub node: NodeId,
    /// Next index to fetch. Standalone requests overwrite it with their own
    /// index, which may be negative for by-name requests.
    pub index: i32,
    pub all_nodes: bool,
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Count(u16),
    Fetch,
}

pub struct ParameterBridge {
    counts: NodeTable<u16>,
    flow: ParamFlow,
    cursor: ListCursor,
    client: ServiceClient<GetSet, Step>,
    values: Topic<LegacyParamValue>,
    publisher: Option<Publisher<LegacyParamValue>>,
}

impl ParameterBridge {
    pub fn new(counter: Arc<CallCounter>, values: Topic<LegacyParamValue>) -> Self {
        Self {
            counts: NodeTable::new(),
            flow: ParamFlow::Idle,
            cursor: ListCursor {
                node: NodeId::MIN,
                index: 0,
                all_nodes: false,
            },
            client: ServiceClient::new(CallKind::ParamGetSet, counter),
            values,
            publisher: None,
        }
    }

    pub fn flow(&self) -> ParamFlow {
        self.flow
    }

    pub fn cursor(&self) -> ListCursor {
        self.cursor
    }

    /// Cached parameter count for `node`; 0 when unknown.
    pub fn count(&self, node: NodeId) -> u16 {
        self.counts[node]
    }

    pub fn is_counting(&self) -> bool {
        matches!(self.flow, ParamFlow::Counting { .. })
    }

    pub fn is_fetching(&self) -> bool {
        matches!(self.flow, ParamFlow::Fetching { .. })
    }

    /// Whether a list is active, including while it is suspended by a count
    /// or fetch step.
    pub fn is_listing(&self) -> bool {
        matches!(
            self.flow,
            ParamFlow::Listing
                | ParamFlow::Counting { listing: true, .. }
                | ParamFlow::Fetching { listing: true, .. }
        )
    }

    /// A new legacy request is only taken when no flow is active.
    pub fn accepts_requests(&self) -> bool {
        self.flow == ParamFlow::Idle
    }

    /// Start serving `req`.
    ///
    /// Requests for a node whose count is unknown only start a count pass;
    /// the request itself is dropped and must be re-issued by the requester.
    pub fn handle_request(
        &mut self,
        req: &LegacyParamRequest,
        bus: &mut BusContext<'_>,
    ) -> Result<(), SubmitError> {
        if !self.accepts_requests() {
            return Err(SubmitError::Busy {
                kind: self.client.kind(),
            });
        }

        if req.node_id == BROADCAST_NODE_ID {
            if req.message_type != MessageKind::List {
                warn!("[PARAM] {} request for all nodes ignored", req.message_type);
                return Ok(());
            }
            return self.start_list_all(bus);
        }

        let Some(node) = NodeId::new(req.node_id) else {
            warn!("[PARAM] request for invalid node {} ignored", req.node_id);
            return Ok(());
        };

        if self.counts[node] == 0 {
            debug!("[PARAM] node {node} not counted yet, counting before {}", req.message_type);
            return self.start_count(node, false, bus);
        }

        match req.message_type {
            MessageKind::Read | MessageKind::Write => {
                let getset = req.to_getset();
                self.client
                    .call(&mut *bus.transport, node, getset, Step::Fetch)
                    .inspect_err(|e| warn!("[PARAM] couldn't send get/set to node {node}: {e}"))?;
                self.flow = ParamFlow::Fetching {
                    node,
                    listing: false,
                };
                self.cursor.index = i32::from(req.param_index);
                match req.selector() {
                    ParamSelector::Index(index) => {
                        debug!("[PARAM] sent {} of #{index} to node {node}", req.message_type)
                    }
                    ParamSelector::Name(name) => {
                        debug!("[PARAM] sent {} of '{name}' to node {node}", req.message_type)
                    }
                }
            }
            MessageKind::List => {
                self.cursor = ListCursor {
                    node,
                    index: 0,
                    all_nodes: false,
                };
                self.flow = ParamFlow::Listing;
                info!("[PARAM] listing node {node}");
            }
        }
        Ok(())
    }

    fn start_list_all(&mut self, bus: &mut BusContext<'_>) -> Result<(), SubmitError> {
        let Some(first) = bus.walk().first() else {
            info!("[PARAM] no known nodes to list");
            return Ok(());
        };
        self.cursor = ListCursor {
            node: first,
            index: 0,
            all_nodes: true,
        };
        self.flow = ParamFlow::Listing;
        info!("[PARAM] listing all nodes, starting at {first}");
        if self.counts[first] == 0 {
            self.start_count(first, true, bus)?;
        }
        Ok(())
    }

    fn start_count(
        &mut self,
        node: NodeId,
        listing: bool,
        bus: &mut BusContext<'_>,
    ) -> Result<(), SubmitError> {
        match self
            .client
            .call(&mut *bus.transport, node, GetSetRequest::by_index(0), Step::Count(0))
        {
            Ok(_) => {
                self.flow = ParamFlow::Counting { node, listing };
                debug!("[PARAM] counting parameters of node {node}");
                Ok(())
            }
            Err(e) => {
                warn!("[PARAM] couldn't start parameter count on node {node}: {e}");
                self.counts[node] = 0;
                self.flow = Self::after_step(listing);
                Err(e)
            }
        }
    }

    fn after_step(listing: bool) -> ParamFlow {
        if listing {
            ParamFlow::Listing
        } else {
            ParamFlow::Idle
        }
    }

    /// Move the list past an exhausted node. Only acts while the list is
    /// ready for its next step.
    pub fn advance_list(&mut self, bus: &mut BusContext<'_>) {
        if self.flow != ParamFlow::Listing {
            return;
        }
        let node = self.cursor.node;
        if self.cursor.index < i32::from(self.counts[node]) {
            return;
        }

        if !self.cursor.all_nodes {
            info!("[PARAM] finished listing node {node}");
            self.flow = ParamFlow::Idle;
            return;
        }

        let Some(next) = bus.walk().next_known_after(node) else {
            info!("[PARAM] finished listing all nodes");
            self.flow = ParamFlow::Idle;
            return;
        };

        debug!("[PARAM] list moving from node {node} to {next}");
        self.cursor.node = next;
        self.cursor.index = 0;
        if self.counts[next] == 0 {
            // failure leaves the count at 0, so the next advance skips the node
            let _ = self.start_count(next, true, bus);
        }
    }

    /// Fetch the parameter under the list cursor.
    pub fn request_next(&mut self, bus: &mut BusContext<'_>) {
        if self.flow != ParamFlow::Listing {
            return;
        }
        let ListCursor { node, index, .. } = self.cursor;
        // a node whose count just failed is skipped by the next advance
        if index >= i32::from(self.counts[node]) {
            return;
        }
        let Ok(index) = u16::try_from(index) else {
            warn!("[PARAM] list cursor {index} out of range, ending list");
            self.flow = ParamFlow::Idle;
            return;
        };
        match self
            .client
            .call(&mut *bus.transport, node, GetSetRequest::by_index(index), Step::Fetch)
        {
            Ok(_) => {
                self.flow = ParamFlow::Fetching {
                    node,
                    listing: true,
                };
                debug!("[PARAM] list fetching #{index} from node {node}");
            }
            Err(e) => {
                warn!("[PARAM] couldn't send get/set during list: {e}, list aborted");
                self.flow = ParamFlow::Idle;
            }
        }
    }

    /// Route a get/set completion back into the active flow.
    pub fn on_completion(&mut self, completion: Completion, bus: &mut BusContext<'_>) {
        let Some(reply) = self.client.resolve(completion) else {
            return;
        };
        match (reply.context, self.flow) {
            (Step::Count(index), ParamFlow::Counting { node, listing }) => {
                self.on_count(index, node, listing, reply, bus)
            }
            (Step::Fetch, ParamFlow::Fetching { node, listing }) => {
                self.on_fetch(node, listing, reply)
            }
            (step, flow) => debug!("[PARAM] {step:?} reply arrived in {flow:?}, dropped"),
        }
    }

    fn on_count(
        &mut self,
        index: u16,
        node: NodeId,
        listing: bool,
        reply: Reply<GetSetResponse, Step>,
        bus: &mut BusContext<'_>,
    ) {
        match reply.outcome {
            Ok(resp) if !resp.name.is_empty() => {
                self.counts[node] = index.saturating_add(1);
                if index == u16::MAX {
                    warn!("[PARAM] node {node} never ended its parameter table, count capped");
                    self.flow = Self::after_step(listing);
                    return;
                }
                let next = index + 1;
                if let Err(e) = self.client.call(
                    &mut *bus.transport,
                    node,
                    GetSetRequest::by_index(next),
                    Step::Count(next),
                ) {
                    warn!("[PARAM] couldn't send get/set during count of node {node}: {e}");
                    self.counts[node] = 0;
                    self.flow = Self::after_step(listing);
                }
            }
            Ok(_) => {
                info!(
                    "[PARAM] node {node} has {} parameters",
                    self.counts[node]
                );
                self.flow = Self::after_step(listing);
            }
            Err(e) => {
                warn!("[PARAM] get/set #{index} failed during count of node {node}: {e}");
                self.counts[node] = 0;
                self.flow = Self::after_step(listing);
            }
        }
    }

    fn on_fetch(&mut self, node: NodeId, listing: bool, reply: Reply<GetSetResponse, Step>) {
        match reply.outcome {
            Ok(resp) => {
                let index = i16::try_from(self.cursor.index).unwrap_or(i16::MAX);
                match LegacyParamValue::from_response(node, &resp, index, self.counts[node]) {
                    Some(value) => {
                        debug!("[PARAM] node {node} '{}' = {:?}", value.param_id, resp.value);
                        self.publish(&value);
                    }
                    None => debug!("[PARAM] node {node} '{}' has no value", resp.name),
                }
            }
            Err(e) => warn!("[PARAM] get/set on node {node} failed: {e}"),
        }
        self.cursor.index += 1;
        self.flow = Self::after_step(listing);
    }

    fn publish(&mut self, value: &LegacyParamValue) {
        let values = &self.values;
        let publisher = self.publisher.get_or_insert_with(|| values.advertise());
        publisher.publish(value);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::directory::NodeDirectory;
    use crate::error::{BusError, CallFailure};
    use crate::legacy::ParamType;
    use crate::msg::Value;
    use crate::transport::{Broadcast, Call, EventSink, Transport};

    #[derive(Default)]
    struct Recorder {
        calls: Vec<Call>,
        reject: bool,
    }

    impl Transport for Recorder {
        fn submit(&mut self, call: Call) -> Result<(), SubmitError> {
            if self.reject {
                return Err(SubmitError::Transport { code: -1 });
            }
            self.calls.push(call);
            Ok(())
        }

        fn broadcast(&mut self, _message: Broadcast) -> Result<(), SubmitError> {
            Ok(())
        }

        fn spin(&mut self, _budget: Duration, _sink: &EventSink) -> Result<(), BusError> {
            Ok(())
        }
    }

    struct Known(Vec<u8>);

    impl NodeDirectory for Known {
        fn is_known(&self, node: NodeId) -> bool {
            self.0.contains(&node.get())
        }

        fn invalidate_all(&mut self) {}
    }

    fn node(raw: u8) -> NodeId {
        NodeId::new(raw).unwrap()
    }

    fn named(name: &str, value: Value) -> GetSetResponse {
        GetSetResponse {
            name: name.into(),
            value,
        }
    }

    struct Fixture {
        bridge: ParameterBridge,
        transport: Recorder,
        directory: Known,
        values: crate::topic::Subscriber<LegacyParamValue>,
    }

    impl Fixture {
        fn new(known: &[u8]) -> Self {
            let topic = Topic::new("param_value", 16);
            let values = topic.subscribe();
            Self {
                bridge: ParameterBridge::new(Arc::default(), topic),
                transport: Recorder::default(),
                directory: Known(known.to_vec()),
                values,
            }
        }

        fn request(&mut self, req: &LegacyParamRequest) -> Result<(), SubmitError> {
            let mut bus = BusContext {
                transport: &mut self.transport,
                directory: &self.directory,
                local: None,
            };
            self.bridge.handle_request(req, &mut bus)
        }

        fn reply(&mut self, outcome: Result<GetSetResponse, CallFailure>) {
            let call = self.transport.calls.last().unwrap().clone();
            let completion = match outcome {
                Ok(resp) => Completion::success(&call, resp),
                Err(e) => Completion::failure(&call, e),
            };
            let mut bus = BusContext {
                transport: &mut self.transport,
                directory: &self.directory,
                local: None,
            };
            self.bridge.on_completion(completion, &mut bus);
        }

        fn list_steps(&mut self) {
            let mut bus = BusContext {
                transport: &mut self.transport,
                directory: &self.directory,
                local: None,
            };
            self.bridge.advance_list(&mut bus);
            self.bridge.request_next(&mut bus);
        }

        fn count(&mut self, target: u8, names: &[&str]) {
            for name in names {
                self.reply(Ok(named(name, Value::Integer(0))));
            }
            self.reply(Ok(GetSetResponse::default()));
            assert_eq!(self.bridge.count(node(target)), names.len() as u16);
        }
    }

    #[test]
    fn test_count_records_index_plus_one() {
        let mut fx = Fixture::new(&[5]);
        fx.request(&LegacyParamRequest::read_index(5, 0)).unwrap();
        assert!(fx.bridge.is_counting());
        fx.count(5, &["a", "b", "c"]);
        assert_eq!(fx.bridge.flow(), ParamFlow::Idle);
        let indices: Vec<_> = fx
            .transport
            .calls
            .iter()
            .map(|c| match &c.request {
                crate::msg::RequestPayload::GetSet(r) => r.index,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_count_failure_resets_to_zero() {
        let mut fx = Fixture::new(&[5]);
        fx.request(&LegacyParamRequest::read_index(5, 0)).unwrap();
        fx.reply(Ok(named("a", Value::Integer(1))));
        assert_eq!(fx.bridge.count(node(5)), 1);
        fx.reply(Err(CallFailure::Timeout));
        assert_eq!(fx.bridge.count(node(5)), 0);
        assert_eq!(fx.bridge.flow(), ParamFlow::Idle);
    }

    #[test]
    fn test_single_write_publishes_and_moves_cursor() {
        let mut fx = Fixture::new(&[5]);
        fx.request(&LegacyParamRequest::read_index(5, 0)).unwrap();
        fx.count(5, &["a", "b"]);

        let req = LegacyParamRequest::write_int(5, ParamSelector::Index(1), ParamType::Int32, 42);
        fx.request(&req).unwrap();
        assert!(fx.bridge.is_fetching());
        assert!(fx.request(&req).is_err());
        fx.reply(Ok(named("b", Value::Integer(42))));

        let value = fx.values.take().unwrap();
        assert_eq!(value.node_id, 5);
        assert_eq!(value.param_index, 1);
        assert_eq!(value.param_count, 2);
        assert_eq!(value.int_value, 42);
        assert_eq!(fx.bridge.cursor().index, 2);
        assert!(fx.bridge.accepts_requests());
    }

    #[test]
    fn test_by_name_read_reports_negative_index() {
        let mut fx = Fixture::new(&[5]);
        fx.request(&LegacyParamRequest::read_index(5, 0)).unwrap();
        fx.count(5, &["a"]);
        fx.request(&LegacyParamRequest::read_name(5, "a")).unwrap();
        fx.reply(Ok(named("a", Value::Real(1.5))));
        let value = fx.values.take().unwrap();
        assert_eq!(value.param_index, -1);
        assert_eq!(value.param_type, ParamType::Real32);
        assert_eq!(fx.bridge.cursor().index, 0);
    }

    #[test]
    fn test_empty_value_is_not_published() {
        let mut fx = Fixture::new(&[5]);
        fx.request(&LegacyParamRequest::read_index(5, 0)).unwrap();
        fx.count(5, &["a"]);
        fx.request(&LegacyParamRequest::read_index(5, 0)).unwrap();
        fx.reply(Ok(named("a", Value::Empty)));
        assert!(fx.values.take().is_none());
        assert_eq!(fx.bridge.flow(), ParamFlow::Idle);
    }

    #[test]
    fn test_broadcast_read_ignored() {
        let mut fx = Fixture::new(&[5]);
        fx.request(&LegacyParamRequest::read_index(0, 1)).unwrap();
        assert!(fx.transport.calls.is_empty());
        assert!(fx.bridge.accepts_requests());
    }

    #[test]
    fn test_list_single_node_walks_every_index() {
        let mut fx = Fixture::new(&[5]);
        fx.request(&LegacyParamRequest::read_index(5, 0)).unwrap();
        fx.count(5, &["a", "b"]);

        fx.request(&LegacyParamRequest::list(5)).unwrap();
        assert!(fx.bridge.is_listing());
        for name in ["a", "b"] {
            fx.list_steps();
            assert!(fx.bridge.is_fetching());
            fx.reply(Ok(named(name, Value::Boolean(true))));
        }
        fx.list_steps();
        assert_eq!(fx.bridge.flow(), ParamFlow::Idle);
        assert_eq!(fx.values.pending(), 2);
    }

    #[test]
    fn test_list_submission_failure_aborts() {
        let mut fx = Fixture::new(&[5]);
        fx.request(&LegacyParamRequest::read_index(5, 0)).unwrap();
        fx.count(5, &["a"]);
        fx.request(&LegacyParamRequest::list(5)).unwrap();
        fx.transport.reject = true;
        fx.list_steps();
        assert_eq!(fx.bridge.flow(), ParamFlow::Idle);
    }

    #[test]
    fn test_list_all_with_no_known_nodes_ends_immediately() {
        let mut fx = Fixture::new(&[]);
        fx.request(&LegacyParamRequest::list(0)).unwrap();
        assert_eq!(fx.bridge.flow(), ParamFlow::Idle);
        assert!(fx.transport.calls.is_empty());
    }

    #[test]
    fn test_list_step_failure_skips_index() {
        let mut fx = Fixture::new(&[5]);
        fx.request(&LegacyParamRequest::read_index(5, 0)).unwrap();
        fx.count(5, &["a", "b"]);
        fx.request(&LegacyParamRequest::list(5)).unwrap();
        fx.list_steps();
        fx.reply(Err(CallFailure::Rejected {
            reason: "busy".into(),
        }));
        assert!(fx.bridge.is_listing());
        assert_eq!(fx.bridge.cursor().index, 1);
        fx.list_steps();
        fx.reply(Ok(named("b", Value::Integer(3))));
        assert_eq!(fx.values.take().unwrap().param_index, 1);
    }

    #[test]
    fn test_count_stops_at_last_index() {
        let mut fx = Fixture::new(&[5]);
        fx.bridge.flow = ParamFlow::Counting {
            node: node(5),
            listing: false,
        };
        fx.bridge
            .client
            .call(
                &mut fx.transport,
                node(5),
                GetSetRequest::by_index(u16::MAX),
                Step::Count(u16::MAX),
            )
            .unwrap();
        fx.reply(Ok(named("z", Value::Integer(0))));
        assert_eq!(fx.bridge.count(node(5)), u16::MAX);
        assert_eq!(fx.bridge.flow(), ParamFlow::Idle);
        assert_eq!(fx.transport.calls.len(), 1);
    }

    #[test]
    fn test_list_all_fetch_rejected_on_later_node_aborts() {
        let mut fx = Fixture::new(&[2, 9]);
        fx.request(&LegacyParamRequest::read_index(2, 0)).unwrap();
        fx.count(2, &["a"]);
        fx.request(&LegacyParamRequest::read_index(9, 0)).unwrap();
        fx.count(9, &["x", "y"]);

        fx.request(&LegacyParamRequest::list(0)).unwrap();
        fx.list_steps();
        fx.reply(Ok(named("a", Value::Integer(1))));

        fx.transport.reject = true;
        fx.list_steps();
        assert_eq!(fx.bridge.cursor().node, node(9));
        assert_eq!(fx.bridge.flow(), ParamFlow::Idle);
        assert_eq!(fx.values.pending(), 1);
    }

    #[test]
    fn test_list_all_skips_later_node_that_cannot_be_counted() {
        let mut fx = Fixture::new(&[2, 9]);
        fx.request(&LegacyParamRequest::read_index(2, 0)).unwrap();
        fx.count(2, &["a"]);

        fx.request(&LegacyParamRequest::list(0)).unwrap();
        fx.list_steps();
        fx.reply(Ok(named("a", Value::Integer(1))));

        fx.transport.reject = true;
        fx.list_steps();
        assert!(fx.bridge.is_listing());
        assert_eq!(fx.bridge.count(node(9)), 0);

        fx.transport.reject = false;
        fx.list_steps();
        assert_eq!(fx.bridge.flow(), ParamFlow::Idle);
        assert!(fx.transport.calls.iter().all(|c| c.target == node(2)));
        assert_eq!(fx.values.pending(), 1);
    }
}
