//! Parameter count, get/set and list flows driven through the full loop.

mod common;

use common::{Harness, node, node_with_params};
use uavcan_bridge::msg::RequestPayload;
use uavcan_bridge::prelude::*;
use uavcan_bridge::service::CallKind;

/// `(target, index)` of every parameter get/set issued so far.
fn getset_log(h: &Harness) -> Vec<(u8, u16)> {
    h.network
        .calls_of(CallKind::ParamGetSet)
        .iter()
        .map(|c| match &c.request {
            RequestPayload::GetSet(r) => (c.target.get(), r.index),
            other => panic!("unexpected request {other:?}"),
        })
        .collect()
}

#[test]
fn test_request_for_uncounted_node_only_counts() {
    let mut h = Harness::new(vec![(5, node_with_params(7))]);

    h.requests.publish(&LegacyParamRequest::read_index(5, 3));
    h.tick();
    assert!(h.orchestrator.parameters().is_counting());
    h.settle();

    assert_eq!(h.orchestrator.parameters().count(node(5)), 7);
    // the read is not replayed once the count is known
    assert!(h.published().is_empty());
    let expected: Vec<(u8, u16)> = (0..=7).map(|i| (5, i)).collect();
    assert_eq!(getset_log(&h), expected);

    // the requester has to ask again
    h.requests.publish(&LegacyParamRequest::read_index(5, 3));
    h.settle();
    let values = h.published();
    assert_eq!(values.len(), 1);
    assert_eq!(values[0].param_id, "p3");
    assert_eq!(values[0].param_index, 3);
    assert_eq!(values[0].param_count, 7);
    assert_eq!(values[0].int_value, 30);
}

#[test]
fn test_list_all_nodes_in_address_order() {
    let mut h = Harness::new(vec![(9, node_with_params(2)), (2, node_with_params(3))]);

    h.requests.publish(&LegacyParamRequest::list(0));
    h.tick();
    assert!(h.orchestrator.parameters().is_listing());
    h.settle();

    let visited: Vec<_> = h
        .published()
        .iter()
        .map(|v| (v.node_id, v.param_index))
        .collect();
    assert_eq!(visited, vec![(2, 0), (2, 1), (2, 2), (9, 0), (9, 1)]);

    #[rustfmt::skip]
    let expected: [(u8, u16); 12] = [
        // count node 2, then fetch
        (2, 0), (2, 1), (2, 2), (2, 3),
        (2, 0), (2, 1), (2, 2),
        // count node 9, then fetch
        (9, 0), (9, 1), (9, 2),
        (9, 0), (9, 1),
    ];
    assert_eq!(getset_log(&h), expected);
    assert_eq!(h.orchestrator.parameters().count(node(2)), 3);
    assert_eq!(h.orchestrator.parameters().count(node(9)), 2);
}

#[test]
fn test_list_all_skips_node_that_cannot_be_counted() {
    let mut h = Harness::new(vec![(2, node_with_params(1)), (9, node_with_params(2))]);
    h.network.set_failure(node(9), Some(CallFailure::Timeout));

    h.requests.publish(&LegacyParamRequest::list(0));
    h.settle();

    let nodes: Vec<_> = h.published().iter().map(|v| v.node_id).collect();
    assert_eq!(nodes, vec![2]);
    assert_eq!(h.orchestrator.parameters().count(node(9)), 0);
}

#[test]
fn test_list_all_excludes_local_node() {
    let mut h = Harness::with_builder(
        vec![(1, node_with_params(2)), (9, node_with_params(1))],
        |b| b.with_json("local_node_id", 1),
    );
    h.requests.publish(&LegacyParamRequest::list(0));
    h.settle();
    let nodes: Vec<_> = h.published().iter().map(|v| v.node_id).collect();
    assert_eq!(nodes, vec![9]);
}

#[test]
fn test_list_known_node_uses_cached_count() {
    let mut h = Harness::new(vec![(4, node_with_params(2))]);
    h.requests.publish(&LegacyParamRequest::list(4));
    h.settle();
    // first request only counted
    assert!(h.published().is_empty());

    h.requests.publish(&LegacyParamRequest::list(4));
    h.settle();
    let indices: Vec<_> = h.published().iter().map(|v| v.param_index).collect();
    assert_eq!(indices, vec![0, 1]);
    assert_eq!(getset_log(&h).len(), 3 + 2);
}

#[test]
fn test_write_by_name_sets_typed_value() {
    let mut h = Harness::new(vec![(
        7,
        SimNode::new()
            .with_param("gain", Value::Real(0.5))
            .with_param("armed_beep", Value::Boolean(false)),
    )]);
    h.requests.publish(&LegacyParamRequest::read_index(7, 0));
    h.settle();

    h.requests.publish(&LegacyParamRequest::write_real(
        7,
        ParamSelector::Name("gain"),
        1.25,
    ));
    h.settle();
    h.requests.publish(&LegacyParamRequest::write_int(
        7,
        ParamSelector::Name("armed_beep"),
        ParamType::Uint8,
        1,
    ));
    h.settle();

    let sim = h.network.node(node(7)).unwrap();
    assert_eq!(sim.param("gain"), Some(Value::Real(1.25)));
    assert_eq!(sim.param("armed_beep"), Some(Value::Boolean(true)));

    let values = h.published();
    assert_eq!(values.len(), 2);
    assert_eq!(values[0].param_type, ParamType::Real32);
    assert_eq!(values[0].param_index, -1);
    assert_eq!(values[1].param_type, ParamType::Uint8);
    assert_eq!(values[1].int_value, 1);
}

#[test]
fn test_requests_wait_while_a_flow_is_active() {
    let mut h = Harness::new(vec![(5, node_with_params(3))]);
    h.requests.publish(&LegacyParamRequest::read_index(5, 0));
    h.settle();

    h.network.hold(true);
    h.requests.publish(&LegacyParamRequest::read_index(5, 1));
    h.requests.publish(&LegacyParamRequest::read_index(5, 2));
    h.ticks(5);
    assert!(h.orchestrator.parameters().is_fetching());
    assert_eq!(h.network.in_flight(), 1);

    h.network.hold(false);
    h.settle();
    h.settle();
    let indices: Vec<_> = h.published().iter().map(|v| v.param_index).collect();
    assert_eq!(indices, vec![1, 2]);
}

#[test]
fn test_failed_get_still_clears_flow() {
    let mut h = Harness::new(vec![(5, node_with_params(3))]);
    h.requests.publish(&LegacyParamRequest::read_index(5, 0));
    h.settle();

    h.network.set_failure(
        node(5),
        Some(CallFailure::Rejected {
            reason: "locked".into(),
        }),
    );
    h.requests.publish(&LegacyParamRequest::read_index(5, 1));
    h.settle();
    assert!(h.published().is_empty());
    // a failed single get/set leaves the cached count alone
    assert_eq!(h.orchestrator.parameters().count(node(5)), 3);
    assert_eq!(h.orchestrator.parameters().cursor().index, 2);
}

#[test]
fn test_submission_failure_is_not_retried() {
    let mut h = Harness::new(vec![(5, node_with_params(3))]);
    h.network.set_reject_submissions(true);
    h.requests.publish(&LegacyParamRequest::read_index(5, 0));
    h.ticks(3);
    assert_eq!(h.orchestrator.parameters().flow(), ParamFlow::Idle);
    assert!(h.network.calls().is_empty());
    assert_eq!(h.orchestrator.parameters().count(node(5)), 0);
}
