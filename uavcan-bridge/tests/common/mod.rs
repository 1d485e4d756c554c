#![allow(dead_code)]

use uavcan_bridge::prelude::*;

pub fn node(raw: u8) -> NodeId {
    NodeId::new(raw).unwrap()
}

/// An orchestrator wired to a simulated bus, with handles on every topic.
pub struct Harness {
    pub network: SimNetwork,
    pub orchestrator: Orchestrator,
    pub requests: Publisher<LegacyParamRequest>,
    pub commands: Publisher<VehicleCommand>,
    pub armed: Publisher<ArmedState>,
    pub values: Subscriber<LegacyParamValue>,
}

impl Harness {
    pub fn new(nodes: Vec<(u8, SimNode)>) -> Self {
        Self::with_builder(nodes, |b| b)
    }

    pub fn with_builder(
        nodes: Vec<(u8, SimNode)>,
        configure: impl FnOnce(BridgeBuilder) -> BridgeBuilder,
    ) -> Self {
        let network = SimNetwork::new();
        for (id, sim) in nodes {
            network.add_node(node(id), sim);
        }
        let builder = BridgeBuilder::default()
            .with_config(BridgeConfig {
                spin_interval_ms: 1,
                topic_depth: 64,
                ..Default::default()
            })
            .with_transport(network.transport())
            .with_directory(network.directory());
        let orchestrator = configure(builder).build().unwrap();

        let topics = orchestrator.topics().clone();
        Self {
            network,
            requests: topics.param_request.advertise(),
            commands: topics.vehicle_command.advertise(),
            armed: topics.armed.advertise(),
            values: topics.param_value.subscribe(),
            orchestrator,
        }
    }

    pub fn tick(&mut self) -> Tick {
        self.orchestrator.tick()
    }

    pub fn ticks(&mut self, n: usize) {
        for _ in 0..n {
            assert_eq!(self.tick(), Tick::Continue);
        }
    }

    /// Tick until `done` holds, at most `max` times. Returns whether it held.
    pub fn tick_until(&mut self, max: usize, done: impl Fn(&Orchestrator) -> bool) -> bool {
        for _ in 0..max {
            if done(&self.orchestrator) {
                return true;
            }
            self.tick();
        }
        done(&self.orchestrator)
    }

    /// Tick at least once, then until the parameter flow is idle.
    pub fn settle(&mut self) {
        self.tick();
        assert!(
            self.tick_until(500, |o| o.parameters().flow() == ParamFlow::Idle),
            "parameter flow never settled"
        );
    }

    pub fn published(&self) -> Vec<LegacyParamValue> {
        std::iter::from_fn(|| self.values.take()).collect()
    }

    pub fn command(&self, command_id: i32, node_id: i32) {
        self.commands
            .publish(&VehicleCommand::preflight_uavcan(command_id, node_id));
    }
}

/// A node exposing `n` integer parameters named `p0`, `p1`, ...
pub fn node_with_params(n: usize) -> SimNode {
    (0..n).fold(SimNode::new(), |sim, i| {
        sim.with_param(format!("p{i}"), Value::Integer(i as i64 * 10))
    })
}
