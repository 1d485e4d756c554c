use std::thread;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use uavcan_bridge::prelude::*;

#[derive(Debug, Parser)]
struct Args {
    #[arg(long, default_value_t = 3, help = "Plain nodes exposing parameters")]
    nodes: u8,

    #[arg(long, default_value_t = 4, help = "Speed controllers to enumerate")]
    escs: u8,

    #[arg(long, default_value_t = 5, help = "Parameters per plain node")]
    params: usize,

    #[arg(long, help = "JSON5 configuration file")]
    config: Option<String>,

    #[arg(short, long, help = "Enable debug logging")]
    debug: bool,
}

fn init_logger(debug: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug {
            EnvFilter::new("uavcan_bridge=debug,sim_bridge=debug")
        } else {
            EnvFilter::new("uavcan_bridge=info,sim_bridge=info")
        }
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

fn wait(ms: u64) {
    thread::sleep(Duration::from_millis(ms));
}

fn sim_node(id: u8) -> Result<NodeId> {
    NodeId::new(id).ok_or_else(|| Error::InvalidConfig(format!("too many nodes for id {id}")))
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(args.debug);

    let network = SimNetwork::new();
    network.set_realtime(true);

    let mut id = 10u8;
    for _ in 0..args.nodes {
        let node = (0..args.params).fold(SimNode::new(), |sim, i| {
            sim.with_param(format!("param_{i}"), Value::Integer(i as i64))
        });
        network.add_node(sim_node(id)?, node);
        id = id.saturating_add(1);
    }
    let mut escs = Vec::new();
    for _ in 0..args.escs {
        let esc = sim_node(id)?;
        network.add_node(esc, SimNode::esc());
        escs.push(esc);
        id = id.saturating_add(1);
    }

    let mut builder = BridgeBuilder::default()
        .with_transport(network.transport())
        .with_directory(network.directory())
        .with_json("topic_depth", 16);
    if let Some(path) = &args.config {
        builder = builder.with_config_file(path);
    }
    let orchestrator = builder.build()?;

    let topics = orchestrator.topics().clone();
    let requests = topics.param_request.advertise();
    let commands = topics.vehicle_command.advertise();
    let values = topics.param_value.subscribe();

    let bridge = orchestrator.spawn()?;

    // counts each node on the way, then lists its parameters
    requests.publish(&LegacyParamRequest::list(0));

    while let Some(value) = values.recv_timeout(Duration::from_millis(500)) {
        println!(
            "node {:>3} #{:<3} {:<16} = {}",
            value.node_id,
            value.param_index,
            value.param_id,
            match value.param_type {
                ParamType::Real32 => value.real_value.to_string(),
                _ => value.int_value.to_string(),
            }
        );
    }

    commands.publish(&VehicleCommand::preflight_uavcan(
        BridgeCommand::StartEnumeration as i32,
        0,
    ));
    wait(100);
    for esc in &escs {
        println!("pressing {esc}");
        network.press(*esc);
        wait(100);
    }
    wait(200);

    println!("beeps: {:?}", network.beeps());
    for esc in &escs {
        let index = network.node(*esc).and_then(|sim| sim.param("esc_index"));
        println!("node {esc}: esc_index {index:?}");
    }

    let reason = bridge.stop()?;
    println!("bridge stopped: {reason}");
    Ok(())
}
