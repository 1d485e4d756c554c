use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::command::CommandDispatcher;
use crate::config::{self, BridgeConfig};
use crate::directory::{BusContext, NodeDirectory};
use crate::enumeration::EnumerationDriver;
use crate::error::{Error, Result};
use crate::legacy::{ArmedState, LegacyParamRequest, LegacyParamValue, VehicleCommand};
use crate::param::ParameterBridge;
use crate::service::{CallCounter, CallKind};
use crate::topic::{Subscriber, Topic};
use crate::transport::{BusEvent, EventSink, Transport};
use crate::Builder;

/// The topics the bridge talks to the rest of the vehicle through.
#[derive(Clone)]
pub struct BridgeTopics {
    pub param_request: Topic<LegacyParamRequest>,
    pub vehicle_command: Topic<VehicleCommand>,
    pub armed: Topic<ArmedState>,
    pub param_value: Topic<LegacyParamValue>,
}

impl BridgeTopics {
    pub fn new(depth: usize) -> Self {
        Self {
            param_request: Topic::new("uavcan_parameter_request", depth),
            vehicle_command: Topic::new("vehicle_command", depth),
            armed: Topic::new("actuator_armed", depth),
            param_value: Topic::new("uavcan_parameter_value", depth),
        }
    }
}

struct Inbound {
    param_request: Subscriber<LegacyParamRequest>,
    vehicle_command: Subscriber<VehicleCommand>,
    armed: Subscriber<ArmedState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ExitReason {
    #[strum(serialize = "system armed")]
    Armed,
    #[strum(serialize = "shutdown requested")]
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Continue,
    Exit(ExitReason),
}

/// The cooperative loop driving every flow of the bridge.
pub struct Orchestrator {
    config: BridgeConfig,
    transport: Box<dyn Transport>,
    directory: Box<dyn NodeDirectory>,
    sink: EventSink,
    events: flume::Receiver<BusEvent>,
    medium: Arc<Mutex<()>>,
    refresh: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    topics: BridgeTopics,
    inbound: Inbound,
    params: ParameterBridge,
    commands: CommandDispatcher,
    enumeration: EnumerationDriver,
}

impl Orchestrator {
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn topics(&self) -> &BridgeTopics {
        &self.topics
    }

    pub fn parameters(&self) -> &ParameterBridge {
        &self.params
    }

    pub fn commands(&self) -> &CommandDispatcher {
        &self.commands
    }

    pub fn enumeration(&self) -> &EnumerationDriver {
        &self.enumeration
    }

    /// Ask the next tick to drop all cached node metadata.
    pub fn request_node_refresh(&self) {
        self.refresh.store(true, Ordering::Release);
    }

    /// Run one iteration of the loop.
    pub fn tick(&mut self) -> Tick {
        if self.shutdown.load(Ordering::Acquire) {
            return Tick::Exit(ExitReason::Shutdown);
        }

        let medium = self.medium.clone();
        let _medium = medium.lock();

        if self.refresh.swap(false, Ordering::AcqRel) {
            info!("[LOOP] refreshing remote node info");
            self.directory.invalidate_all();
        }

        if let Err(e) = self.transport.spin(self.config.spin_interval(), &self.sink) {
            warn!("[LOOP] {e}");
        }

        let mut bus = BusContext {
            transport: &mut *self.transport,
            directory: &*self.directory,
            local: self.config.local_node(),
        };

        while let Ok(event) = self.events.try_recv() {
            match event {
                BusEvent::Completion(completion) => match completion.kind {
                    CallKind::ParamGetSet => self.params.on_completion(completion, &mut bus),
                    CallKind::EnumerationBegin
                    | CallKind::EnumerationGetSet
                    | CallKind::EnumerationSave => {
                        self.enumeration.on_completion(completion, &mut bus)
                    }
                    CallKind::RestartNode | CallKind::ExecuteOpcode => {
                        self.commands.on_completion(completion)
                    }
                },
                BusEvent::Indication(indication) => {
                    self.enumeration.on_indication(&indication, &mut bus)
                }
            }
        }

        if self.params.accepts_requests() {
            if let Some(req) = self.inbound.param_request.take() {
                // failures are logged by the bridge and end the request
                let _ = self.params.handle_request(&req, &mut bus);
            }
        }

        self.params.advance_list(&mut bus);
        self.params.request_next(&mut bus);

        if self.commands.is_idle() {
            if let Some(cmd) = self.inbound.vehicle_command.take() {
                // the dispatcher logs refusals and send failures
                let _ = self.commands.handle(&cmd, &mut self.enumeration, &mut bus);
            }
        }

        if let Some(state) = self.inbound.armed.take() {
            if state.is_flight_armed() {
                return Tick::Exit(ExitReason::Armed);
            }
            debug!("[LOOP] armed state {state:?}, still running");
        }

        Tick::Continue
    }

    /// Run on the calling thread until armed or stopped.
    pub fn run(mut self) -> ExitReason {
        info!("[LOOP] bridge running");
        loop {
            if let Tick::Exit(reason) = self.tick() {
                info!("[LOOP] {reason}, exiting");
                return reason;
            }
        }
    }

    /// Run on a dedicated worker thread.
    pub fn spawn(self) -> Result<BridgeHandle> {
        let refresh = self.refresh.clone();
        let shutdown = self.shutdown.clone();
        let worker = std::thread::Builder::new()
            .name("uavcan_bridge".to_string())
            .spawn(move || self.run())
            .map_err(Error::Spawn)?;
        Ok(BridgeHandle {
            refresh,
            shutdown,
            worker: Some(worker),
        })
    }
}

/// Control of an orchestrator running on its own thread.
pub struct BridgeHandle {
    refresh: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<ExitReason>>,
}

impl BridgeHandle {
    pub fn request_node_refresh(&self) {
        self.refresh.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Stop the loop and wait for the worker to exit.
    ///
    /// Returns why the loop ended, which may be [`ExitReason::Armed`] if it
    /// had already exited on its own.
    pub fn stop(mut self) -> Result<ExitReason> {
        self.shutdown.store(true, Ordering::Release);
        self.join_worker()
    }

    fn join_worker(&mut self) -> Result<ExitReason> {
        match self.worker.take() {
            Some(worker) => worker.join().map_err(|_| Error::WorkerPanicked),
            None => Ok(ExitReason::Shutdown),
        }
    }
}

impl Drop for BridgeHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Err(e) = self.join_worker() {
            warn!("[LOOP] {e}");
        }
    }
}

/// Assembles an [`Orchestrator`].
///
/// A transport and a node directory are required; everything else has a
/// default.
#[derive(Default)]
pub struct BridgeBuilder {
    config: Option<BridgeConfig>,
    config_file: Option<PathBuf>,
    overrides: Vec<(String, serde_json::Value)>,
    invalid: Option<Error>,
    transport: Option<Box<dyn Transport>>,
    directory: Option<Box<dyn NodeDirectory>>,
    topics: Option<BridgeTopics>,
    medium: Option<Arc<Mutex<()>>>,
}

impl BridgeBuilder {
    pub fn with_config(mut self, config: BridgeConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Load configuration from a JSON5 file.
    pub fn with_config_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config_file = Some(path.into());
        self
    }

    /// Override one configuration field.
    ///
    /// ```rust,ignore
    /// let orchestrator = BridgeBuilder::default()
    ///     .with_json("local_node_id", 1)
    ///     .with_json("spin_interval_ms", 5)
    ///     ...
    /// ```
    pub fn with_json<K: Into<String>, V: serde::Serialize>(mut self, key: K, value: V) -> Self {
        match serde_json::to_value(&value) {
            Ok(value) => self.overrides.push((key.into(), value)),
            Err(e) => self.invalid = Some(e.into()),
        }
        self
    }

    pub fn with_transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Box::new(transport));
        self
    }

    pub fn with_directory(mut self, directory: impl NodeDirectory + 'static) -> Self {
        self.directory = Some(Box::new(directory));
        self
    }

    pub fn with_topics(mut self, topics: BridgeTopics) -> Self {
        self.topics = Some(topics);
        self
    }

    /// Lock shared with whatever else drives the same bus medium. Held for
    /// the whole of every tick.
    pub fn with_medium_lock(mut self, medium: Arc<Mutex<()>>) -> Self {
        self.medium = Some(medium);
        self
    }
}

impl Builder for BridgeBuilder {
    type Output = Orchestrator;

    #[tracing::instrument(name = "bridge_build", skip(self), fields(
        config_file = ?self.config_file
    ))]
    fn build(self) -> Result<Orchestrator> {
        if let Some(e) = self.invalid {
            return Err(e);
        }
        let config = config::load(self.config, self.config_file.as_deref(), &self.overrides)?;
        let transport = self
            .transport
            .ok_or(Error::MissingCollaborator("transport"))?;
        let directory = self
            .directory
            .ok_or(Error::MissingCollaborator("node directory"))?;
        let topics = self
            .topics
            .unwrap_or_else(|| BridgeTopics::new(config.topic_depth));

        let inbound = Inbound {
            param_request: topics.param_request.subscribe(),
            vehicle_command: topics.vehicle_command.subscribe(),
            armed: topics.armed.subscribe(),
        };

        let counter = Arc::new(CallCounter::default());
        let (sink, events) = EventSink::channel();
        debug!("[LOOP] built with {config:?}");

        Ok(Orchestrator {
            params: ParameterBridge::new(counter.clone(), topics.param_value.clone()),
            commands: CommandDispatcher::new(counter.clone()),
            enumeration: EnumerationDriver::new(
                config.esc_parameter_name.clone(),
                config.enumeration_timeout_sec,
                config.claim_concurrency,
                counter,
            ),
            config,
            transport,
            directory,
            sink,
            events,
            medium: self.medium.unwrap_or_default(),
            refresh: Arc::default(),
            shutdown: Arc::default(),
            topics,
            inbound,
        })
    }
}
