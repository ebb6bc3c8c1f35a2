//! Bridge startup: shared state, both tasks and their handles.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use windbridge_core::state::BridgeState;
use windbridge_core::{load_config, BridgeConfig, ConfigError, ConfigStorage, OutputDriver, SharedState};
use windbridge_providers::TransportOptions;

use crate::clock::Clock;
use crate::control::{BridgeClient, ControlTask};
use crate::network::NetworkTask;
use crate::pause::pause_gate;

/// Runtime options of the bridge.
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    pub transport: TransportOptions,
    /// Capacity of the control command queue.
    pub command_capacity: usize,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            transport: TransportOptions::default(),
            command_capacity: 32,
        }
    }
}

/// A configured bridge, ready to spawn its tasks.
pub struct WindBridge<O, S> {
    config: BridgeConfig,
    output: O,
    storage: Arc<S>,
    options: BridgeOptions,
}

impl<O, S> WindBridge<O, S>
where
    O: OutputDriver + 'static,
    S: ConfigStorage + 'static,
{
    pub fn new(config: BridgeConfig, output: O, storage: Arc<S>) -> Self {
        Self {
            config,
            output,
            storage,
            options: BridgeOptions::default(),
        }
    }

    /// Build a bridge from the persisted configuration.
    pub fn from_storage(output: O, storage: Arc<S>) -> Result<Self, ConfigError> {
        let config = load_config(&*storage)?;
        Ok(Self::new(config, output, storage))
    }

    pub fn with_options(mut self, options: BridgeOptions) -> Self {
        self.options = options;
        self
    }

    /// Spawn the network and control tasks on the current runtime.
    pub fn spawn(self) -> BridgeHandle {
        let state = SharedState::new(BridgeState::new(self.config));
        let clock = Clock::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (pause_controller, pause_listener) = pause_gate();
        let (command_tx, command_rx) = mpsc::channel(self.options.command_capacity.max(1));

        let network = NetworkTask::new(
            state.clone(),
            self.options.transport,
            pause_listener,
            shutdown_rx.clone(),
            clock,
        );
        let control = ControlTask::new(
            state.clone(),
            self.output,
            self.storage,
            pause_controller,
            command_rx,
            shutdown_rx,
            clock,
        );

        let network = tokio::spawn(network.run());
        let control = tokio::spawn(control.run());
        info!("Wind bridge started");

        BridgeHandle {
            client: BridgeClient::new(command_tx, state),
            shutdown: shutdown_tx,
            network,
            control,
        }
    }
}

/// Owner of the running tasks.
pub struct BridgeHandle {
    client: BridgeClient,
    shutdown: watch::Sender<bool>,
    network: JoinHandle<()>,
    control: JoinHandle<()>,
}

impl BridgeHandle {
    pub fn client(&self) -> BridgeClient {
        self.client.clone()
    }

    pub fn state(&self) -> &SharedState {
        self.client.state()
    }

    /// Whether either task has exited.
    pub fn is_finished(&self) -> bool {
        self.network.is_finished() || self.control.is_finished()
    }

    /// Signal shutdown and wait for both tasks.
    pub async fn shutdown(self) {
        self.shutdown.send_replace(true);
        for (name, task) in [("network", self.network), ("control", self.control)] {
            if let Err(e) = task.await {
                error!("{} task failed: {}", name, e);
            }
        }
        info!("Wind bridge stopped");
    }
}
