//! Control task: pulse engine tick, configuration writes and status.
//!
//! Commands arrive over an `mpsc` channel from [`BridgeClient`] and are
//! answered on `oneshot` channels. The pulse engine is owned here, so no
//! peripheral write ever happens from the network task.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use windbridge_core::{
    load_config, ConfigError, ConfigStorage, ConnectionProfile, DisplayConfig, NetworkConfig,
    OutputDriver, OutputError, PulseEngine, PulseOutput, SharedState, DISPLAY_COUNT,
};

use crate::clock::Clock;
use crate::pause::{PauseController, PAUSE_ACK_TIMEOUT};
use crate::status::StatusSnapshot;

/// Interval of the periodic pulse refresh.
pub const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Errors returned by control operations.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("Invalid display index {0}")]
    InvalidDisplay(usize),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Output error: {0}")]
    Output(#[from] OutputError),

    #[error("Control task stopped")]
    Stopped,
}

type Reply<T> = oneshot::Sender<Result<T, ControlError>>;

/// Requests handled by the control task.
#[derive(Debug)]
pub enum ControlCommand {
    /// Reload everything from storage and re-drive all displays.
    LoadConfig { reply: Reply<()> },
    /// Persist and apply a display configuration.
    SaveDisplayConfig {
        index: usize,
        config: DisplayConfig,
        reply: Reply<DisplayConfig>,
    },
    /// Enable or disable a display, persisting the flag.
    SetEnabled {
        index: usize,
        enabled: bool,
        reply: Reply<()>,
    },
    StartDisplay { index: usize, reply: Reply<()> },
    StopDisplay { index: usize, reply: Reply<()> },
    UpdateDisplayPulse {
        index: usize,
        reply: Reply<PulseOutput>,
    },
    /// Replace the network configuration behind the pause handshake.
    BindTransport {
        network: NetworkConfig,
        reply: Reply<bool>,
    },
    /// Drive a display to a test angle.
    GotoAngle {
        index: usize,
        angle_deg: f32,
        reply: Reply<PulseOutput>,
    },
    /// Hold a display's reading while NMEA keeps flowing. Not persisted.
    SetFreeze {
        index: usize,
        freeze: bool,
        reply: Reply<()>,
    },
    Status {
        reply: oneshot::Sender<StatusSnapshot>,
    },
}

fn check_index(index: usize) -> Result<(), ControlError> {
    if index < DISPLAY_COUNT {
        Ok(())
    } else {
        Err(ControlError::InvalidDisplay(index))
    }
}

/// The control task.
pub struct ControlTask<O: OutputDriver, S: ConfigStorage> {
    state: SharedState,
    engine: PulseEngine<O>,
    storage: Arc<S>,
    pause: PauseController,
    commands: mpsc::Receiver<ControlCommand>,
    shutdown: watch::Receiver<bool>,
    clock: Clock,
}

impl<O: OutputDriver, S: ConfigStorage> ControlTask<O, S> {
    pub fn new(
        state: SharedState,
        output: O,
        storage: Arc<S>,
        pause: PauseController,
        commands: mpsc::Receiver<ControlCommand>,
        shutdown: watch::Receiver<bool>,
        clock: Clock,
    ) -> Self {
        Self {
            state,
            engine: PulseEngine::new(output),
            storage,
            pause,
            commands,
            shutdown,
            clock,
        }
    }

    /// Run until shutdown is signalled or every client is gone.
    pub async fn run(mut self) {
        info!("Control task started");
        let mut tick = tokio::time::interval(TICK_INTERVAL);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                _ = tick.tick() => self.update_all_display_pulses(),
            }
        }

        for index in 0..DISPLAY_COUNT {
            self.engine.stop_display(index);
        }
        self.pause.resume();
        info!("Control task stopped");
    }

    async fn handle(&mut self, command: ControlCommand) {
        match command {
            ControlCommand::LoadConfig { reply } => {
                let result = self.load_config().await;
                let _ = reply.send(result);
            }
            ControlCommand::SaveDisplayConfig {
                index,
                config,
                reply,
            } => {
                let _ = reply.send(self.save_display_config(index, config));
            }
            ControlCommand::SetEnabled {
                index,
                enabled,
                reply,
            } => {
                let result = self.display_config(index).and_then(|mut config| {
                    config.enabled = enabled;
                    self.persist_display_config(index, &config)?;
                    self.state.set_display_config(index, config.clone());
                    self.restart_display(index, &config)
                });
                let _ = reply.send(result);
            }
            ControlCommand::StartDisplay { index, reply } => {
                let _ = reply.send(self.start_display(index));
            }
            ControlCommand::StopDisplay { index, reply } => {
                let result = check_index(index).map(|()| self.engine.stop_display(index));
                let _ = reply.send(result);
            }
            ControlCommand::UpdateDisplayPulse { index, reply } => {
                let _ = reply.send(self.update_display_pulse(index));
            }
            ControlCommand::BindTransport { network, reply } => {
                let result = self.bind_transport(network).await;
                let _ = reply.send(result);
            }
            ControlCommand::GotoAngle {
                index,
                angle_deg,
                reply,
            } => {
                let _ = reply.send(self.goto_angle(index, angle_deg));
            }
            ControlCommand::SetFreeze {
                index,
                freeze,
                reply,
            } => {
                let result = self.modify_display(index, |c| c.freeze = freeze).map(|_| ());
                let _ = reply.send(result);
            }
            ControlCommand::Status { reply } => {
                let status = StatusSnapshot::capture(&self.state.snapshot(), &self.engine, self.clock.now_ms());
                let _ = reply.send(status);
            }
        }
    }

    async fn load_config(&mut self) -> Result<(), ControlError> {
        let config = load_config(&*self.storage)?;
        for (index, display) in config.displays.into_iter().enumerate() {
            self.state.set_display_config(index, display);
        }
        self.state.set_stale_after_ms(config.stale_after_ms);
        self.replace_network(config.network).await;
        info!("Configuration loaded");

        for index in 0..DISPLAY_COUNT {
            if let Some(display) = self.state.display(index) {
                self.restart_display(index, &display.config)?;
            }
        }
        Ok(())
    }

    fn save_display_config(
        &mut self,
        index: usize,
        config: DisplayConfig,
    ) -> Result<DisplayConfig, ControlError> {
        check_index(index)?;
        let config = config.clamped();
        self.persist_display_config(index, &config)?;
        self.state.set_display_config(index, config.clone());
        debug!("Saved display {} configuration", index + 1);
        self.restart_display(index, &config)?;
        Ok(config)
    }

    /// Write a display configuration to storage, without the runtime-only
    /// freeze flag.
    fn persist_display_config(&self, index: usize, config: &DisplayConfig) -> Result<(), ControlError> {
        let stored = DisplayConfig {
            freeze: false,
            ..config.clone()
        };
        self.storage.save_display_config(index, &stored)?;
        Ok(())
    }

    fn display_config(&self, index: usize) -> Result<DisplayConfig, ControlError> {
        self.state
            .display(index)
            .map(|display| display.config)
            .ok_or(ControlError::InvalidDisplay(index))
    }

    /// Apply `change` to a display's live configuration and return the result.
    fn modify_display(
        &mut self,
        index: usize,
        change: impl FnOnce(&mut DisplayConfig),
    ) -> Result<DisplayConfig, ControlError> {
        let mut config = self.display_config(index)?;
        change(&mut config);
        self.state.set_display_config(index, config.clone());
        Ok(config)
    }

    /// Stop the display, then bring it back up if it is enabled.
    fn restart_display(&mut self, index: usize, config: &DisplayConfig) -> Result<(), ControlError> {
        self.engine.stop_display(index);
        if config.enabled {
            self.engine.start_display(index, config)?;
            self.update_display_pulse(index)?;
        }
        Ok(())
    }

    fn start_display(&mut self, index: usize) -> Result<(), ControlError> {
        let display = self
            .state
            .display(index)
            .ok_or(ControlError::InvalidDisplay(index))?;
        if display.config.enabled {
            self.engine.start_display(index, &display.config)?;
        }
        Ok(())
    }

    fn update_display_pulse(&mut self, index: usize) -> Result<PulseOutput, ControlError> {
        let display = self
            .state
            .display(index)
            .ok_or(ControlError::InvalidDisplay(index))?;
        let stale_after_ms = self.state.stale_after_ms();
        let output =
            self.engine
                .update_display_pulse(index, &display, self.clock.now_ms(), stale_after_ms)?;
        Ok(output)
    }

    fn update_all_display_pulses(&mut self) {
        for index in 0..DISPLAY_COUNT {
            if let Err(e) = self.update_display_pulse(index) {
                warn!("Display {} update failed: {}", index + 1, e);
            }
        }
    }

    async fn bind_transport(&mut self, network: NetworkConfig) -> Result<bool, ControlError> {
        self.storage.save_network_config(&network)?;
        Ok(self.replace_network(network).await)
    }

    /// Swap the network configuration while the network task is parked.
    async fn replace_network(&mut self, network: NetworkConfig) -> bool {
        if !self.pause.pause(PAUSE_ACK_TIMEOUT).await {
            warn!("Network task did not acknowledge pause within {:?}", PAUSE_ACK_TIMEOUT);
        }
        let changed = self.state.replace_network(network);
        self.pause.resume();
        if changed {
            let (endpoint, _) = self.state.active_endpoint();
            info!("Active endpoint now {}", endpoint);
        }
        changed
    }

    fn goto_angle(&mut self, index: usize, angle_deg: f32) -> Result<PulseOutput, ControlError> {
        check_index(index)?;
        let angle = if angle_deg.is_finite() {
            angle_deg.clamp(0.0, 359.0)
        } else {
            0.0
        };
        self.modify_display(index, |c| c.manual_test_angle = angle as u16)?;
        self.state.set_display_angle(index, angle, self.clock.now_ms());
        self.update_display_pulse(index)
    }
}

/// Cloneable client of the control task.
#[derive(Debug, Clone)]
pub struct BridgeClient {
    commands: mpsc::Sender<ControlCommand>,
    state: SharedState,
}

impl BridgeClient {
    pub fn new(commands: mpsc::Sender<ControlCommand>, state: SharedState) -> Self {
        Self { commands, state }
    }

    /// Shared state for direct read-only queries.
    pub fn state(&self) -> &SharedState {
        &self.state
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> ControlCommand,
    ) -> Result<T, ControlError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| ControlError::Stopped)?;
        response.await.map_err(|_| ControlError::Stopped)?
    }

    pub async fn load_config(&self) -> Result<(), ControlError> {
        self.request(|reply| ControlCommand::LoadConfig { reply }).await
    }

    /// Persist and apply `config`; returns the clamped configuration.
    pub async fn save_display_config(
        &self,
        index: usize,
        config: DisplayConfig,
    ) -> Result<DisplayConfig, ControlError> {
        self.request(|reply| ControlCommand::SaveDisplayConfig {
            index,
            config,
            reply,
        })
        .await
    }

    pub async fn set_enabled(&self, index: usize, enabled: bool) -> Result<(), ControlError> {
        self.request(|reply| ControlCommand::SetEnabled {
            index,
            enabled,
            reply,
        })
        .await
    }

    pub async fn start_display(&self, index: usize) -> Result<(), ControlError> {
        self.request(|reply| ControlCommand::StartDisplay { index, reply })
            .await
    }

    pub async fn stop_display(&self, index: usize) -> Result<(), ControlError> {
        self.request(|reply| ControlCommand::StopDisplay { index, reply })
            .await
    }

    pub async fn update_display_pulse(&self, index: usize) -> Result<PulseOutput, ControlError> {
        self.request(|reply| ControlCommand::UpdateDisplayPulse { index, reply })
            .await
    }

    /// Apply and persist `network`; returns whether the active endpoint
    /// changed.
    pub async fn bind_transport(&self, network: NetworkConfig) -> Result<bool, ControlError> {
        self.request(|reply| ControlCommand::BindTransport { network, reply })
            .await
    }

    /// Make `slot` the active connection profile.
    pub async fn switch_profile(&self, slot: usize) -> Result<bool, ControlError> {
        let mut network = self.state.network_config();
        network.set_active(slot)?;
        self.bind_transport(network).await
    }

    /// Replace the profile in `slot`, recording it in the history.
    pub async fn save_profile(
        &self,
        slot: usize,
        profile: ConnectionProfile,
    ) -> Result<bool, ControlError> {
        let mut network = self.state.network_config();
        network.set_profile(slot, profile)?;
        self.bind_transport(network).await
    }

    pub async fn goto_angle(&self, index: usize, angle_deg: f32) -> Result<PulseOutput, ControlError> {
        self.request(|reply| ControlCommand::GotoAngle {
            index,
            angle_deg,
            reply,
        })
        .await
    }

    pub async fn set_freeze(&self, index: usize, freeze: bool) -> Result<(), ControlError> {
        self.request(|reply| ControlCommand::SetFreeze {
            index,
            freeze,
            reply,
        })
        .await
    }

    pub async fn status(&self) -> Result<StatusSnapshot, ControlError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(ControlCommand::Status { reply })
            .await
            .map_err(|_| ControlError::Stopped)?;
        response.await.map_err(|_| ControlError::Stopped)
    }
}
