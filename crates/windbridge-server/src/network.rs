//! Network task: transport, parser and aggregator writes.

use tokio::sync::watch;
use tracing::{debug, info};

use windbridge_core::state::DropReason;
use windbridge_core::{Endpoint, SharedState};
use windbridge_protocol::parse_line;
use windbridge_providers::{LineEvent, TransportEvent, TransportManager, TransportOptions};

use crate::clock::Clock;
use crate::pause::PauseListener;

/// Owns the transport manager and feeds parsed sentences into the state.
pub struct NetworkTask {
    state: SharedState,
    transport: TransportManager,
    pause: PauseListener,
    shutdown: watch::Receiver<bool>,
    clock: Clock,
    generation: Option<u64>,
}

impl NetworkTask {
    pub fn new(
        state: SharedState,
        options: TransportOptions,
        pause: PauseListener,
        shutdown: watch::Receiver<bool>,
        clock: Clock,
    ) -> Self {
        Self {
            state,
            transport: TransportManager::new(options),
            pause,
            shutdown,
            clock,
            generation: None,
        }
    }

    /// Run until shutdown is signalled.
    pub async fn run(mut self) {
        info!("Network task started");
        loop {
            if *self.shutdown.borrow() {
                break;
            }
            if self.pause.is_requested() {
                debug!("Network task paused");
                self.pause.park().await;
                debug!("Network task resumed");
            }
            self.sync_endpoint();

            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = self.pause.requested() => {}
                event = self.transport.next_event() => self.handle_event(event),
            }
            tokio::task::yield_now().await;
        }

        if let Some(endpoint) = self.transport.endpoint() {
            self.state.set_connected(endpoint.protocol(), false);
        }
        self.transport.close();
        info!("Network task stopped");
    }

    /// Rebind when the active endpoint changed since the last iteration.
    fn sync_endpoint(&mut self) {
        let (endpoint, generation) = self.state.active_endpoint();
        if self.generation == Some(generation) {
            return;
        }
        if let Some(previous) = self.transport.endpoint() {
            if previous.protocol() != endpoint.protocol() {
                self.state.set_connected(previous.protocol(), false);
            }
        }
        self.rebind(endpoint);
        self.generation = Some(generation);
    }

    fn rebind(&mut self, endpoint: Endpoint) {
        self.state.set_connected(endpoint.protocol(), false);
        self.transport.bind(endpoint);
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected(protocol) => self.state.set_connected(protocol, true),
            TransportEvent::Disconnected { protocol, .. } => {
                self.state.set_connected(protocol, false)
            }
            TransportEvent::Lines(lines) => {
                for line in lines {
                    self.handle_line(line);
                }
            }
        }
    }

    fn handle_line(&self, line: LineEvent) {
        let line = match line {
            LineEvent::Line(line) => line,
            LineEvent::TooLong => {
                debug!("Dropped overlong line");
                self.state.record_drop(DropReason::TooLong);
                return;
            }
            LineEvent::Invalid => {
                debug!("Dropped non-text line");
                self.state.record_drop(DropReason::Malformed);
                return;
            }
        };

        let now_ms = self.clock.now_ms();
        match parse_line(&line, now_ms) {
            Ok(parsed) => {
                self.state
                    .apply_sentence(parsed.kind, &parsed.sample, &line, now_ms);
            }
            Err(e) => {
                debug!("Dropped sentence '{}': {}", line, e);
                self.state.record_drop(e.drop_reason());
            }
        }
    }
}
