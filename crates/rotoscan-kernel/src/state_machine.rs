//! [`SessionStateMachine`] – capture lifecycle of a sweep.
//!
//! ```text
//!            start()              ingest()
//!  Waiting ───────────► Started ───────────► Scanning ──┐ ingest()
//!     ▲                    │                    │  ◄────┘
//!     │                    │ stop()             │ stop() / angle > auto-stop
//!     │    ingest()        ▼                    ▼
//!     └──────────────── Stopped ◄───────────────┘
//! ```
//!
//! - `start()` from `Waiting` opens the session log and resets the session.
//!   Repeated starts while active are ignored.
//! - Every ingest while `Started` or `Scanning` is accumulated, emitted to the
//!   [`CloudConsumer`] and appended to the [`SessionSink`].
//! - Once the sweep angle exceeds the auto-stop threshold (181° by default)
//!   the machine stops itself.
//! - The first ingest observed while `Stopped` finalizes the session: the
//!   sink is closed and the machine returns to `Waiting`.  In multi-model
//!   mode the model counter is also advanced and the buffers are cleared.
//! - Ingests while `Waiting` are ignored.
//!
//! A still-open sink is closed when the machine is dropped.

use rotoscan_perception::SweepGeometry;
use rotoscan_types::{FinalizedModel, IndexRange, RotoError, ScanFrame};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::session::ScanSession;
use crate::sink::{CloudConsumer, SessionSink, SinkFactory};

/// Default auto-stop threshold: a half turn plus a small overshoot margin.
pub const DEFAULT_AUTO_STOP_DEG: f64 = 181.0;

// ─────────────────────────────────────────────────────────────────────────────
// SessionState
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Idle; frames are ignored.
    Waiting,
    /// A start command was received; the next frame begins the sweep.
    Started,
    /// Frames are being accumulated.
    Scanning,
    /// Stopped; the next frame finalizes the session.
    Stopped,
}

impl SessionState {
    pub fn is_active(self) -> bool {
        matches!(self, SessionState::Started | SessionState::Scanning)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Waiting => write!(f, "waiting"),
            SessionState::Started => write!(f, "started"),
            SessionState::Scanning => write!(f, "scanning"),
            SessionState::Stopped => write!(f, "stopped"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Constants of a capture run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionConfig {
    pub geometry: SweepGeometry,
    /// The session stops itself once its angle exceeds this (radians).
    pub auto_stop_rad: f64,
    /// Capture several successive models without restarting the process.
    pub separate_models: bool,
}

impl SessionConfig {
    pub fn new(geometry: SweepGeometry) -> Self {
        Self {
            geometry,
            auto_stop_rad: DEFAULT_AUTO_STOP_DEG.to_radians(),
            separate_models: false,
        }
    }

    pub fn with_auto_stop_deg(mut self, degrees: f64) -> Self {
        self.auto_stop_rad = degrees.to_radians();
        self
    }

    pub fn with_separate_models(mut self, separate: bool) -> Self {
        self.separate_models = separate;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// IngestOutcome
// ─────────────────────────────────────────────────────────────────────────────

/// What one [`SessionStateMachine::ingest`] call did.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestOutcome {
    /// State after the call.
    pub state: SessionState,
    pub scan_count: u64,
    pub angle_rad: f64,
    /// `true` when the frame was accumulated.
    pub accepted: bool,
    /// `true` when this frame pushed the angle past the auto-stop threshold.
    pub auto_stopped: bool,
    /// Present when this call finalized the session.
    pub finalized: Option<FinalizedModel>,
}

// ─────────────────────────────────────────────────────────────────────────────
// SessionStateMachine
// ─────────────────────────────────────────────────────────────────────────────

/// Owns a [`ScanSession`] and the sinks it feeds, and gates accumulation on
/// the capture state.
pub struct SessionStateMachine {
    config: SessionConfig,
    state: SessionState,
    session: ScanSession,
    model_index: u32,
    sinks: Box<dyn SinkFactory>,
    sink: Option<Box<dyn SessionSink>>,
    consumer: Box<dyn CloudConsumer>,
}

impl SessionStateMachine {
    pub fn new(
        config: SessionConfig,
        sinks: Box<dyn SinkFactory>,
        consumer: Box<dyn CloudConsumer>,
    ) -> Self {
        Self {
            config,
            state: SessionState::Waiting,
            session: ScanSession::new(config.geometry),
            model_index: 0,
            sinks,
            sink: None,
            consumer,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session(&self) -> &ScanSession {
        &self.session
    }

    /// Counter of finalized models (only advances in multi-model mode).
    pub fn model_index(&self) -> u32 {
        self.model_index
    }

    /// Identifier of the open session log, if any.
    pub fn sink_id(&self) -> Option<&str> {
        self.sink.as_deref().map(|s| s.id())
    }

    /// Handle a start command.
    ///
    /// A stopped session that has not been finalized yet is finalized first.
    ///
    /// # Errors
    ///
    /// Returns [`RotoError::SinkUnavailable`] when the session log cannot be
    /// opened; the machine then stays in [`SessionState::Waiting`].
    pub fn start(&mut self) -> Result<SessionState, RotoError> {
        match self.state {
            SessionState::Started | SessionState::Scanning => {
                debug!(state = %self.state, "start ignored, session already active");
                return Ok(self.state);
            }
            SessionState::Stopped => {
                self.finalize()?;
            }
            SessionState::Waiting => {}
        }

        let sink = self.sinks.open(self.model_index)?;
        info!(model_index = self.model_index, log = sink.id(), "received start command");
        self.sink = Some(sink);
        self.session.reset();
        self.state = SessionState::Started;
        Ok(self.state)
    }

    /// Handle a stop command.  Ignored unless a session is active.
    pub fn stop(&mut self) -> SessionState {
        if self.state.is_active() {
            self.state = SessionState::Stopped;
            info!(
                angle_deg = self.session.current_angle().to_degrees(),
                scan_count = self.session.scan_count(),
                "received stop command"
            );
        } else {
            debug!(state = %self.state, "stop ignored, no active session");
        }
        self.state
    }

    /// Feed one frame through the machine.
    ///
    /// `region` restricts accumulation to an inclusive index range of the
    /// frame (see [`ScanSession::accept`]).
    ///
    /// # Errors
    ///
    /// Returns [`RotoError::Persistence`] when the frame cannot be appended
    /// to the session log, or when closing the log at finalize fails.  A
    /// frame that fails to append is still accumulated but not emitted, and
    /// the sweep limit is still checked.
    pub fn ingest(
        &mut self,
        frame: &ScanFrame,
        region: Option<IndexRange>,
    ) -> Result<IngestOutcome, RotoError> {
        match self.state {
            SessionState::Waiting => Ok(self.outcome(false, false, None)),
            SessionState::Stopped => {
                let model = self.finalize()?;
                Ok(self.outcome(false, false, Some(model)))
            }
            SessionState::Started | SessionState::Scanning => {
                self.state = SessionState::Scanning;

                let scan_index = self.session.scan_count();
                let geometry = self.config.geometry;
                let cloud = self.session.accept(frame, region);
                let scan_count = scan_index + 1;
                let angle = geometry.angle_for(scan_count);

                let persisted = match self.sink.as_mut() {
                    Some(sink) => sink.append(cloud, scan_index, geometry.angle_for(scan_index)),
                    None => Ok(()),
                };
                if persisted.is_ok() {
                    self.consumer.consume(cloud, scan_count, angle);
                }

                // The sweep limit holds even when the frame could not be logged.
                let auto_stopped = angle > self.config.auto_stop_rad;
                if auto_stopped {
                    info!(
                        angle_deg = angle.to_degrees(),
                        limit_deg = self.config.auto_stop_rad.to_degrees(),
                        "sweep limit reached, stopping"
                    );
                    self.stop();
                }
                persisted?;
                Ok(self.outcome(true, auto_stopped, None))
            }
        }
    }

    fn outcome(
        &self,
        accepted: bool,
        auto_stopped: bool,
        finalized: Option<FinalizedModel>,
    ) -> IngestOutcome {
        IngestOutcome {
            state: self.state,
            scan_count: self.session.scan_count(),
            angle_rad: self.session.current_angle(),
            accepted,
            auto_stopped,
            finalized,
        }
    }

    /// Close the sink, return to `Waiting` and report the finished model.
    fn finalize(&mut self) -> Result<FinalizedModel, RotoError> {
        let model = FinalizedModel {
            model_index: self.model_index,
            scan_count: self.session.scan_count(),
            angle_rad: self.session.current_angle(),
            point_count: self.session.points().len(),
        };

        let closed = match self.sink.take() {
            Some(mut sink) => {
                let result = sink.close();
                info!(log = sink.id(), scan_count = model.scan_count, "stop recording, model saved");
                result
            }
            None => Ok(()),
        };

        self.state = SessionState::Waiting;
        if self.config.separate_models {
            self.model_index += 1;
            self.session.reset();
        }
        self.consumer.finalized(&model);

        closed.map(|()| model)
    }
}

impl Drop for SessionStateMachine {
    fn drop(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            match sink.close() {
                Ok(()) => info!(log = sink.id(), "session log closed on shutdown"),
                Err(e) => warn!(log = sink.id(), error = %e, "failed to close session log on shutdown"),
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
