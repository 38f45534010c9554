//! [`ScanPipeline`] – end-to-end frame handling.
//!
//! Wires the pieces of a sweep together.  For every incoming frame:
//!
//! 1. **Reference** – when no reference is loaded yet and the frame is the
//!    configured capture frame, it becomes the in-memory reference.
//! 2. **Detect** – when a reference is present the [`DifferenceDetector`]
//!    compares the frame against it; every counter is published on
//!    [`Topic::Diagnostics`].
//! 3. **Ingest** – the frame is fed to the [`SessionStateMachine`], optionally
//!    restricted to the detected region.  Accepted clouds reach
//!    [`Topic::Cloud`], finished sessions [`Topic::Session`], and every
//!    accepted frame is appended to the session log.
//!
//! # Example
//!
//! ```rust
//! use rotoscan_middleware::{EventBus, Topic};
//! use rotoscan_runtime::pipeline::{PipelineConfig, ScanPipeline};
//! use rotoscan_types::{FrameHeader, Point2D, ScanFrame};
//!
//! let dir = std::env::temp_dir().join(format!("rotoscan-doc-{}", std::process::id()));
//! let config = PipelineConfig { output_dir: dir.clone(), ..PipelineConfig::default() };
//!
//! let bus = EventBus::default();
//! let mut clouds = bus.subscribe_to(Topic::Cloud);
//! let mut pipeline = ScanPipeline::new(config, bus).unwrap();
//!
//! let frame = ScanFrame {
//!     header: FrameHeader::new(0, "laser"),
//!     points: vec![Point2D::new(1.0, 2.0, [0.0, 0.0])],
//! };
//! pipeline.start().unwrap();
//! let outcome = pipeline.push(&frame).unwrap();
//! assert!(outcome.accepted);
//! assert!(clouds.try_recv().is_ok());
//!
//! drop(pipeline);
//! let _ = std::fs::remove_dir_all(dir);
//! ```

use std::path::PathBuf;

use rotoscan_kernel::state_machine::DEFAULT_AUTO_STOP_DEG;
use rotoscan_kernel::{
    CloudConsumer, IngestOutcome, SessionConfig, SessionState, SessionStateMachine, SinkFactory,
};
use rotoscan_memory::{LogName, SessionLog, SessionLogFactory};
use rotoscan_middleware::{EventBus, Topic};
use rotoscan_perception::{DiagnosticsObserver, Detection, DifferenceDetector, ReferenceModel, SweepGeometry};
use rotoscan_types::{
    CloudFrame, DiagnosticSignal, Event, EventPayload, FinalizedModel, HeightAxis, InputRecord,
    RotoError, ScanFrame, SessionCommand,
};
use tracing::{debug, info, warn};

/// Source tag stamped on every event the pipeline publishes.
pub const EVENT_SOURCE: &str = "rotoscan-runtime::pipeline";

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration bundle for [`ScanPipeline`].
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Distance of the rotation axis from the scan origin (metres).
    pub z_offset_m: f64,
    /// Seconds the turntable needs for half a turn.
    pub half_turn_seconds: f64,
    /// Frames delivered by the scanner per second.
    pub scan_frequency_hz: f64,
    pub auto_stop_deg: f64,
    /// Give every start/stop cycle its own log file.
    pub separate_models: bool,
    pub output_dir: PathBuf,
    /// Session log to load the reference profile from.
    pub reference_log: Option<PathBuf>,
    /// Index of the frame inside `reference_log` used as reference.
    pub reference_frame: usize,
    /// Capture the n-th received frame (0-based) as reference when no
    /// reference log is configured.
    pub reference_capture_frame: Option<u64>,
    pub height_axis: HeightAxis,
    pub difference_threshold: f64,
    /// Only accumulate the region the detector reports.
    pub restrict_to_difference: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            z_offset_m: 0.04,
            half_turn_seconds: 41.0,
            scan_frequency_hz: 49.5,
            auto_stop_deg: DEFAULT_AUTO_STOP_DEG,
            separate_models: false,
            output_dir: PathBuf::from("3d_res"),
            reference_log: None,
            reference_frame: 0,
            reference_capture_frame: None,
            height_axis: HeightAxis::default(),
            difference_threshold: 0.05,
            restrict_to_difference: false,
        }
    }
}

impl PipelineConfig {
    pub fn geometry(&self) -> SweepGeometry {
        SweepGeometry::from_sweep(self.half_turn_seconds, self.scan_frequency_hz, self.z_offset_m)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::new(self.geometry())
            .with_auto_stop_deg(self.auto_stop_deg)
            .with_separate_models(self.separate_models)
    }

    pub fn log_name(&self) -> LogName {
        LogName::from_params(self.z_offset_m, self.half_turn_seconds, self.scan_frequency_hz)
    }

    /// Factory writing logs named after this configuration into `output_dir`.
    pub fn log_factory(&self) -> SessionLogFactory {
        SessionLogFactory::new(&self.output_dir, self.log_name(), self.separate_models)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bus adapters
// ─────────────────────────────────────────────────────────────────────────────

/// Publishes accepted clouds and finished sessions on the bus.
struct BusConsumer {
    bus: EventBus,
}

impl CloudConsumer for BusConsumer {
    fn consume(&mut self, cloud: &CloudFrame, scan_count: u64, angle_rad: f64) {
        let event = Event::new(
            EVENT_SOURCE,
            EventPayload::Cloud {
                cloud: cloud.clone(),
                scan_count,
                angle_rad,
            },
        );
        if let Err(e) = self.bus.publish_to(Topic::Cloud, event) {
            warn!(error = %e, "failed to publish cloud");
        }
    }

    fn finalized(&mut self, model: &FinalizedModel) {
        let event = Event::new(EVENT_SOURCE, EventPayload::SessionFinalized(model.clone()));
        if let Err(e) = self.bus.publish_to(Topic::Session, event) {
            warn!(error = %e, "failed to publish session summary");
        }
    }
}

/// Forwards detector counters to [`Topic::Diagnostics`].
struct BusDiagnostics<'a> {
    bus: &'a EventBus,
}

impl DiagnosticsObserver for BusDiagnostics<'_> {
    fn signal(&mut self, signal: DiagnosticSignal) {
        let event = Event::new(EVENT_SOURCE, EventPayload::Diagnostic(signal));
        if let Err(e) = self.bus.publish_to(Topic::Diagnostics, event) {
            warn!(error = %e, "failed to publish diagnostic");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ScanPipeline
// ─────────────────────────────────────────────────────────────────────────────

/// Owns the state machine, the detector and the reference of one scanner.
pub struct ScanPipeline {
    machine: SessionStateMachine,
    detector: DifferenceDetector,
    reference: Option<ReferenceModel>,
    height_axis: HeightAxis,
    capture_at: Option<u64>,
    restrict_to_difference: bool,
    frames_received: u64,
    last_detection: Option<Detection>,
    bus: EventBus,
}

impl ScanPipeline {
    /// Build a pipeline writing session logs as configured.
    ///
    /// # Errors
    ///
    /// Returns [`RotoError::Persistence`] when a configured reference log
    /// cannot be read.
    pub fn new(config: PipelineConfig, bus: EventBus) -> Result<Self, RotoError> {
        let sinks = config.log_factory();
        Self::with_sinks(config, bus, Box::new(sinks))
    }

    /// Build a pipeline with a custom persistence target.
    pub fn with_sinks(
        config: PipelineConfig,
        bus: EventBus,
        sinks: Box<dyn SinkFactory>,
    ) -> Result<Self, RotoError> {
        let reference = match &config.reference_log {
            Some(path) => {
                let model = SessionLog::load_reference(path, config.reference_frame, config.height_axis)?;
                info!(
                    path = %path.display(),
                    frame = config.reference_frame,
                    len = model.len(),
                    "reference model loaded"
                );
                Some(model)
            }
            None => None,
        };

        let consumer = BusConsumer { bus: bus.clone() };
        let machine = SessionStateMachine::new(config.session_config(), sinks, Box::new(consumer));
        info!(
            angle_increment = config.geometry().angle_increment,
            z_offset = config.z_offset_m,
            log = %config.log_name(),
            "scan pipeline ready"
        );

        Ok(Self {
            machine,
            detector: DifferenceDetector::new(config.difference_threshold),
            reference,
            height_axis: config.height_axis,
            capture_at: config.reference_capture_frame,
            restrict_to_difference: config.restrict_to_difference,
            frames_received: 0,
            last_detection: None,
            bus,
        })
    }

    /// Return a clone of the [`EventBus`] so callers can subscribe.
    pub fn bus(&self) -> EventBus {
        self.bus.clone()
    }

    pub fn state(&self) -> SessionState {
        self.machine.state()
    }

    pub fn machine(&self) -> &SessionStateMachine {
        &self.machine
    }

    pub fn reference(&self) -> Option<&ReferenceModel> {
        self.reference.as_ref()
    }

    /// Replace the reference profile.
    pub fn set_reference(&mut self, reference: ReferenceModel) {
        self.reference = Some(reference);
    }

    /// Result of the detector on the most recent frame, if it ran.
    pub fn last_detection(&self) -> Option<Detection> {
        self.last_detection
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }

    pub fn start(&mut self) -> Result<SessionState, RotoError> {
        self.machine.start()
    }

    pub fn stop(&mut self) -> SessionState {
        self.machine.stop()
    }

    /// Run one frame through reference capture, detection and ingest.
    pub fn push(&mut self, frame: &ScanFrame) -> Result<IngestOutcome, RotoError> {
        let index = self.frames_received;
        self.frames_received += 1;

        if self.reference.is_none() && self.capture_at == Some(index) {
            let model = ReferenceModel::from_frame(frame, self.height_axis);
            info!(frame = index, len = model.len(), "reference captured");
            self.reference = Some(model);
            self.last_detection = None;
        } else if let Some(reference) = &self.reference {
            let mut observer = BusDiagnostics { bus: &self.bus };
            let detection = self.detector.detect_frame(frame, reference, &mut observer);
            if detection.found {
                debug!(start = detection.start, end = detection.end, "difference region");
            }
            self.last_detection = Some(detection);
        }

        let region = if self.restrict_to_difference {
            self.last_detection.and_then(|d| d.region())
        } else {
            None
        };
        self.machine.ingest(frame, region)
    }

    /// Dispatch one record of an input stream.
    ///
    /// Commands return `None`; frames return their ingest outcome.
    pub fn handle(&mut self, record: &InputRecord) -> Result<Option<IngestOutcome>, RotoError> {
        match record {
            InputRecord::Command(SessionCommand::Start) => self.start().map(|_| None),
            InputRecord::Command(SessionCommand::Stop) => {
                self.stop();
                Ok(None)
            }
            InputRecord::Frame(frame) => self.push(frame).map(Some),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use rotoscan_types::{FrameHeader, Point2D};

    fn config(dir: &std::path::Path) -> PipelineConfig {
        PipelineConfig {
            output_dir: dir.to_path_buf(),
            ..PipelineConfig::default()
        }
    }

    /// A flat profile along y, optionally with a raised block.
    fn frame(bump: Option<std::ops::RangeInclusive<usize>>) -> ScanFrame {
        ScanFrame {
            header: FrameHeader::new(0, "laser"),
            points: (0..50)
                .map(|i| {
                    let y = match &bump {
                        Some(r) if r.contains(&i) => 1.0,
                        _ => 0.0,
                    };
                    Point2D::new(i as f64 * 0.01, y, [i as f32, 0.0])
                })
                .collect(),
        }
    }

    #[test]
    fn default_config_matches_turntable() {
        let config = PipelineConfig::default();
        let expected = std::f64::consts::PI / 41.0 / 49.5;
        assert!((config.geometry().angle_increment - expected).abs() < 1e-15);
        assert_eq!(config.log_name().stem(), "pcl_3d-zofs_4-piangle_41-fre_495");
    }

    #[test]
    fn frames_before_start_are_ignored() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let mut pipeline = ScanPipeline::new(config(dir.path()), EventBus::default()).unwrap();
        let outcome = pipeline.push(&frame(None)).unwrap();
        assert!(!outcome.accepted);
        assert_eq!(pipeline.state(), SessionState::Waiting);
        assert_eq!(pipeline.machine().session().scan_count(), 0);
    }

    #[test]
    fn accepted_frames_reach_bus_and_log() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let cfg = config(dir.path());
        let log_path = dir.path().join(cfg.log_name().file_name(None));
        let bus = EventBus::default();
        let mut clouds = bus.subscribe_to(Topic::Cloud);
        let mut sessions = bus.subscribe_to(Topic::Session);
        let mut pipeline = ScanPipeline::new(cfg, bus).unwrap();

        pipeline.handle(&InputRecord::Command(SessionCommand::Start)).unwrap();
        for _ in 0..3 {
            pipeline.handle(&InputRecord::Frame(frame(None))).unwrap();
        }
        pipeline.handle(&InputRecord::Command(SessionCommand::Stop)).unwrap();
        let outcome = pipeline.handle(&InputRecord::Frame(frame(None))).unwrap().unwrap();
        assert!(outcome.finalized.is_some());

        let mut counts = Vec::new();
        while let Ok(event) = clouds.try_recv() {
            if let EventPayload::Cloud { scan_count, .. } = event.payload {
                counts.push(scan_count);
            }
        }
        assert_eq!(counts, vec![1, 2, 3]);
        assert!(matches!(
            sessions.try_recv().unwrap().payload,
            EventPayload::SessionFinalized(FinalizedModel { scan_count: 3, .. })
        ));

        let logged = SessionLog::read_frames(&log_path).unwrap();
        assert_eq!(logged.len(), 3);
        assert_eq!(logged[2].scan_index, 2);
    }

    #[test]
    fn reference_is_captured_at_configured_frame() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let cfg = PipelineConfig {
            reference_capture_frame: Some(1),
            ..config(dir.path())
        };
        let mut pipeline = ScanPipeline::new(cfg, EventBus::default()).unwrap();

        pipeline.push(&frame(None)).unwrap();
        assert!(pipeline.reference().is_none());
        pipeline.push(&frame(None)).unwrap();
        assert_eq!(pipeline.reference().map(|r| r.len()), Some(50));
        assert!(pipeline.last_detection().is_none());

        pipeline.push(&frame(Some(10..=16))).unwrap();
        let detection = pipeline.last_detection().unwrap();
        assert!(detection.found);
        assert_eq!((detection.start, detection.end), (10, 17));
    }

    #[test]
    fn detector_signals_are_published() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let bus = EventBus::default();
        let mut diagnostics = bus.subscribe_to(Topic::Diagnostics);
        let mut pipeline = ScanPipeline::new(config(dir.path()), bus).unwrap();
        pipeline.set_reference(ReferenceModel::from_frame(&frame(None), HeightAxis::Y));

        pipeline.push(&frame(Some(20..=29))).unwrap();

        let mut signals = Vec::new();
        while let Ok(event) = diagnostics.try_recv() {
            if let EventPayload::Diagnostic(signal) = event.payload {
                signals.push(signal);
            }
        }
        assert_eq!(signals.first(), Some(&DiagnosticSignal::DiffCount(10)));
        assert!(signals.contains(&DiagnosticSignal::RegionStart(20)));
        assert!(signals.contains(&DiagnosticSignal::RegionEnd(30)));
    }

    #[test]
    fn restricted_accumulation_keeps_only_the_region() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let cfg = PipelineConfig {
            restrict_to_difference: true,
            ..config(dir.path())
        };
        let mut pipeline = ScanPipeline::new(cfg, EventBus::default()).unwrap();
        pipeline.set_reference(ReferenceModel::from_frame(&frame(None), HeightAxis::Y));

        pipeline.start().unwrap();
        pipeline.push(&frame(Some(20..=29))).unwrap();
        // Region 20..=30 inclusive.
        assert_eq!(pipeline.machine().session().points().len(), 11);

        // No divergence: nothing to restrict to, the whole frame is kept.
        pipeline.push(&frame(None)).unwrap();
        assert_eq!(pipeline.machine().session().points().len(), 61);
    }

    #[test]
    fn reference_is_loaded_from_log() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let reference_path = dir.path().join("reference.db");
        let geometry = PipelineConfig::default().geometry();
        {
            use rotoscan_kernel::SessionSink;
            let mut log = SessionLog::create(&reference_path).unwrap();
            let raw = Point2D::new(0.3, 0.5, [0.0, 0.0]);
            let cloud = CloudFrame {
                header: FrameHeader::new(0, "laser"),
                points: vec![geometry.transform(&raw, 5); 8],
            };
            log.append(&cloud, 5, geometry.angle_for(5)).unwrap();
            log.close().unwrap();
        }

        let cfg = PipelineConfig {
            reference_log: Some(reference_path),
            ..config(dir.path())
        };
        let pipeline = ScanPipeline::new(cfg, EventBus::default()).unwrap();
        let heights = pipeline.reference().unwrap().heights();
        assert_eq!(heights.len(), 8);
        assert!(heights.iter().all(|h| (h - 0.5).abs() < 1e-12), "{heights:?}");
    }

    #[test]
    fn replayed_frame_matches_reference_from_its_own_log() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let cfg = config(&dir.path().join("first"));
        let log_path = cfg.output_dir.join(cfg.log_name().file_name(None));
        let raised = frame(Some(0..=49));
        {
            let mut recorder = ScanPipeline::new(cfg, EventBus::default()).unwrap();
            recorder.start().unwrap();
            for _ in 0..4 {
                recorder.push(&raised).unwrap();
            }
            recorder.stop();
            recorder.push(&raised).unwrap();
        }

        let cfg = PipelineConfig {
            reference_log: Some(log_path),
            reference_frame: 3,
            ..config(&dir.path().join("second"))
        };
        let mut pipeline = ScanPipeline::new(cfg, EventBus::default()).unwrap();
        pipeline.push(&raised).unwrap();
        let detection = pipeline.last_detection().unwrap();
        assert!(!detection.found);
        assert_eq!(detection.diff_count, 0);

        let mut notched = raised.clone();
        for p in &mut notched.points[10..=16] {
            p.y = 0.0;
        }
        pipeline.push(&notched).unwrap();
        let detection = pipeline.last_detection().unwrap();
        assert!(detection.found);
        assert_eq!((detection.start, detection.end), (10, 17));
    }

    #[test]
    fn missing_reference_log_is_an_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let cfg = PipelineConfig {
            reference_log: Some(dir.path().join("missing.db")),
            ..config(dir.path())
        };
        assert!(matches!(
            ScanPipeline::new(cfg, EventBus::default()),
            Err(RotoError::Persistence(_))
        ));
    }

    #[test]
    fn unavailable_output_dir_fails_start() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let mut pipeline = ScanPipeline::new(config(&blocker.join("out")), EventBus::default()).unwrap();
        assert!(matches!(pipeline.start(), Err(RotoError::SinkUnavailable { .. })));
        assert_eq!(pipeline.state(), SessionState::Waiting);
    }
}
