use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A point of one 2-D range scan, already projected into the scanner plane.
///
/// `extra` is opaque per-point payload (intensity, ring or beam index) that
/// is carried through to the swept [`Point3D`] unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Point2D<T = f32> {
    /// Range-direction axis of the scanner (metres).
    pub x: f64,
    /// Lateral axis of the scanner (metres).
    pub y: f64,
    pub extra: [T; 2],
}

impl<T> Point2D<T> {
    pub fn new(x: f64, y: f64, extra: [T; 2]) -> Self {
        Self { x, y, extra }
    }

    /// `false` when either coordinate is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    /// The point as a 3-vector in the scanner plane (`z == 0`).
    pub fn lifted(&self) -> [f64; 3] {
        [self.x, self.y, 0.0]
    }
}

/// A point of the accumulated, swept 3-D cloud.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Point3D<T = f32> {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub extra: [T; 2],
}

impl<T> Point3D<T> {
    pub fn new(x: f64, y: f64, z: f64, extra: [T; 2]) -> Self {
        Self { x, y, z, extra }
    }

    pub fn xyz(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

/// Coordinate component compared by the difference detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum HeightAxis {
    X,
    #[default]
    Y,
    Z,
}

impl HeightAxis {
    /// Pick this axis out of an `[x, y, z]` triple.
    pub fn component(self, xyz: [f64; 3]) -> f64 {
        match self {
            HeightAxis::X => xyz[0],
            HeightAxis::Y => xyz[1],
            HeightAxis::Z => xyz[2],
        }
    }
}

impl std::fmt::Display for HeightAxis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HeightAxis::X => write!(f, "x"),
            HeightAxis::Y => write!(f, "y"),
            HeightAxis::Z => write!(f, "z"),
        }
    }
}

/// Header shared by an input scan and the cloud produced from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FrameHeader {
    /// Sequence number assigned by the scanner driver.
    #[serde(default)]
    pub seq: u64,
    /// Acquisition time of the scan.
    pub stamp: DateTime<Utc>,
    /// Name of the reference frame the points are expressed in, e.g. `"laser"`.
    pub frame_id: String,
}

impl FrameHeader {
    pub fn new(seq: u64, frame_id: impl Into<String>) -> Self {
        Self {
            seq,
            stamp: Utc::now(),
            frame_id: frame_id.into(),
        }
    }
}

/// One full 2-D range-scan reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ScanFrame {
    pub header: FrameHeader,
    pub points: Vec<Point2D>,
}

/// The swept 3-D points produced from one accepted [`ScanFrame`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudFrame {
    pub header: FrameHeader,
    pub points: Vec<Point3D>,
}

/// Inclusive range of point indices within one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRange {
    pub start: usize,
    pub end: usize,
}

impl IndexRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, index: usize) -> bool {
        index >= self.start && index <= self.end
    }
}

/// Externally triggered session commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SessionCommand {
    Start,
    Stop,
}

/// One line of a recorded input stream: either a command or a scan frame.
///
/// Serialised as `{"command": "start"}` or `{"frame": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum InputRecord {
    Command(SessionCommand),
    Frame(ScanFrame),
}

/// Scalar signals emitted by the difference detector for external monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal", content = "value", rename_all = "snake_case")]
pub enum DiagnosticSignal {
    /// Number of indices whose difference exceeds the threshold.
    DiffCount(usize),
    /// A candidate region start.
    RegionStart(usize),
    /// A candidate region end.
    RegionEnd(usize),
}

/// Summary of a session that has been finalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizedModel {
    /// Model counter at the time of finalization (0 unless multi-model mode).
    pub model_index: u32,
    pub scan_count: u64,
    pub angle_rad: f64,
    pub point_count: usize,
}

/// Envelope for everything published on the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "rotoscan-runtime::pipeline"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Wrap `payload` with a fresh id and the current time.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data routed over the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// The latest swept frame and the angle it was taken at.
    Cloud {
        cloud: CloudFrame,
        scan_count: u64,
        angle_rad: f64,
    },
    Diagnostic(DiagnosticSignal),
    SessionFinalized(FinalizedModel),
}

/// Workspace-wide error type.
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum RotoError {
    #[error("Session log unavailable at {path}: {details}")]
    SinkUnavailable { path: String, details: String },

    #[error("Persistence Error: {0}")]
    Persistence(String),

    #[error("Event Channel Error: {0}")]
    Channel(String),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Serialization Error: {0}")]
    Serialization(String),
}
