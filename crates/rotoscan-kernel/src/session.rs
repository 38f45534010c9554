//! [`ScanSession`] – the accumulated state of one sweep.
//!
//! A session turns every accepted [`ScanFrame`] into swept 3-D points using
//! the current scan count as the scan index, appends them to its buffer and
//! advances the sweep angle by one increment.
//!
//! # Invariants
//!
//! - `current_angle == scan_count * angle_increment` after every call.
//! - `scan_count` grows by exactly one per accepted frame.
//! - The buffer only grows; it is cleared by [`ScanSession::reset`] alone.
//!
//! # Example
//!
//! ```rust
//! use rotoscan_kernel::session::ScanSession;
//! use rotoscan_perception::SweepGeometry;
//! use rotoscan_types::{FrameHeader, Point2D, ScanFrame};
//!
//! let mut session = ScanSession::new(SweepGeometry::new(0.01, 0.04));
//! let frame = ScanFrame {
//!     header: FrameHeader::new(0, "laser"),
//!     points: vec![Point2D::new(1.0, 2.0, [0.0, 0.0])],
//! };
//!
//! for _ in 0..10 {
//!     session.accept(&frame, None);
//! }
//! assert_eq!(session.scan_count(), 10);
//! assert_eq!(session.points().len(), 10);
//! assert!((session.current_angle() - 0.10).abs() < 1e-12);
//! ```

use rotoscan_perception::SweepGeometry;
use rotoscan_types::{CloudFrame, IndexRange, Point3D, ScanFrame};
use tracing::debug;

/// Accumulated state of one sweep session.
#[derive(Debug, Clone)]
pub struct ScanSession {
    geometry: SweepGeometry,
    scan_count: u64,
    current_angle: f64,
    points: Vec<Point3D>,
    /// Cloud produced from the most recently accepted frame.
    latest: Option<CloudFrame>,
}

impl ScanSession {
    pub fn new(geometry: SweepGeometry) -> Self {
        Self {
            geometry,
            scan_count: 0,
            current_angle: 0.0,
            points: Vec::new(),
            latest: None,
        }
    }

    pub fn geometry(&self) -> SweepGeometry {
        self.geometry
    }

    pub fn scan_count(&self) -> u64 {
        self.scan_count
    }

    /// Sweep angle in radians.
    pub fn current_angle(&self) -> f64 {
        self.current_angle
    }

    /// Every swept point accepted since the last reset, in ingest order.
    pub fn points(&self) -> &[Point3D] {
        &self.points
    }

    pub fn latest(&self) -> Option<&CloudFrame> {
        self.latest.as_ref()
    }

    /// Clear the buffer, the counter and the angle.
    pub fn reset(&mut self) {
        self.scan_count = 0;
        self.current_angle = 0.0;
        self.points.clear();
        self.latest = None;
    }

    /// Transform and append one frame, then advance the sweep.
    ///
    /// Non-finite points are dropped before the transform.  When `region` is
    /// given only points whose index (counted after dropping non-finite
    /// points) lies inside it are kept.
    ///
    /// Returns the cloud produced from this frame.
    pub fn accept(&mut self, frame: &ScanFrame, region: Option<IndexRange>) -> &CloudFrame {
        let scan_index = self.scan_count;
        let swept: Vec<Point3D> = frame
            .points
            .iter()
            .filter(|p| p.is_finite())
            .enumerate()
            .filter(|(idx, _)| region.is_none_or(|r| r.contains(*idx)))
            .map(|(_, p)| self.geometry.transform(p, scan_index))
            .collect();

        let dropped = frame.points.len() - swept.len();
        if dropped > 0 {
            debug!(scan_index, dropped, "points dropped from frame");
        }

        self.points.extend_from_slice(&swept);
        self.scan_count += 1;
        self.current_angle = self.geometry.angle_for(self.scan_count);

        self.latest.insert(CloudFrame {
            header: frame.header.clone(),
            points: swept,
        })
    }
}
