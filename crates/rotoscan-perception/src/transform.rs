//! Sweep transform.
//!
//! A planar range scanner mounted on a turntable sweeps its scan plane around
//! an axis.  Each accepted frame `k` was captured at angle
//! `k * angle_increment`; every point of that frame is lifted into 3-D by
//! rotating its lateral coordinate, together with the fixed standoff
//! `z_offset` of the rotation axis, through that angle:
//!
//! ```text
//! [rx]   [cos θ  -sin θ] [y0      ]
//! [rz] = [sin θ   cos θ] [z_offset]        point3d = (rx, rz, x0)
//! ```
//!
//! The range-direction axis `x0` of the scan becomes the depth axis of the
//! output point.
//!
//! # Example
//!
//! ```rust
//! use rotoscan_perception::transform::SweepGeometry;
//! use rotoscan_types::Point2D;
//!
//! let geometry = SweepGeometry::new(0.01, 0.04);
//! let p = geometry.transform(&Point2D::new(1.0, 2.0, [0.0f32, 0.0]), 0);
//!
//! // Scan index 0 → angle 0 → identity rotation.
//! assert!((p.x - 2.0).abs() < 1e-12);
//! assert!((p.y - 0.04).abs() < 1e-12);
//! assert!((p.z - 1.0).abs() < 1e-12);
//! ```

use std::f64::consts::PI;

use rotoscan_types::{Point2D, Point3D};

// ────────────────────────────────────────────────────────────────────────────
// Rotation2
// ────────────────────────────────────────────────────────────────────────────

/// A 2×2 rotation matrix `[[cos, -sin], [sin, cos]]`, stored as its cosine
/// and sine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rotation2 {
    cos: f64,
    sin: f64,
}

impl Rotation2 {
    /// Counter-clockwise rotation by `angle` radians.
    pub fn from_angle(angle: f64) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self { cos, sin }
    }

    pub fn identity() -> Self {
        Self { cos: 1.0, sin: 0.0 }
    }

    /// Row-major matrix form.
    pub fn matrix(&self) -> [[f64; 2]; 2] {
        [[self.cos, -self.sin], [self.sin, self.cos]]
    }

    /// Rotation by the opposite angle.
    pub fn inverse(&self) -> Self {
        Self {
            cos: self.cos,
            sin: -self.sin,
        }
    }

    /// Multiply the column vector `v` by this matrix.
    pub fn apply(&self, v: [f64; 2]) -> [f64; 2] {
        [
            self.cos * v[0] - self.sin * v[1],
            self.sin * v[0] + self.cos * v[1],
        ]
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SweepGeometry
// ────────────────────────────────────────────────────────────────────────────

/// The two constants of a sweep session: the angle swept between consecutive
/// frames and the standoff of the rotation axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepGeometry {
    /// Radians swept between two consecutive accepted frames.
    pub angle_increment: f64,
    /// Distance of the rotation axis from the scan origin (metres).
    pub z_offset: f64,
}

impl SweepGeometry {
    pub fn new(angle_increment: f64, z_offset: f64) -> Self {
        Self {
            angle_increment,
            z_offset,
        }
    }

    /// Derive the per-frame increment from the turntable and scanner rates.
    ///
    /// The turntable sweeps π radians in `half_turn_seconds` and the scanner
    /// delivers `scan_frequency_hz` frames per second, so each frame advances
    /// the sweep by `π / half_turn_seconds / scan_frequency_hz`.
    pub fn from_sweep(half_turn_seconds: f64, scan_frequency_hz: f64, z_offset: f64) -> Self {
        let angular_speed = PI / half_turn_seconds;
        Self::new(angular_speed / scan_frequency_hz, z_offset)
    }

    /// Sweep angle of the frame with the given scan index.
    pub fn angle_for(&self, scan_index: u64) -> f64 {
        scan_index as f64 * self.angle_increment
    }

    /// Lift `point` into 3-D as seen at `scan_index`.
    pub fn transform<T: Copy>(&self, point: &Point2D<T>, scan_index: u64) -> Point3D<T> {
        transform_point(point, scan_index, self.angle_increment, self.z_offset)
    }
}

/// Free-function form of [`SweepGeometry::transform`].
///
/// Pure: the result depends only on the arguments.
pub fn transform_point<T: Copy>(
    point: &Point2D<T>,
    scan_index: u64,
    angle_increment: f64,
    z_offset: f64,
) -> Point3D<T> {
    let angle = scan_index as f64 * angle_increment;
    let [rx, rz] = Rotation2::from_angle(angle).apply([point.y, z_offset]);
    Point3D::new(rx, rz, point.x, point.extra)
}

/// Undo [`transform_point`] for a point swept at `angle` radians.
///
/// Recovers the scan-plane point `(x0, y0)`; the standoff component is
/// dropped.
pub fn unsweep_point<T: Copy>(point: &Point3D<T>, angle: f64) -> Point2D<T> {
    let [y0, _standoff] = Rotation2::from_angle(angle).inverse().apply([point.x, point.y]);
    Point2D::new(point.z, y0, point.extra)
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
