//! `rotoscan-perception` – the geometric core.
//!
//! Pure numeric building blocks with no I/O and no session state.
//!
//! # Modules
//!
//! - [`transform`] – [`SweepGeometry`][transform::SweepGeometry]: rotates a
//!   2-D scan point about the sweep axis by `scan_index * angle_increment`
//!   to produce a 3-D point.
//! - [`difference`] – [`DifferenceDetector`][difference::DifferenceDetector]:
//!   compares a frame's height profile against a
//!   [`ReferenceModel`][difference::ReferenceModel] and isolates one
//!   contiguous divergent index region.

pub mod difference;
pub mod transform;

pub use difference::{DiagnosticsObserver, DifferenceDetector, Detection, ReferenceModel};
pub use transform::{Rotation2, SweepGeometry, transform_point, unsweep_point};
