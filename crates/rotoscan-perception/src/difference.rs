//! Reference-difference detector.
//!
//! Compares the height profile of the current frame, index by index, against
//! a stored [`ReferenceModel`] and isolates one contiguous region where the
//! two diverge by more than a threshold.
//!
//! # Algorithm
//!
//! 1. `diff[i] = |current[i] - reference[i]|` over the common prefix.
//! 2. If at most [`MIN_DIFF_COUNT`] entries exceed the threshold the frame is
//!    treated as noise and nothing is reported.
//! 3. Otherwise `diff` is scanned left to right.  A candidate region starts at
//!    the first `i` where `diff[i]`, `diff[i + 1]` and `diff[i + 3]` all exceed
//!    the threshold; it ends at the first later index that does not, or at the
//!    last index.
//! 4. A candidate wider than [`MIN_REGION_WIDTH`] is accepted and the scan
//!    stops.  Narrower candidates are discarded and the scan resumes after
//!    their end.
//!
//! Every intermediate counter is handed to a [`DiagnosticsObserver`].
//!
//! # Example
//!
//! ```rust
//! use rotoscan_perception::difference::DifferenceDetector;
//!
//! let reference = vec![0.0; 50];
//! let mut current = reference.clone();
//! for h in &mut current[10..=16] {
//!     *h = 1.0;
//! }
//!
//! let detection = DifferenceDetector::new(0.5).detect(&current, &reference);
//! assert!(detection.found);
//! assert_eq!((detection.start, detection.end), (10, 17));
//! ```

use std::sync::Arc;

use rotoscan_types::{DiagnosticSignal, HeightAxis, IndexRange, Point3D, ScanFrame};
use tracing::debug;

use crate::transform::unsweep_point;

/// Frames with this many or fewer divergent indices are treated as noise.
pub const MIN_DIFF_COUNT: usize = 5;

/// Candidate regions with `end - start` at or below this are discarded.
pub const MIN_REGION_WIDTH: usize = 3;

// ────────────────────────────────────────────────────────────────────────────
// Diagnostics seam
// ────────────────────────────────────────────────────────────────────────────

/// Receives the detector's intermediate counters as they are computed.
pub trait DiagnosticsObserver {
    fn signal(&mut self, signal: DiagnosticSignal);
}

/// Discards every signal.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl DiagnosticsObserver for NoopObserver {
    fn signal(&mut self, _signal: DiagnosticSignal) {}
}

impl DiagnosticsObserver for Vec<DiagnosticSignal> {
    fn signal(&mut self, signal: DiagnosticSignal) {
        self.push(signal);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// ReferenceModel
// ────────────────────────────────────────────────────────────────────────────

/// Immutable height profile of a previously captured scan.
///
/// Cloning is cheap; all clones share the same buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceModel {
    heights: Arc<[f64]>,
    axis: HeightAxis,
}

impl ReferenceModel {
    pub fn from_heights(heights: Vec<f64>, axis: HeightAxis) -> Self {
        Self {
            heights: heights.into(),
            axis,
        }
    }

    /// Rebuild the profile of a frame that was swept at `angle` radians.
    ///
    /// Each point is rotated back into the scanner plane first, so the
    /// heights compare index by index with [`frame_heights`] of a raw frame.
    pub fn from_swept_points<T: Copy>(points: &[Point3D<T>], angle: f64, axis: HeightAxis) -> Self {
        let heights = points
            .iter()
            .map(|p| axis.component(unsweep_point(p, angle).lifted()))
            .collect();
        Self::from_heights(heights, axis)
    }

    /// Capture a raw frame as the reference (see [`frame_heights`]).
    pub fn from_frame(frame: &ScanFrame, axis: HeightAxis) -> Self {
        Self::from_heights(frame_heights(frame, axis), axis)
    }

    pub fn heights(&self) -> &[f64] {
        &self.heights
    }

    pub fn axis(&self) -> HeightAxis {
        self.axis
    }

    pub fn len(&self) -> usize {
        self.heights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heights.is_empty()
    }
}

/// Height profile of a raw frame: its finite points lifted into the scanner
/// plane as `(x, y, 0)`, projected onto `axis`.
///
/// Non-finite points are skipped so indices line up with the points a
/// session accumulates.
pub fn frame_heights(frame: &ScanFrame, axis: HeightAxis) -> Vec<f64> {
    frame
        .points
        .iter()
        .filter(|p| p.is_finite())
        .map(|p| axis.component(p.lifted()))
        .collect()
}

// ────────────────────────────────────────────────────────────────────────────
// Detection result
// ────────────────────────────────────────────────────────────────────────────

/// Outcome of one detector run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    pub found: bool,
    pub start: usize,
    pub end: usize,
    /// Number of indices whose difference exceeded the threshold.
    pub diff_count: usize,
}

impl Detection {
    fn not_found(diff_count: usize) -> Self {
        Self {
            found: false,
            start: 0,
            end: 0,
            diff_count,
        }
    }

    /// The accepted region, if any.
    pub fn region(&self) -> Option<IndexRange> {
        self.found.then(|| IndexRange::new(self.start, self.end))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// DifferenceDetector
// ────────────────────────────────────────────────────────────────────────────

/// Locates the first sufficiently wide region where two height profiles
/// diverge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DifferenceDetector {
    threshold: f64,
}

impl DifferenceDetector {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Run the detector without observing intermediate counters.
    pub fn detect(&self, current: &[f64], reference: &[f64]) -> Detection {
        self.detect_with(current, reference, &mut NoopObserver)
    }

    /// Compare `frame` against `reference` on the reference's height axis.
    pub fn detect_frame(
        &self,
        frame: &ScanFrame,
        reference: &ReferenceModel,
        observer: &mut dyn DiagnosticsObserver,
    ) -> Detection {
        let current = frame_heights(frame, reference.axis());
        self.detect_with(&current, reference.heights(), observer)
    }

    /// Run the detector, reporting the divergent count and every candidate
    /// start and end to `observer`.
    pub fn detect_with(
        &self,
        current: &[f64],
        reference: &[f64],
        observer: &mut dyn DiagnosticsObserver,
    ) -> Detection {
        let n = current.len().min(reference.len());
        let diff: Vec<f64> = current[..n]
            .iter()
            .zip(&reference[..n])
            .map(|(c, r)| (c - r).abs())
            .collect();

        // Out-of-range lookahead simply fails the comparison.
        let above = |i: usize| diff.get(i).is_some_and(|d| *d > self.threshold);

        let diff_count = (0..n).filter(|&i| above(i)).count();
        observer.signal(DiagnosticSignal::DiffCount(diff_count));
        if diff_count <= MIN_DIFF_COUNT {
            return Detection::not_found(diff_count);
        }

        let mut start: Option<usize> = None;
        for i in 0..n {
            match start {
                None => {
                    if above(i) && above(i + 1) && above(i + 3) {
                        start = Some(i);
                        observer.signal(DiagnosticSignal::RegionStart(i));
                    }
                }
                Some(s) => {
                    if !above(i) || i == n - 1 {
                        observer.signal(DiagnosticSignal::RegionEnd(i));
                        if i - s > MIN_REGION_WIDTH {
                            return Detection {
                                found: true,
                                start: s,
                                end: i,
                                diff_count,
                            };
                        }
                        debug!(start = s, end = i, "discarding short divergent region");
                        start = None;
                    }
                }
            }
        }

        Detection::not_found(diff_count)
    }
}

/// Free-function form of [`DifferenceDetector::detect`].
pub fn detect(current: &[f64], reference: &[f64], threshold: f64) -> Detection {
    DifferenceDetector::new(threshold).detect(current, reference)
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
