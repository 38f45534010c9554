//! Output seams of the kernel.
//!
//! The state machine never knows where accepted frames end up.  Durable
//! storage is reached through a [`SessionSink`] obtained from a
//! [`SinkFactory`] when a session starts; live delivery goes through a
//! [`CloudConsumer`].

use rotoscan_types::{CloudFrame, FinalizedModel, RotoError};

/// Append-only, per-session persistence target.
///
/// The state machine calls [`close`][SessionSink::close] exactly once per
/// sink, when the session is finalized or the machine is dropped.
pub trait SessionSink: Send {
    /// Identifier of the underlying log, e.g. its file path.
    fn id(&self) -> &str;

    /// Persist one accepted frame.
    ///
    /// # Errors
    ///
    /// Returns [`RotoError::Persistence`] when the write fails.
    fn append(&mut self, cloud: &CloudFrame, scan_index: u64, angle_rad: f64)
    -> Result<(), RotoError>;

    /// Flush and release the underlying storage.
    fn close(&mut self) -> Result<(), RotoError>;
}

/// Opens a [`SessionSink`] for each new session.
pub trait SinkFactory: Send {
    /// Open the sink for the model with the given counter.
    ///
    /// # Errors
    ///
    /// Returns [`RotoError::SinkUnavailable`] when the storage location cannot
    /// be created or opened.  The session must not start in that case.
    fn open(&mut self, model_index: u32) -> Result<Box<dyn SessionSink>, RotoError>;
}

/// Live, downstream receiver of swept frames.
pub trait CloudConsumer: Send {
    /// Called once per accepted frame with the frame's cloud and the sweep
    /// state after accepting it.
    fn consume(&mut self, cloud: &CloudFrame, scan_count: u64, angle_rad: f64);

    /// Called once when a session is finalized.
    fn finalized(&mut self, _model: &FinalizedModel) {}
}

/// A consumer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullConsumer;

impl CloudConsumer for NullConsumer {
    fn consume(&mut self, _cloud: &CloudFrame, _scan_count: u64, _angle_rad: f64) {}
}
