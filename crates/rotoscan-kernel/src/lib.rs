//! `rotoscan-kernel` – session state and orchestration.
//!
//! Owns everything that changes while a sweep is being captured.
//!
//! # Modules
//!
//! - [`session`] – [`ScanSession`][session::ScanSession]: the accumulated
//!   point buffer, scan counter and current sweep angle.
//! - [`sink`] – the [`SessionSink`][sink::SessionSink],
//!   [`SinkFactory`][sink::SinkFactory] and
//!   [`CloudConsumer`][sink::CloudConsumer] seams through which accepted
//!   frames leave the kernel.
//! - [`state_machine`] – [`SessionStateMachine`][state_machine::SessionStateMachine]:
//!   drives a session through `Waiting → Started → Scanning → Stopped` from
//!   start/stop commands and the auto-stop angle guard.

pub mod session;
pub mod sink;
pub mod state_machine;

pub use session::ScanSession;
pub use sink::{CloudConsumer, SessionSink, SinkFactory};
pub use state_machine::{IngestOutcome, SessionConfig, SessionState, SessionStateMachine};
