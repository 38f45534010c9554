//! `rotoscan-memory` – durable session storage.
//!
//! Persists every accepted frame of a sweep to a local SQLite file and reads
//! it back, utilizing the same substrate for reference models.
//!
//! # Modules
//!
//! - [`naming`] – [`LogName`][naming::LogName]: derives the session log
//!   identifier deterministically from the sweep configuration.
//! - [`session_log`] – [`SessionLog`][session_log::SessionLog]: append-only
//!   frame log implementing [`SessionSink`][rotoscan_kernel::SessionSink], its
//!   [`SessionLogFactory`][session_log::SessionLogFactory], and read-back of
//!   logged frames and reference models.

pub mod naming;
pub mod session_log;

pub use naming::LogName;
pub use session_log::{LoggedFrame, SessionLog, SessionLogError, SessionLogFactory};
