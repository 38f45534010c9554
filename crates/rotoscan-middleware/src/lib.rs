//! `rotoscan-middleware` – live delivery of sweep output.
//!
//! Routes swept frames, detector diagnostics and session lifecycle events to
//! any number of in-process subscribers without caring about the data's
//! meaning.
//!
//! # Modules
//!
//! - [`bus`] – Headless, typed, topic-based publish/subscribe event bus built
//!   on Tokio broadcast channels.

pub mod bus;

pub use bus::{EventBus, Topic, TopicReceiver};
