//! Background workers.

pub mod poller;

pub use poller::{CycleOutcome, PollSettings, PollTask, spawn_poller};
