//! Application wiring: the controller that connects configuration events,
//! the event reactors, and the sweep coordinator.

pub mod controller;

pub use controller::{ConfigEvent, Controller};
