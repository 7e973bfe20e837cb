pub mod controller;
pub mod state;

pub use controller::{ExperimentController, ExperimentEvent, ExperimentSnapshot};
pub use state::{ExperimentConfig, ExperimentMode, ExperimentState};
