pub mod driver;

pub use driver::{DriverConfig, SimulationDriver, TransitionCounts};
