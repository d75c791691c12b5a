pub mod audit;
pub mod config;
pub mod controller;
pub mod error;
pub mod gpio;
pub mod registry;
pub mod relay;
pub mod sensors;
pub mod store;
pub mod sweeper;
pub mod switch;
pub mod worker;

pub use controller::{Controller, ControllerTasks};
pub use error::{MistError, Result};
pub use relay::{Relay, RelayId, RelayState};
