//! The model of the display topology: which outputs exist, where they are and what they can do.

mod identity;
mod mode;
pub mod monitor;
pub mod orientation;
mod store;

pub use identity::{IdentityAssigner, OutputId};
pub use mode::{Mode, ModeResolver};
pub use monitor::{LogicalMonitor, MonitorCatalog};
pub use orientation::{DeviceTransform, Rotation};
pub use store::{Geometry, TopologyStore};
