//! Contains the outer world of the engine: the display servers we draw onto and take the
//! topology from, and the external tool which applies a topology.

pub mod wayland;
pub mod wloutput;
pub mod x11;

use image::DynamicImage;

use crate::{
    compositor::transform::ClipTransform,
    topology::{Geometry, Mode, Rotation},
};

/// A general backend error enum.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The X server refused a request or the connection broke.
    #[error(transparent)]
    X11(#[from] x11::Error),

    #[error("The compositing backend rejected the call: {0}")]
    Rejected(String),
}

/// The configuration daemon refused to apply the topology of an output.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Couldn't apply the configuration of output '{durable_id}': {reason}")]
pub struct ApplyError {
    pub durable_id: String,
    pub reason: String,
}

/// An output as a backend discovered it.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputInfo {
    /// A key which stays the same across replugs and reboots.
    pub durable_id: String,
    pub name: String,
    pub geometry: Geometry,
    pub rotation: Rotation,
    pub connected: bool,
    /// Empty if the backend didn't tell us about them.
    pub modes: Vec<Mode>,
}

/// The wanted configuration of one output.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputConfig {
    pub durable_id: String,
    pub enabled: bool,
    pub x: i32,
    pub y: i32,
    pub mode: Mode,
    pub rotation: Rotation,
}

impl OutputConfig {
    /// The region the output covers once the configuration is applied.
    pub fn geometry(&self) -> Geometry {
        let (width, height) = if self.rotation.is_portrait() {
            (self.mode.height, self.mode.width)
        } else {
            (self.mode.width, self.mode.height)
        };

        Geometry::new(self.x, self.y, width, height)
    }
}

/// The compositing primitive: draws a region of a bound image onto the background surface.
///
/// Implementations may block, the engine calls them off its async workers.
pub trait DrawBackend: Send + Sync + 'static {
    /// The server side handle of a bound image. Dropping it releases it.
    type Picture: Send + Sync + 'static;

    fn bind(&self, image: &DynamicImage) -> Result<Self::Picture, Error>;

    fn draw(
        &self,
        picture: &Self::Picture,
        transform: &ClipTransform,
        destination: Geometry,
    ) -> Result<(), Error>;

    /// Resizes the background surface to the new size of the virtual screen.
    fn resize_surface(&self, width: u32, height: u32) -> Result<(), Error>;
}

/// Delegates topology changes to the external display configuration daemon.
pub trait TopologyApplier: Send + Sync + 'static {
    fn apply(&self, output: &OutputConfig) -> Result<(), ApplyError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_portrait_config_swaps_mode() {
        let mut config = OutputConfig {
            durable_id: "DP-1".into(),
            enabled: true,
            x: 1920,
            y: 0,
            mode: Mode::new(2560, 1440, 59.95),
            rotation: Rotation::Rotate270,
        };
        assert_eq!(config.geometry(), Geometry::new(1920, 0, 1440, 2560));

        config.rotation = Rotation::Rotate180;
        assert_eq!(config.geometry(), Geometry::new(1920, 0, 2560, 1440));
    }
}
