//! Everything which is needed to put the background image onto the outputs.
pub mod image_source;
pub mod scheduler;
pub mod transform;
