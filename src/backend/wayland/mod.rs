//! One-shot output discovery for wayland sessions.
use tracing::debug;
use wayland_client::Connection;

use crate::backend::wayland::wayland_error::WaylandError;
use crate::backend::wayland::wayland_output_state::WaylandOutputState;
use crate::backend::OutputInfo;

pub mod wayland_error;
pub(crate) mod wayland_output_info;
pub(crate) mod wayland_output_state;

/// Asks the compositor for every `wl_output` and what it knows about them.
pub fn discover_outputs() -> Result<Vec<OutputInfo>, WaylandError> {
    let conn = Connection::connect_to_env()?;
    let mut queue = conn.new_event_queue();
    let qhandle = queue.handle();
    conn.display().get_registry(&qhandle, ());

    let mut state = WaylandOutputState::default();
    // the first roundtrip binds the outputs, the second one receives their properties
    queue.roundtrip(&mut state)?;
    queue.roundtrip(&mut state)?;

    if state.outputs.is_empty() {
        return Err(WaylandError::NoOutputs);
    }

    let outputs: Vec<OutputInfo> = state
        .outputs
        .iter()
        .map(|(_, output)| OutputInfo::from(output))
        .collect();
    debug!("Found {} wayland outputs", outputs.len());

    Ok(outputs)
}
