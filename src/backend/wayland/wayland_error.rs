///
/// A general enum with possible errors as values which can occur in the wayland backend.
///
#[derive(thiserror::Error, Debug)]
pub enum WaylandError {
    #[error("Couldn't connect to the wayland compositor: {0}")]
    Connect(#[from] wayland_client::ConnectError),

    #[error("There was an error while dispatching the event queue: {0}")]
    Dispatch(#[from] wayland_client::DispatchError),

    #[error("The compositor didn't advertise any output")]
    NoOutputs,
}
