use wayland_client::backend::ObjectId;
use wayland_client::protocol::wl_output::{self, WlOutput};
use wayland_client::protocol::wl_registry;
use wayland_client::{Connection, Dispatch, Proxy, QueueHandle};

use crate::backend::wayland::wayland_output_info::WaylandOutputInfo;

/**
 *   Globals as advertised by the Wayland compositor.
 */
const WL_OUTPUT: &str = "wl_output";
/// Version 4 adds the connector name.
const WL_OUTPUT_VERSION: u32 = 4;

#[derive(Default, Debug)]
pub struct WaylandOutputState {
    pub outputs: Vec<(ObjectId, WaylandOutputInfo)>,
}

impl Dispatch<WlOutput, ()> for WaylandOutputState {
    fn event(
        state: &mut Self,
        proxy: &WlOutput,
        event: wl_output::Event,
        _data: &(),
        _conn: &Connection,
        _qhandle: &QueueHandle<Self>,
    ) {
        let index = match state.outputs.iter().position(|(id, _)| *id == proxy.id()) {
            Some(index) => index,
            None => {
                state.outputs.push((proxy.id(), WaylandOutputInfo::default()));
                state.outputs.len() - 1
            }
        };
        let output = &mut state.outputs[index].1;

        match event {
            wl_output::Event::Name { name } => output.name = name,
            wl_output::Event::Geometry {
                x,
                y,
                make,
                model,
                transform,
                ..
            } => {
                output.x = x;
                output.y = y;
                output.make = make;
                output.model = model;
                output.set_transform(transform);
            }
            wl_output::Event::Mode {
                width,
                height,
                refresh,
                flags,
            } => output.add_mode(width, height, refresh, flags),
            _ => (),
        }
    }
}

// #########################
// # Wayland Event Handler #
// #########################

impl Dispatch<wl_registry::WlRegistry, ()> for WaylandOutputState {
    fn event(
        _state: &mut Self,
        registry: &wl_registry::WlRegistry,
        event: wl_registry::Event,
        _data: &(),
        _conn: &Connection,
        qhandle: &QueueHandle<Self>,
    ) {
        // bind to global events
        if let wl_registry::Event::Global {
            name,
            interface,
            version,
        } = event
        {
            if interface == WL_OUTPUT {
                registry.bind::<WlOutput, _, _>(
                    name,
                    version.min(WL_OUTPUT_VERSION),
                    qhandle,
                    (),
                );
            }
        }
    }
}
