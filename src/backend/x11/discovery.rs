//! Finds the outputs through RandR and follows their changes.
use std::collections::HashMap;

use tracing::{debug, instrument};
use x11rb::{
    connection::{Connection, RequestConnection},
    protocol::{
        randr::{self, ConnectionExt as _, NotifyMask},
        xproto::Window,
        Event,
    },
    rust_connection::RustConnection,
    NONE,
};

use crate::{
    backend::OutputInfo,
    topology::{Geometry, Mode, Rotation},
};

use super::Error;

/// What the listener reports to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayEvent {
    OutputChanged(OutputInfo),
    ScreenResized { width: u32, height: u32 },
}

#[derive(Debug)]
struct Discovered {
    info: OutputInfo,
    crtc: randr::Crtc,
}

pub fn discover_outputs(conn: &RustConnection, root: Window) -> Result<Vec<OutputInfo>, Error> {
    Ok(discover(conn, root)?
        .into_iter()
        .map(|output| output.info)
        .collect())
}

/// Lists the outputs over a short-lived connection of its own.
pub fn query_outputs() -> Result<Vec<OutputInfo>, Error> {
    let (conn, screen_num) = x11rb::connect(None)?;
    let root = conn
        .setup()
        .roots
        .get(screen_num)
        .ok_or(Error::NoScreen(screen_num))?
        .root;

    discover_outputs(&conn, root)
}

fn discover(conn: &RustConnection, root: Window) -> Result<Vec<Discovered>, Error> {
    let resources = conn.randr_get_screen_resources_current(root)?.reply()?;
    let timestamp = resources.config_timestamp;
    let mode_infos: HashMap<randr::Mode, &randr::ModeInfo> =
        resources.modes.iter().map(|mode| (mode.id, mode)).collect();

    let mut outputs = Vec::with_capacity(resources.outputs.len());
    for &output in &resources.outputs {
        let info = conn.randr_get_output_info(output, timestamp)?.reply()?;
        let name = String::from_utf8(info.name)?;
        let connected = info.connection == randr::Connection::CONNECTED;

        let mut geometry = Geometry::default();
        let mut rotation = Rotation::Normal;
        let mut current_mode = NONE;
        if info.crtc != NONE {
            let crtc = conn.randr_get_crtc_info(info.crtc, timestamp)?.reply()?;
            if crtc.mode != NONE {
                geometry = Geometry::new(
                    crtc.x.into(),
                    crtc.y.into(),
                    crtc.width.into(),
                    crtc.height.into(),
                );
                rotation = Rotation::from_randr_bits(u16::from(crtc.rotation));
                current_mode = crtc.mode;
            }
        }

        let modes = info
            .modes
            .iter()
            .enumerate()
            .filter_map(|(index, id)| {
                let mode = mode_infos.get(id)?;
                Some(Mode {
                    width: mode.width.into(),
                    height: mode.height.into(),
                    refresh_rate: refresh_rate(mode.dot_clock, mode.htotal, mode.vtotal),
                    is_preferred: index < usize::from(info.num_preferred),
                    is_current: *id == current_mode,
                })
            })
            .collect();

        debug!("Found output '{}' at {:?}", name, geometry);
        outputs.push(Discovered {
            info: OutputInfo {
                durable_id: name.clone(),
                name,
                geometry,
                rotation,
                connected,
                modes,
            },
            crtc: info.crtc,
        });
    }

    Ok(outputs)
}

/// In Hz.
pub fn refresh_rate(dot_clock: u32, htotal: u16, vtotal: u16) -> f64 {
    let pixels_per_frame = f64::from(htotal) * f64::from(vtotal);
    if pixels_per_frame == 0.0 {
        return 0.0;
    }

    f64::from(dot_clock) / pixels_per_frame
}

/// Blocks and hands every topology change to `handler`. Opens its own connection so it
/// doesn't compete with the draw calls for events.
#[instrument(skip_all)]
pub fn listen<F: FnMut(DisplayEvent)>(mut handler: F) -> Result<(), Error> {
    let (conn, screen_num) = x11rb::connect(None)?;
    let root = conn
        .setup()
        .roots
        .get(screen_num)
        .ok_or(Error::NoScreen(screen_num))?
        .root;

    conn.extension_information(randr::X11_EXTENSION_NAME)?
        .ok_or(Error::MissingExtension(randr::X11_EXTENSION_NAME))?;
    conn.randr_query_version(1, 5)?.reply()?;
    conn.randr_select_input(root, NotifyMask::SCREEN_CHANGE | NotifyMask::CRTC_CHANGE)?;
    conn.flush()?;

    // which outputs every crtc drives, so we know who is gone once a crtc turns off
    let mut driven_by: HashMap<randr::Crtc, Vec<String>> = HashMap::new();
    for output in discover(&conn, root)? {
        if output.crtc != NONE {
            driven_by
                .entry(output.crtc)
                .or_default()
                .push(output.info.durable_id);
        }
    }

    loop {
        match conn.wait_for_event()? {
            Event::RandrScreenChangeNotify(event) => {
                debug!("Screen changed to {}x{}", event.width, event.height);
                handler(DisplayEvent::ScreenResized {
                    width: event.width.into(),
                    height: event.height.into(),
                });
            }
            Event::RandrNotify(event) if event.sub_code == randr::Notify::CRTC_CHANGE => {
                let change = event.u.as_cc();
                debug!("Crtc {} changed to mode {}", change.crtc, change.mode);

                let previous = driven_by.remove(&change.crtc).unwrap_or_default();
                let mut current = Vec::new();

                for mut output in discover(&conn, root)? {
                    let on_crtc = output.crtc == change.crtc;
                    if !on_crtc && !previous.contains(&output.info.durable_id) {
                        continue;
                    }

                    if change.mode == NONE {
                        output.info.connected = false;
                        output.info.geometry = Geometry::default();
                    } else if on_crtc {
                        current.push(output.info.durable_id.clone());
                    }

                    handler(DisplayEvent::OutputChanged(output.info));
                }

                if !current.is_empty() {
                    driven_by.insert(change.crtc, current);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_rate() {
        // the CVT 1920x1080@60 modeline
        let rate = refresh_rate(173_000_000, 2576, 1120);
        assert!((rate - 59.96).abs() < 0.01);

        assert_eq!(refresh_rate(148_500_000, 2200, 1125), 60.0);
        assert_eq!(refresh_rate(148_500_000, 0, 1125), 0.0);
    }
}
