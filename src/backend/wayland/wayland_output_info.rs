use wayland_client::protocol::wl_output::{self, Transform};
use wayland_client::WEnum;

use crate::backend::OutputInfo;
use crate::topology::monitor::device_name;
use crate::topology::{orientation, Geometry, Mode};

/// Everything a `wl_output` told us about itself.
#[derive(Default, Clone, Debug, PartialEq)]
pub struct WaylandOutputInfo {
    pub name: String,
    pub make: String,
    pub model: String,
    pub x: i32,
    pub y: i32,
    /// The `wl_output` transform code.
    pub transform: i32,
    pub modes: Vec<Mode>,
}

impl WaylandOutputInfo {
    pub fn set_transform(&mut self, transform: WEnum<Transform>) {
        self.transform = match transform {
            WEnum::Value(transform) => u32::from(transform) as i32,
            WEnum::Unknown(code) => code as i32,
        };
    }

    /// `refresh` is in mHz.
    pub fn add_mode(
        &mut self,
        width: i32,
        height: i32,
        refresh: i32,
        flags: WEnum<wl_output::Mode>,
    ) {
        let flags = match flags {
            WEnum::Value(flags) => flags,
            WEnum::Unknown(_) => wl_output::Mode::empty(),
        };

        let mut mode = Mode::new(
            u32::try_from(width).unwrap_or_default(),
            u32::try_from(height).unwrap_or_default(),
            f64::from(refresh) / 1000.0,
        );
        mode.is_current = flags.contains(wl_output::Mode::Current);
        mode.is_preferred = flags.contains(wl_output::Mode::Preferred);

        // compositors resend the current mode after a mode switch
        self.modes.retain(|known| {
            (known.width, known.height, known.refresh_rate)
                != (mode.width, mode.height, mode.refresh_rate)
        });
        if mode.is_current {
            for known in &mut self.modes {
                known.is_current = false;
            }
        }
        self.modes.push(mode);
    }
}

impl From<&WaylandOutputInfo> for OutputInfo {
    fn from(value: &WaylandOutputInfo) -> Self {
        let name = if value.name.is_empty() {
            device_name(&value.model, &value.make)
        } else {
            value.name.clone()
        };
        let rotation = orientation::to_internal(value.transform);

        // modes are reported untransformed
        let geometry = value
            .modes
            .iter()
            .find(|mode| mode.is_current)
            .map(|mode| {
                let (width, height) = if rotation.is_portrait() {
                    (mode.height, mode.width)
                } else {
                    (mode.width, mode.height)
                };
                Geometry::new(value.x, value.y, width, height)
            })
            .unwrap_or_default();

        OutputInfo {
            durable_id: name.clone(),
            name,
            geometry,
            rotation,
            connected: true,
            modes: value.modes.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::Rotation;

    #[test]
    fn test_rotated_output() {
        let mut info = WaylandOutputInfo {
            name: "DP-1".into(),
            x: 1920,
            ..Default::default()
        };
        info.set_transform(WEnum::Value(Transform::Flipped270));
        info.add_mode(2560, 1440, 59951, WEnum::Value(wl_output::Mode::Preferred));
        info.add_mode(1920, 1080, 60000, WEnum::Value(wl_output::Mode::Current));

        let output = OutputInfo::from(&info);
        assert_eq!(output.rotation, Rotation::Rotate270);
        assert_eq!(output.geometry, Geometry::new(1920, 0, 1080, 1920));
        assert_eq!(output.modes.len(), 2);
        assert!(output.modes[0].is_preferred);
    }

    #[test]
    fn test_mode_switch_moves_current_flag() {
        let mut info = WaylandOutputInfo::default();
        info.add_mode(1920, 1080, 60000, WEnum::Value(wl_output::Mode::Current));
        info.add_mode(1280, 720, 60000, WEnum::Value(wl_output::Mode::empty()));
        info.add_mode(1280, 720, 60000, WEnum::Value(wl_output::Mode::Current));

        let current: Vec<_> = info.modes.iter().filter(|mode| mode.is_current).collect();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].name(), "1280x720");
        assert_eq!(info.modes.len(), 2);
    }

    #[test]
    fn test_unnamed_output_uses_model() {
        let info = WaylandOutputInfo {
            make: "dell".into(),
            model: "eDP-1-dell".into(),
            ..Default::default()
        };

        let output = OutputInfo::from(&info);
        assert_eq!(output.durable_id, "eDP-1");
        assert!(output.geometry.is_empty());
    }
}
