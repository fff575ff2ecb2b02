//! Mapping between the rotation of the topology model and the device transform codes
//! which output management protocols (`wl_output.transform`, output-device daemons) use.
//!
//! # Flipped transforms
//! The topology model only knows about rotations. The four flipped device transforms are
//! folded onto the rotation they are based on, so the flip is lost on the way in and
//! [`to_external`] never produces a flipped code.
use serde::Serialize;

/// The rotation of an output as the topology tracks it.
///
/// The discriminants are the RandR rotation bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[repr(u16)]
pub enum Rotation {
    #[default]
    Normal = 1,
    Rotate90 = 2,
    Rotate180 = 4,
    Rotate270 = 8,
}

impl Rotation {
    pub const ALL: [Self; 4] = [
        Self::Normal,
        Self::Rotate90,
        Self::Rotate180,
        Self::Rotate270,
    ];

    /// Picks the rotation out of a RandR rotation mask. Reflection bits are ignored.
    pub fn from_randr_bits(bits: u16) -> Self {
        Self::ALL
            .into_iter()
            .find(|rotation| bits & rotation.randr_bits() != 0)
            .unwrap_or_default()
    }

    pub fn randr_bits(self) -> u16 {
        self as u16
    }

    /// Returns `true` if width and height of the mode are swapped on screen.
    pub fn is_portrait(self) -> bool {
        matches!(self, Self::Rotate90 | Self::Rotate270)
    }
}

/// The transform codes of an output device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum DeviceTransform {
    Normal = 0,
    Rotate90 = 1,
    Rotate180 = 2,
    Rotate270 = 3,
    Flipped = 4,
    Flipped90 = 5,
    Flipped180 = 6,
    Flipped270 = 7,
}

impl DeviceTransform {
    pub fn from_code(code: i32) -> Option<Self> {
        let transform = match code {
            0 => Self::Normal,
            1 => Self::Rotate90,
            2 => Self::Rotate180,
            3 => Self::Rotate270,
            4 => Self::Flipped,
            5 => Self::Flipped90,
            6 => Self::Flipped180,
            7 => Self::Flipped270,
            _ => return None,
        };

        Some(transform)
    }

    pub fn code(self) -> i32 {
        self as i32
    }
}

impl From<DeviceTransform> for i32 {
    fn from(transform: DeviceTransform) -> Self {
        transform.code()
    }
}

pub fn to_external(rotation: Rotation) -> DeviceTransform {
    match rotation {
        Rotation::Normal => DeviceTransform::Normal,
        Rotation::Rotate90 => DeviceTransform::Rotate90,
        Rotation::Rotate180 => DeviceTransform::Rotate180,
        Rotation::Rotate270 => DeviceTransform::Rotate270,
    }
}

/// Unknown codes map to [`Rotation::Normal`].
pub fn to_internal(code: i32) -> Rotation {
    match DeviceTransform::from_code(code) {
        Some(DeviceTransform::Normal | DeviceTransform::Flipped) | None => Rotation::Normal,
        Some(DeviceTransform::Rotate90 | DeviceTransform::Flipped90) => Rotation::Rotate90,
        Some(DeviceTransform::Rotate180 | DeviceTransform::Flipped180) => Rotation::Rotate180,
        Some(DeviceTransform::Rotate270 | DeviceTransform::Flipped270) => Rotation::Rotate270,
    }
}
