//! Computes how a background image has to be cropped and scaled to fill an output.
//!
//! The image keeps its aspect ratio: it's scaled until it covers the whole output and the
//! overlapping part gets cut off evenly on both sides.
//!
//! The compositing backend consumes a single linear transform instead of a crop followed by a
//! scale, so besides the clip rectangle in image pixels, [`ClipTransform`] also carries the clip
//! rectangle in the scaled space (see [`ClipTransform::scaled_rect`]).
use crate::topology::Geometry;

/// `1.0` in the 16.16 fixed-point format of the compositing backend.
pub const FIXED_ONE: i32 = 1 << 16;

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("Can't fit a {image_width}x{image_height} image onto a {output_width}x{output_height} output")]
    InvalidDimensions {
        output_width: u32,
        output_height: u32,
        image_width: u32,
        image_height: u32,
    },
}

/// A region of the source image, in image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClipRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scale {
    pub sx: f64,
    pub sy: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipTransform {
    /// The part of the image which ends up on the output.
    pub clip_rect: ClipRect,
    pub scale: Scale,
    /// `clip_rect` after applying `scale`. The origin is where the backend has to start
    /// sampling the scaled image, the size matches the output.
    pub scaled_rect: Geometry,
}

impl ClipTransform {
    /// The row-major 3x3 matrix which maps output coordinates into image coordinates.
    pub fn matrix(&self) -> [i32; 9] {
        [
            to_fixed(1.0 / self.scale.sx),
            0,
            0,
            0,
            to_fixed(1.0 / self.scale.sy),
            0,
            0,
            0,
            FIXED_ONE,
        ]
    }

    pub fn is_identity(&self) -> bool {
        self.matrix() == IDENTITY_MATRIX
    }
}

pub const IDENTITY_MATRIX: [i32; 9] = [FIXED_ONE, 0, 0, 0, FIXED_ONE, 0, 0, 0, FIXED_ONE];

pub fn to_fixed(value: f64) -> i32 {
    (value * f64::from(FIXED_ONE)).round() as i32
}

pub fn from_fixed(value: i32) -> f64 {
    f64::from(value) / f64::from(FIXED_ONE)
}

pub fn compute(
    output_width: u32,
    output_height: u32,
    image_width: u32,
    image_height: u32,
) -> Result<ClipTransform, Error> {
    if output_width == 0 || output_height == 0 || image_width == 0 || image_height == 0 {
        return Err(Error::InvalidDimensions {
            output_width,
            output_height,
            image_width,
            image_height,
        });
    }

    let (output_w, output_h) = (f64::from(output_width), f64::from(output_height));
    let (image_w, image_h) = (f64::from(image_width), f64::from(image_height));
    let target_aspect = output_w / output_h;

    // (offset_x, offset_y, width, height) in image pixels, offsets not yet rounded
    let candidate_height = (image_w / target_aspect).round();
    let (offset_x, offset_y, clip_w, clip_h) = if candidate_height <= image_h {
        let clip_h = candidate_height.max(1.0);
        (0.0, (image_h - clip_h) / 2.0, image_w, clip_h)
    } else {
        let clip_w = (image_h * target_aspect).round().clamp(1.0, image_w);
        ((image_w - clip_w) / 2.0, 0.0, clip_w, image_h)
    };

    let sx = output_w / clip_w;
    let sy = output_h / clip_h;

    Ok(ClipTransform {
        clip_rect: ClipRect {
            x: offset_x.floor() as u32,
            y: offset_y.floor() as u32,
            width: clip_w as u32,
            height: clip_h as u32,
        },
        scale: Scale { sx, sy },
        scaled_rect: Geometry {
            x: (offset_x * sx).round() as i32,
            y: (offset_y * sy).round() as i32,
            width: (clip_w * sx).round() as u32,
            height: (clip_h * sy).round() as u32,
        },
    })
}
