//! Packs decoded images into the pixel layout of the X server.
use image::RgbImage;
use x11rb::protocol::xproto::{ImageOrder, Screen, Setup, VisualClass};

use super::Error;

const BYTES_PER_PIXEL: usize = 4;
/// The fixed part of a `PutImage` request.
const PUT_IMAGE_HEADER: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelLayout {
    red_shift: u32,
    green_shift: u32,
    blue_shift: u32,
    byte_order: ImageOrder,
}

impl PixelLayout {
    /// Only 24 and 32 bit TrueColor visuals with 32 bits per pixel are supported.
    pub fn for_screen(setup: &Setup, screen: &Screen) -> Result<Self, Error> {
        let unsupported = Error::UnsupportedVisual {
            depth: screen.root_depth,
        };

        let visual = screen
            .allowed_depths
            .iter()
            .filter(|depth| depth.depth == screen.root_depth)
            .flat_map(|depth| &depth.visuals)
            .find(|visual| visual.visual_id == screen.root_visual)
            .ok_or(Error::MissingRootVisual(screen.root_visual))?;

        if visual.class != VisualClass::TRUE_COLOR {
            return Err(unsupported);
        }

        let bits_per_pixel = setup
            .pixmap_formats
            .iter()
            .find(|format| format.depth == screen.root_depth)
            .map(|format| format.bits_per_pixel);
        if bits_per_pixel != Some(32) {
            return Err(unsupported);
        }

        Ok(Self {
            red_shift: visual.red_mask.trailing_zeros(),
            green_shift: visual.green_mask.trailing_zeros(),
            blue_shift: visual.blue_mask.trailing_zeros(),
            byte_order: setup.image_byte_order,
        })
    }

    pub fn encode(&self, image: &RgbImage) -> Vec<u8> {
        let mut data = Vec::with_capacity(image.as_raw().len() / 3 * BYTES_PER_PIXEL);

        for pixel in image.pixels() {
            let [r, g, b] = pixel.0;
            let value = (u32::from(r) << self.red_shift)
                | (u32::from(g) << self.green_shift)
                | (u32::from(b) << self.blue_shift);

            if self.byte_order == ImageOrder::LSB_FIRST {
                data.extend_from_slice(&value.to_le_bytes());
            } else {
                data.extend_from_slice(&value.to_be_bytes());
            }
        }

        data
    }
}

/// How many rows of an image with the given width fit into one `PutImage` request.
pub fn rows_per_request(width: u32, max_request_bytes: usize) -> usize {
    let row_bytes = (width as usize * BYTES_PER_PIXEL).max(1);
    (max_request_bytes.saturating_sub(PUT_IMAGE_HEADER) / row_bytes).max(1)
}

#[cfg(test)]
mod tests {
    use image::Rgb;

    use super::*;

    fn layout(byte_order: ImageOrder) -> PixelLayout {
        PixelLayout {
            red_shift: 16,
            green_shift: 8,
            blue_shift: 0,
            byte_order,
        }
    }

    #[test]
    fn test_encode_lsb_first() {
        let image = RgbImage::from_pixel(2, 1, Rgb([0x11, 0x22, 0x33]));

        let data = layout(ImageOrder::LSB_FIRST).encode(&image);
        assert_eq!(data, [0x33, 0x22, 0x11, 0x00, 0x33, 0x22, 0x11, 0x00]);
    }

    #[test]
    fn test_encode_msb_first() {
        let image = RgbImage::from_pixel(1, 1, Rgb([0x11, 0x22, 0x33]));

        let data = layout(ImageOrder::MSB_FIRST).encode(&image);
        assert_eq!(data, [0x00, 0x11, 0x22, 0x33]);
    }

    #[test]
    fn test_rows_per_request() {
        // 1920 pixels are 7680 bytes per row
        assert_eq!(rows_per_request(1920, 262_140), 34);
        // a single row is always sent, even if it's too big
        assert_eq!(rows_per_request(100_000, 1024), 1);
        assert_eq!(rows_per_request(0, 1024), 1000);
    }
}
