//! Backend implementation for X11.
//!
//! The background lives in a pixmap which is the background of a desktop window covering the
//! whole screen. Images are uploaded once into their own pixmap and scaled onto the outputs
//! with the RENDER extension.
mod discovery;
mod pixels;

use std::sync::Arc;

use image::DynamicImage;
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use x11rb::{
    connection::{Connection, RequestConnection},
    protocol::{
        randr,
        render::{
            self, ConnectionExt as _, CreatePictureAux, PictOp, PictType, Pictformat, Picture,
            Transform,
        },
        xproto::{
            AtomEnum, ChangeWindowAttributesAux, ConfigureWindowAux, ConnectionExt as _,
            CreateGCAux, CreateWindowAux, ImageFormat, Pixmap, PropMode, Screen, Visualid,
            Window, WindowClass,
        },
    },
    rust_connection::RustConnection,
    wrapper::ConnectionExt as _,
    COPY_DEPTH_FROM_PARENT, COPY_FROM_PARENT, NONE,
};

use crate::{
    compositor::transform::{ClipTransform, IDENTITY_MATRIX},
    topology::Geometry,
};

use self::pixels::PixelLayout;

pub use self::discovery::{discover_outputs, listen, query_outputs, refresh_rate, DisplayEvent};

use super::{DrawBackend, OutputInfo};

const WINDOW_NAME: &str = "Backdrop";
const BILINEAR_FILTER: &[u8] = b"bilinear";
/// Requests take 16 bit signed coordinates.
const MAX_COORDINATE: u32 = i16::MAX as u32;

/// A general enum with possible errors as values which can occur while
/// operating with the xorg-server.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Couldn't connect to the xorg server: {0}")]
    ConnectError(#[from] x11rb::errors::ConnectError),

    #[error("The connection broke with the xorg server: {0}")]
    ConnectionError(#[from] x11rb::errors::ConnectionError),

    #[error("The xorg server refused a request: {0}")]
    ReplyError(#[from] x11rb::errors::ReplyError),

    #[error("The xorg server refused a request: {0}")]
    ReplyOrIdError(#[from] x11rb::errors::ReplyOrIdError),

    #[error(transparent)]
    StringUtf8(#[from] std::string::FromUtf8Error),

    #[error("The xorg server doesn't have a screen {0}")]
    NoScreen(usize),

    #[error("The xorg server doesn't support the {0} extension")]
    MissingExtension(&'static str),

    #[error("Couldn't find the root visual {0}")]
    MissingRootVisual(Visualid),

    #[error("Screens with a depth of {depth} bits aren't supported")]
    UnsupportedVisual { depth: u8 },

    #[error("There's no RENDER picture format for the root visual")]
    MissingPictFormat,

    #[error("The image is too large: {0}x{1}")]
    ImageTooLarge(u32, u32),
}

x11rb::atom_manager! {
    pub Atoms: AtomsCookie {
        _NET_WM_WINDOW_TYPE,
        _NET_WM_WINDOW_TYPE_DESKTOP,
        _NET_WM_NAME,
        UTF8_STRING,
        _BACKDROP_BACKGROUND_WINDOW,
        _BACKDROP_BACKGROUND_PIXMAP,
    }
}

/// The pixmap the outputs are drawn onto.
#[derive(Debug)]
struct Surface {
    pixmap: Pixmap,
    picture: Picture,
    width: u16,
    height: u16,
}

impl Surface {
    fn create(
        conn: &RustConnection,
        root: Window,
        depth: u8,
        format: Pictformat,
        width: u16,
        height: u16,
    ) -> Result<Self, Error> {
        let pixmap = conn.generate_id()?;
        conn.create_pixmap(depth, pixmap, root, width, height)?;

        let picture = conn.generate_id()?;
        conn.render_create_picture(picture, pixmap, format, &CreatePictureAux::new())?;

        Ok(Self {
            pixmap,
            picture,
            width,
            height,
        })
    }

    fn free(&self, conn: &RustConnection) -> Result<(), Error> {
        conn.render_free_picture(self.picture)?;
        conn.free_pixmap(self.pixmap)?;
        Ok(())
    }
}

/// An image which got uploaded to the X server. The server side resources are released once
/// this is dropped.
#[derive(Debug)]
pub struct X11Picture {
    conn: Arc<RustConnection>,
    pixmap: Pixmap,
    picture: Picture,
}

impl Drop for X11Picture {
    fn drop(&mut self) {
        let freed = self
            .conn
            .render_free_picture(self.picture)
            .and_then(|_| self.conn.free_pixmap(self.pixmap))
            .and_then(|_| self.conn.flush());

        if let Err(err) = freed {
            warn!("Couldn't release picture {}: {}", self.picture, err);
        }
    }
}

#[derive(Debug)]
pub struct X11Backend {
    conn: Arc<RustConnection>,
    root: Window,
    window: Window,
    depth: u8,
    format: Pictformat,
    layout: PixelLayout,
    atoms: Atoms,
    /// Also serialises every use of the transform of a bound picture.
    surface: Mutex<Surface>,
}

impl X11Backend {
    /// Connects to the X server and maps the background window.
    ///
    /// `fallback_size` is used if the server reports a screen without pixels.
    pub fn connect(fallback_size: (u32, u32)) -> Result<Self, Error> {
        let (conn, screen_num) = x11rb::connect(None)?;
        let conn = Arc::new(conn);

        for extension in [render::X11_EXTENSION_NAME, randr::X11_EXTENSION_NAME] {
            conn.extension_information(extension)?
                .ok_or(Error::MissingExtension(extension))?;
        }

        let screen = conn
            .setup()
            .roots
            .get(screen_num)
            .ok_or(Error::NoScreen(screen_num))?;
        let (root, depth) = (screen.root, screen.root_depth);
        let layout = PixelLayout::for_screen(conn.setup(), screen)?;
        let format = find_pict_format(&conn, screen_num, screen.root_visual)?;
        let (width, height) = initial_size(&conn, screen, fallback_size)?;
        info!("Background surface: {}x{} ({} bit)", width, height, depth);

        let atoms = Atoms::new(&*conn)?.reply()?;
        let surface = Surface::create(&conn, root, depth, format, width, height)?;

        let window = conn.generate_id()?;
        conn.create_window(
            COPY_DEPTH_FROM_PARENT,
            window,
            root,
            0,
            0,
            width,
            height,
            0,
            WindowClass::INPUT_OUTPUT,
            COPY_FROM_PARENT,
            &CreateWindowAux::new().background_pixmap(surface.pixmap),
        )?;
        conn.change_property32(
            PropMode::REPLACE,
            window,
            atoms._NET_WM_WINDOW_TYPE,
            AtomEnum::ATOM,
            &[atoms._NET_WM_WINDOW_TYPE_DESKTOP],
        )?;
        conn.change_property8(
            PropMode::REPLACE,
            window,
            atoms._NET_WM_NAME,
            atoms.UTF8_STRING,
            WINDOW_NAME.as_bytes(),
        )?;
        conn.change_property32(
            PropMode::REPLACE,
            root,
            atoms._BACKDROP_BACKGROUND_WINDOW,
            AtomEnum::WINDOW,
            &[window],
        )?;
        conn.map_window(window)?;

        let pixmap = surface.pixmap;
        let backend = Self {
            conn,
            root,
            window,
            depth,
            format,
            layout,
            atoms,
            surface: Mutex::new(surface),
        };
        backend.publish_pixmap(pixmap)?;
        backend.conn.flush()?;

        Ok(backend)
    }

    pub fn list_outputs(&self) -> Result<Vec<OutputInfo>, Error> {
        discover_outputs(&self.conn, self.root)
    }

    /// The size of the background surface.
    pub fn surface_size(&self) -> (u32, u32) {
        let surface = self.surface.lock();
        (surface.width.into(), surface.height.into())
    }

    fn publish_pixmap(&self, pixmap: Pixmap) -> Result<(), Error> {
        self.conn.change_property32(
            PropMode::REPLACE,
            self.root,
            self.atoms._BACKDROP_BACKGROUND_PIXMAP,
            AtomEnum::PIXMAP,
            &[pixmap],
        )?;
        Ok(())
    }

    fn upload(&self, image: &DynamicImage) -> Result<X11Picture, Error> {
        let (width, height) = (image.width(), image.height());
        if width > MAX_COORDINATE || height > MAX_COORDINATE {
            return Err(Error::ImageTooLarge(width, height));
        }
        let (width_u16, height_u16) = (width as u16, height as u16);

        let pixmap = self.conn.generate_id()?;
        self.conn
            .create_pixmap(self.depth, pixmap, self.root, width_u16, height_u16)?;

        let gc = self.conn.generate_id()?;
        self.conn.create_gc(gc, pixmap, &CreateGCAux::new())?;

        let data = self.layout.encode(&image.to_rgb8());
        let row_bytes = width as usize * 4;
        let rows = pixels::rows_per_request(width, self.conn.maximum_request_bytes());
        debug!("Upload {}x{} image, {} rows per request", width, height, rows);

        for (index, chunk) in data.chunks(row_bytes * rows).enumerate() {
            let y = index * rows;
            self.conn.put_image(
                ImageFormat::Z_PIXMAP,
                pixmap,
                gc,
                width_u16,
                (chunk.len() / row_bytes) as u16,
                0,
                y as i16,
                0,
                self.depth,
                chunk,
            )?;
        }
        self.conn.free_gc(gc)?;

        let picture = self.conn.generate_id()?;
        self.conn
            .render_create_picture(picture, pixmap, self.format, &CreatePictureAux::new())?;
        self.conn
            .render_set_picture_filter(picture, BILINEAR_FILTER, &[])?
            .check()?;

        Ok(X11Picture {
            conn: Arc::clone(&self.conn),
            pixmap,
            picture,
        })
    }

    fn composite(
        &self,
        picture: &X11Picture,
        transform: &ClipTransform,
        destination: Geometry,
    ) -> Result<(), Error> {
        let surface = self.surface.lock();
        let (x, y) = (clamp_i16(destination.x), clamp_i16(destination.y));
        let (width, height) = (clamp_u16(destination.width), clamp_u16(destination.height));

        self.conn
            .render_set_picture_transform(picture.picture, to_render_transform(transform.matrix()))?;
        let composited = self.conn.render_composite(
            PictOp::SRC,
            picture.picture,
            NONE,
            surface.picture,
            clamp_i16(transform.scaled_rect.x),
            clamp_i16(transform.scaled_rect.y),
            0,
            0,
            x,
            y,
            width,
            height,
        )?;
        self.conn
            .render_set_picture_transform(picture.picture, to_render_transform(IDENTITY_MATRIX))?;
        self.conn.clear_area(false, self.window, x, y, width, height)?;

        composited.check()?;
        Ok(())
    }

    fn resize(&self, width: u32, height: u32) -> Result<(), Error> {
        let (width, height) = (clamp_u16(width), clamp_u16(height));
        let mut surface = self.surface.lock();
        if (surface.width, surface.height) == (width, height) {
            return Ok(());
        }

        let resized = Surface::create(&self.conn, self.root, self.depth, self.format, width, height)?;
        // keep what is already drawn
        self.conn.render_composite(
            PictOp::SRC,
            surface.picture,
            NONE,
            resized.picture,
            0,
            0,
            0,
            0,
            0,
            0,
            width.min(surface.width),
            height.min(surface.height),
        )?;
        self.conn.change_window_attributes(
            self.window,
            &ChangeWindowAttributesAux::new().background_pixmap(resized.pixmap),
        )?;
        self.conn.configure_window(
            self.window,
            &ConfigureWindowAux::new()
                .width(u32::from(width))
                .height(u32::from(height)),
        )?;
        self.publish_pixmap(resized.pixmap)?;

        let previous = std::mem::replace(&mut *surface, resized);
        previous.free(&self.conn)?;

        self.conn.clear_area(false, self.window, 0, 0, width, height)?;
        self.conn.flush()?;
        Ok(())
    }
}

impl DrawBackend for X11Backend {
    type Picture = X11Picture;

    fn bind(&self, image: &DynamicImage) -> Result<Self::Picture, super::Error> {
        Ok(self.upload(image)?)
    }

    fn draw(
        &self,
        picture: &Self::Picture,
        transform: &ClipTransform,
        destination: Geometry,
    ) -> Result<(), super::Error> {
        Ok(self.composite(picture, transform, destination)?)
    }

    fn resize_surface(&self, width: u32, height: u32) -> Result<(), super::Error> {
        Ok(self.resize(width, height)?)
    }
}

fn find_pict_format(
    conn: &RustConnection,
    screen_num: usize,
    visual: Visualid,
) -> Result<Pictformat, Error> {
    let formats = conn.render_query_pict_formats()?.reply()?;

    let format = formats
        .screens
        .get(screen_num)
        .into_iter()
        .flat_map(|screen| &screen.depths)
        .flat_map(|depth| &depth.visuals)
        .find(|candidate| candidate.visual == visual)
        .map(|candidate| candidate.format)
        .ok_or(Error::MissingPictFormat)?;

    let info = formats
        .formats
        .iter()
        .find(|info| info.id == format)
        .ok_or(Error::MissingPictFormat)?;
    if info.type_ != PictType::DIRECT || !matches!(info.depth, 24 | 32) {
        return Err(Error::UnsupportedVisual { depth: info.depth });
    }

    Ok(format)
}

/// The reported screen size, the size of the root window or the fallback.
fn initial_size(
    conn: &RustConnection,
    screen: &Screen,
    fallback: (u32, u32),
) -> Result<(u16, u16), Error> {
    if screen.width_in_pixels > 0 && screen.height_in_pixels > 0 {
        return Ok((screen.width_in_pixels, screen.height_in_pixels));
    }

    let root = conn.get_geometry(screen.root)?.reply()?;
    if root.width > 0 && root.height > 0 {
        return Ok((root.width, root.height));
    }

    warn!(
        "The xorg server reports an empty screen, using {}x{}",
        fallback.0, fallback.1
    );
    Ok((clamp_u16(fallback.0), clamp_u16(fallback.1)))
}

fn to_render_transform(matrix: [i32; 9]) -> Transform {
    Transform {
        matrix11: matrix[0],
        matrix12: matrix[1],
        matrix13: matrix[2],
        matrix21: matrix[3],
        matrix22: matrix[4],
        matrix23: matrix[5],
        matrix31: matrix[6],
        matrix32: matrix[7],
        matrix33: matrix[8],
    }
}

fn clamp_i16(value: i32) -> i16 {
    value.clamp(i16::MIN.into(), i16::MAX.into()) as i16
}

fn clamp_u16(value: u32) -> u16 {
    value.min(u16::MAX.into()) as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::transform::{self, FIXED_ONE};

    #[test]
    fn test_clamping() {
        assert_eq!(clamp_i16(-40_000), i16::MIN);
        assert_eq!(clamp_i16(1920), 1920);
        assert_eq!(clamp_u16(70_000), u16::MAX);
        assert_eq!(clamp_u16(2560), 2560);
    }

    #[test]
    fn test_render_transform_layout() {
        let clip = transform::compute(1920, 1080, 3840, 2160).unwrap();
        let matrix = to_render_transform(clip.matrix());

        // the picture transform maps destination pixels back onto image pixels
        assert_eq!(matrix.matrix11, 2 * FIXED_ONE);
        assert_eq!(matrix.matrix22, 2 * FIXED_ONE);
        assert_eq!(matrix.matrix33, FIXED_ONE);
        assert_eq!(matrix.matrix12, 0);

        let identity = to_render_transform(IDENTITY_MATRIX);
        assert_eq!(identity.matrix11, FIXED_ONE);
        assert_eq!(identity.matrix13, 0);
    }
}
