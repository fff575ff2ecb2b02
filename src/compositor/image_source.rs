//! The currently bound background image and how a new one gets there.
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use derive_where::derive_where;
use image::{DynamicImage, ImageError};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::backend::{self, DrawBackend};

const FILE_URI_PREFIX: &str = "file://";

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Couldn't open background image '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Couldn't decode background image '{}': {source}", .path.display())]
    Decode { path: PathBuf, source: ImageError },

    #[error("Background image '{}' has no pixels", .0.display())]
    Empty(PathBuf),

    #[error("Couldn't bind the background image: {0}")]
    Backend(#[from] backend::Error),

    #[error("The image loader task died: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// A decoded image which is bound to the compositing backend.
#[derive_where(Debug)]
pub struct ImageSource<P> {
    pub pixel_width: u32,
    pub pixel_height: u32,
    pub path: PathBuf,
    #[derive_where(skip)]
    pub picture: P,
}

/// Holds the image every draw pass samples from.
///
/// Replacing the image never mutates the old one: passes which already picked it up keep
/// their handle until they are done.
#[derive_where(Debug, Default)]
pub struct ImageSlot<P> {
    current: Mutex<Option<Arc<ImageSource<P>>>>,
}

impl<P> ImageSlot<P> {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(None),
        }
    }

    pub fn current(&self) -> Option<Arc<ImageSource<P>>> {
        self.current.lock().clone()
    }

    /// Returns the previous image.
    pub fn replace(&self, source: ImageSource<P>) -> Option<Arc<ImageSource<P>>> {
        self.current.lock().replace(Arc::new(source))
    }
}

/// Turns the configured background (a `file://` uri or a plain path) into a path which exists.
/// Everything else resolves to `default`.
pub fn resolve_path(uri: &str, default: &Path) -> PathBuf {
    let uri = uri.trim_start_matches(' ');
    debug!("Background uri: {}", uri);

    let path = match uri.strip_prefix(FILE_URI_PREFIX) {
        Some(path) => Path::new(path),
        None if uri.starts_with('/') => Path::new(uri),
        None => {
            warn!(
                "Background '{}' isn't a local file, using default: {}",
                uri,
                default.display()
            );
            return default.to_path_buf();
        }
    };

    if !path.exists() {
        warn!(
            "Background file '{}' doesn't exist, using default: {}",
            path.display(),
            default.display()
        );
        return default.to_path_buf();
    }

    path.to_path_buf()
}

pub fn decode(path: &Path) -> Result<DynamicImage, Error> {
    let image = image::open(path).map_err(|err| match err {
        ImageError::IoError(source) => Error::Io {
            path: path.to_path_buf(),
            source,
        },
        source => Error::Decode {
            path: path.to_path_buf(),
            source,
        },
    })?;

    if image.width() == 0 || image.height() == 0 {
        return Err(Error::Empty(path.to_path_buf()));
    }

    Ok(image)
}

/// Decodes `path` (or `default` if that fails) and binds it to the backend.
pub fn load<B: DrawBackend + ?Sized>(
    backend: &B,
    path: &Path,
    default: &Path,
) -> Result<ImageSource<B::Picture>, Error> {
    let (path, image) = match decode(path) {
        Ok(image) => (path, image),
        Err(err) if path != default => {
            warn!("{}, using default: {}", err, default.display());
            (default, decode(default)?)
        }
        Err(err) => return Err(err),
    };
    debug!(
        "Decoded '{}': {}x{}",
        path.display(),
        image.width(),
        image.height()
    );

    let picture = backend.bind(&image)?;

    Ok(ImageSource {
        pixel_width: image.width(),
        pixel_height: image.height(),
        path: path.to_path_buf(),
        picture,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use image::RgbImage;

    use super::*;
    use crate::{compositor::transform::ClipTransform, topology::Geometry};

    #[derive(Default)]
    struct BindCounter {
        bound: AtomicUsize,
    }

    impl DrawBackend for BindCounter {
        type Picture = (u32, u32);

        fn bind(&self, image: &DynamicImage) -> Result<Self::Picture, backend::Error> {
            self.bound.fetch_add(1, Ordering::SeqCst);
            Ok((image.width(), image.height()))
        }

        fn draw(
            &self,
            _: &Self::Picture,
            _: &ClipTransform,
            _: Geometry,
        ) -> Result<(), backend::Error> {
            Ok(())
        }

        fn resize_surface(&self, _: u32, _: u32) -> Result<(), backend::Error> {
            Ok(())
        }
    }

    fn write_image(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
        let path = dir.join(name);
        RgbImage::new(width, height).save(&path).unwrap();
        path
    }

    #[test]
    fn test_resolve_path() {
        let dir = tempfile::tempdir().unwrap();
        let image = write_image(dir.path(), "wall.png", 4, 2);
        let default = Path::new("/usr/share/backgrounds/default_background.jpg");

        let uri = format!("  file://{}", image.display());
        assert_eq!(resolve_path(&uri, default), image);
        assert_eq!(resolve_path(&image.to_string_lossy(), default), image);
        assert_eq!(resolve_path("https://example.org/wall.png", default), default);
        assert_eq!(resolve_path("file:///does/not/exist.png", default), default);
    }

    #[test]
    fn test_load_binds_image() {
        let dir = tempfile::tempdir().unwrap();
        let image = write_image(dir.path(), "wall.png", 64, 32);
        let backend = BindCounter::default();

        let source = load(&backend, &image, &image).unwrap();

        assert_eq!((source.pixel_width, source.pixel_height), (64, 32));
        assert_eq!(source.picture, (64, 32));
        assert_eq!(backend.bound.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_load_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let default = write_image(dir.path(), "default.png", 8, 8);
        let broken = dir.path().join("broken.png");
        std::fs::write(&broken, b"definitely not a png").unwrap();

        let source = load(&BindCounter::default(), &broken, &default).unwrap();
        assert_eq!(source.path, default);
    }

    #[test]
    fn test_load_fails_without_usable_image() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.png");

        let result = load(&BindCounter::default(), &missing, &missing);
        assert!(matches!(result, Err(Error::Io { .. })));
    }

    #[test]
    fn test_slot_hands_out_previous_image() {
        let slot = ImageSlot::new();
        assert!(slot.current().is_none());

        let first = ImageSource {
            pixel_width: 1,
            pixel_height: 1,
            path: PathBuf::from("/a.png"),
            picture: 1u8,
        };
        assert!(slot.replace(first).is_none());

        let in_flight = slot.current().unwrap();
        let second = ImageSource {
            pixel_width: 2,
            pixel_height: 2,
            path: PathBuf::from("/b.png"),
            picture: 2u8,
        };
        let previous = slot.replace(second).unwrap();

        assert!(Arc::ptr_eq(&previous, &in_flight));
        assert_eq!(slot.current().unwrap().picture, 2);
    }
}
