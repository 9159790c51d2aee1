//! Thumbnail decoding collaborator.
//!
//! The loader never decodes images itself. It hands each path and a bounding
//! box to a [`ThumbnailDecoder`]; [`ImageThumbnailer`] is the stock
//! implementation backed by the `image` crate.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::error::{FinderError, Result};

/// Box a thumbnail must fit in, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn square(size: u32) -> Self {
        Self {
            width: size,
            height: size,
        }
    }
}

/// Decoded thumbnail pixels (RGBA8, row-major). Cheap to clone.
#[derive(Clone, PartialEq, Eq)]
pub struct Thumbnail {
    pub width: u32,
    pub height: u32,
    pub pixels: Arc<[u8]>,
}

impl fmt::Debug for Thumbnail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thumbnail")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// Turns a file into a thumbnail that fits `bounds`, preserving aspect ratio.
///
/// Called concurrently from worker threads.
pub trait ThumbnailDecoder: Send + Sync {
    fn decode(&self, path: &Path, bounds: BoundingBox) -> Result<Thumbnail>;
}

/// Decoder backed by the `image` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageThumbnailer;

impl ThumbnailDecoder for ImageThumbnailer {
    fn decode(&self, path: &Path, bounds: BoundingBox) -> Result<Thumbnail> {
        let image = image::open(path).map_err(|error| FinderError::Decode {
            path: path.to_path_buf(),
            reason: error.to_string(),
        })?;
        let rgba = image.thumbnail(bounds.width, bounds.height).to_rgba8();
        Ok(Thumbnail {
            width: rgba.width(),
            height: rgba.height(),
            pixels: Arc::from(rgba.into_raw()),
        })
    }
}
