//! Contracts with the rendering layer.
//!
//! The tile engine never talks to a GPU API. It allocates, fills and releases
//! tile resources through these traits, which the renderer implements for its
//! texture type. [`CpuTile`] is the headless implementation used by the
//! `tilewalk` driver and by tests.

use foundation::TileCoord;
use image::RgbaImage;
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("tile upload failed: {0}")]
pub struct UploadError(pub String);

/// A GPU-side tile resource owned by exactly one cache entry.
pub trait TileResource {
    /// Bind for sampling on texture `unit`.
    fn bind(&self, unit: u32);
    /// Release the underlying GPU memory. Called exactly once.
    fn dispose(&mut self);
}

/// Allocates placeholders and fills them once the payload has been decoded.
pub trait TileUploader<R> {
    /// Placeholder for a tile whose payload is still in flight.
    fn allocate(&mut self, coord: TileCoord) -> R;

    /// Copy a decoded RGBA8 payload into the placeholder.
    fn upload(&mut self, resource: &mut R, image: &RgbaImage) -> Result<(), UploadError>;

    /// Side effect after a successful upload (mipmap generation and the like).
    fn on_load(&mut self, _resource: &mut R) {}
}

/// CPU-readable texels, needed for elevation decoding.
pub trait TexelSource {
    fn dimensions(&self) -> (u32, u32);
    fn texel(&self, x: u32, y: u32) -> [u8; 4];
}

/// Headless tile: keeps the decoded image in memory.
#[derive(Debug, Clone)]
pub struct CpuTile {
    coord: TileCoord,
    image: Option<RgbaImage>,
    mipmapped: bool,
    disposed: bool,
}

impl CpuTile {
    pub fn coord(&self) -> TileCoord {
        self.coord
    }

    pub fn image(&self) -> Option<&RgbaImage> {
        self.image.as_ref()
    }

    pub fn is_mipmapped(&self) -> bool {
        self.mipmapped
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

impl TileResource for CpuTile {
    fn bind(&self, unit: u32) {
        trace!(tile = %self.coord, unit, "bind");
    }

    fn dispose(&mut self) {
        debug_assert!(!self.disposed, "tile {} disposed twice", self.coord);
        self.image = None;
        self.disposed = true;
    }
}

impl TexelSource for CpuTile {
    fn dimensions(&self) -> (u32, u32) {
        self.image.as_ref().map_or((0, 0), |img| img.dimensions())
    }

    fn texel(&self, x: u32, y: u32) -> [u8; 4] {
        self.image
            .as_ref()
            .map_or([0; 4], |img| img.get_pixel(x, y).0)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CpuUploader;

impl TileUploader<CpuTile> for CpuUploader {
    fn allocate(&mut self, coord: TileCoord) -> CpuTile {
        CpuTile {
            coord,
            image: None,
            mipmapped: false,
            disposed: false,
        }
    }

    fn upload(&mut self, resource: &mut CpuTile, image: &RgbaImage) -> Result<(), UploadError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(UploadError(format!("empty image for tile {}", resource.coord)));
        }
        resource.image = Some(image.clone());
        Ok(())
    }

    fn on_load(&mut self, resource: &mut CpuTile) {
        resource.mipmapped = true;
    }
}
