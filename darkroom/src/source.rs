//! File-backed source provider.
//!
//! Decodes through the `image` crate (PNG in this build), normalizes to
//! RGBA/F32 on load, and clamps back to 8-bit on store. The provider
//! remembers the last loaded path so `store` writes back to the same
//! file, and it is internally synchronized as the core requires.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use drc::{SourceError, SourceProvider};
use drt::{ChannelLayout, PixelBuffer};

struct Loaded {
    path: PathBuf,
    width: u32,
    height: u32,
}

/// [`SourceProvider`] over image files on disk.
pub struct FileSource {
    loaded: Mutex<Option<Loaded>>,
}

impl FileSource {
    /// A provider with nothing loaded yet.
    #[must_use]
    pub fn new() -> Self {
        Self {
            loaded: Mutex::new(None),
        }
    }
}

impl Default for FileSource {
    fn default() -> Self {
        Self::new()
    }
}

fn load_error(error: &image::ImageError) -> SourceError {
    match error {
        image::ImageError::IoError(io) => SourceError::Io(io.to_string()),
        other => SourceError::Decoding(other.to_string()),
    }
}

impl SourceProvider for FileSource {
    fn load(&self, path: &Path) -> Result<PixelBuffer, SourceError> {
        profiling::scope!("FileSource::load");

        let decoded = image::open(path).map_err(|error| load_error(&error))?;
        let rgba = decoded.to_rgba32f();
        let (width, height) = rgba.dimensions();
        log::debug!("loaded {} ({width}x{height})", path.display());

        *self.loaded.lock() = Some(Loaded {
            path: path.to_path_buf(),
            width,
            height,
        });
        Ok(PixelBuffer::from_vec(
            width,
            height,
            ChannelLayout::RgbaF32,
            rgba.into_raw(),
        ))
    }

    fn store(&self, raster: &PixelBuffer) -> Result<(), SourceError> {
        profiling::scope!("FileSource::store");

        let loaded = self.loaded.lock();
        let target = loaded
            .as_ref()
            .ok_or_else(|| SourceError::Io("no file loaded to write back to".to_string()))?;

        let bytes =
            drc::conv::to_rgba_u8(raster).map_err(|error| SourceError::Decoding(error.to_string()))?;
        let encoded =
            image::RgbaImage::from_raw(raster.width, raster.height, bytes).ok_or_else(|| {
                SourceError::Decoding("raster extent does not match its samples".to_string())
            })?;
        encoded
            .save(&target.path)
            .map_err(|error| SourceError::Io(error.to_string()))?;
        log::info!("wrote {} back", target.path.display());
        Ok(())
    }

    fn metadata(&self, key: &str) -> Option<String> {
        let loaded = self.loaded.lock();
        let loaded = loaded.as_ref()?;
        match key {
            "path" => Some(loaded.path.display().to_string()),
            "width" => Some(loaded.width.to_string()),
            "height" => Some(loaded.height.to_string()),
            _ => None,
        }
    }
}
