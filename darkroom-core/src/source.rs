//! Contract with the external source provider.
//!
//! Decoding and writeback are collaborators outside the core: the core
//! only requires that `load` delivers an RGBA/F32 raster with four
//! channels and that implementations are internally thread-safe, since
//! the state-manager worker calls `load` from its own thread while
//! `store` may run on a caller thread.

use std::path::Path;

use thiserror::Error;

use drt::PixelBuffer;

/// Failures a source provider can report.
#[derive(Clone, Debug, Error)]
pub enum SourceError {
    /// File-level failure: not found, unreadable, unwritable.
    #[error("i/o failure: {0}")]
    Io(String),
    /// The bytes were readable but not decodable as an image.
    #[error("decoding failed: {0}")]
    Decoding(String),
}

/// Loads, stores and describes source images.
pub trait SourceProvider: Send + Sync {
    /// Decodes the file at `path` into an RGBA/F32 raster.
    ///
    /// The provider normalizes to four channels and float samples; the
    /// core relies on this and does not re-validate the layout.
    fn load(&self, path: &Path) -> Result<PixelBuffer, SourceError>;

    /// Writes a processed raster back to the provider's storage.
    fn store(&self, raster: &PixelBuffer) -> Result<(), SourceError>;

    /// Metadata value for `key`, if the source carries one.
    fn metadata(&self, key: &str) -> Option<String> {
        let _ = key;
        None
    }
}
