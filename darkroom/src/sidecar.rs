//! Edit-list sidecar persistence.
//!
//! Edit lists serialize to RON, one file per source image. The format
//! round-trips exactly: `load(save(list)) == list` for every list whose
//! parameter values are within the documented ranges.

use std::path::{Path, PathBuf};

use thiserror::Error;

use drt::OperationDescriptor;

/// Failures of sidecar reading and writing.
#[derive(Clone, Debug, Error)]
pub enum SidecarError {
    /// The file could not be read or written.
    #[error("sidecar i/o failure: {0}")]
    Io(String),
    /// The contents were not a valid edit list.
    #[error("sidecar format error: {0}")]
    Format(String),
}

/// Serializes an edit list to a RON string.
pub fn to_string(operations: &[OperationDescriptor]) -> Result<String, SidecarError> {
    ron::ser::to_string_pretty(operations, ron::ser::PrettyConfig::default())
        .map_err(|error| SidecarError::Format(error.to_string()))
}

/// Parses an edit list from a RON string.
pub fn from_str(contents: &str) -> Result<Vec<OperationDescriptor>, SidecarError> {
    ron::from_str(contents).map_err(|error| SidecarError::Format(error.to_string()))
}

/// Writes the edit list to `path`, replacing any previous sidecar.
pub fn save_edit_list(
    path: &Path,
    operations: &[OperationDescriptor],
) -> Result<(), SidecarError> {
    let contents = to_string(operations)?;
    std::fs::write(path, contents).map_err(|error| SidecarError::Io(error.to_string()))?;
    log::debug!(
        "saved {} operations to {}",
        operations.len(),
        path.display()
    );
    Ok(())
}

/// Reads an edit list from `path`.
pub fn load_edit_list(path: &Path) -> Result<Vec<OperationDescriptor>, SidecarError> {
    let contents =
        std::fs::read_to_string(path).map_err(|error| SidecarError::Io(error.to_string()))?;
    from_str(&contents)
}

/// Maps a source image path to the place its sidecar lives, and back.
///
/// Strategies only compute paths; reading and writing stay with
/// [`save_edit_list`] and [`load_edit_list`].
pub trait PathStrategy: Send + Sync {
    /// The sidecar path for a source image.
    fn sidecar_for(&self, image: &Path) -> PathBuf;

    /// The source image path a sidecar belongs to, when derivable.
    fn image_for(&self, sidecar: &Path) -> Option<PathBuf>;
}

/// Stores sidecars next to their images: `holiday.png` maps to
/// `holiday.png.ron` in the same directory.
pub struct NextToSource;

impl PathStrategy for NextToSource {
    fn sidecar_for(&self, image: &Path) -> PathBuf {
        let mut name = image.as_os_str().to_os_string();
        name.push(".ron");
        PathBuf::from(name)
    }

    fn image_for(&self, sidecar: &Path) -> Option<PathBuf> {
        let name = sidecar.to_str()?;
        name.strip_suffix(".ron").map(PathBuf::from)
    }
}

/// Stores sidecars in one central directory, mirroring the image's
/// path structure beneath it, so read-only image trees stay untouched.
pub struct CentralStore {
    base_dir: PathBuf,
}

impl CentralStore {
    /// A store rooted at `base_dir` (e.g. an application data folder).
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }
}

impl PathStrategy for CentralStore {
    fn sidecar_for(&self, image: &Path) -> PathBuf {
        let mut name = std::ffi::OsString::new();
        for component in image.components() {
            use std::path::Component;
            match component {
                Component::Normal(part) => {
                    if !name.is_empty() {
                        name.push("_");
                    }
                    name.push(part);
                }
                Component::RootDir | Component::Prefix(_) | Component::CurDir => {}
                Component::ParentDir => name.push("_up"),
            }
        }
        name.push(".ron");
        self.base_dir.join(name)
    }

    fn image_for(&self, _sidecar: &Path) -> Option<PathBuf> {
        // The flattened name is not reversible; the original path is
        // recorded inside the sidecar's descriptors by callers that
        // need the inverse mapping.
        None
    }
}
