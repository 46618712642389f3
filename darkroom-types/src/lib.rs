/*! This library describes the data shared between the layers of the
 *  darkroom image-adjustment core: pixel buffers, operation descriptors
 *  and the closed set of tonal operations with their value ranges.
 *
 *  The crate is deliberately plain, with no I/O, devices or locking,
 *  so that every other crate in the workspace can depend on it without
 *  dragging in a backend.
 */

#![allow(
    // We don't use syntax sugar where it's not necessary.
    clippy::match_like_matches_macro,
)]
#![warn(missing_docs, trivial_casts, unused_qualifications)]

use std::collections::HashMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Storage format of a pixel as produced by a source provider.
///
/// The processing pipeline always works on `f32` samples; the layout tag
/// records what the source delivered so exporters can round-trip it.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ChannelLayout {
    /// Four `f32` channels (red, green, blue, alpha). The native layout
    /// of the pipeline.
    #[default]
    RgbaF32,
    /// Three `f32` channels, no alpha.
    RgbF32,
    /// Four 8-bit channels, normalized to `[0, 1]` on ingestion.
    RgbaU8,
    /// Three 8-bit channels, normalized to `[0, 1]` on ingestion.
    RgbU8,
}

impl ChannelLayout {
    /// Number of channels a pixel of this layout carries.
    #[must_use]
    pub const fn channel_count(self) -> u32 {
        match self {
            Self::RgbaF32 | Self::RgbaU8 => 4,
            Self::RgbF32 | Self::RgbU8 => 3,
        }
    }

    /// Whether the layout carries an alpha channel.
    #[must_use]
    pub const fn has_alpha(self) -> bool {
        matches!(self, Self::RgbaF32 | Self::RgbaU8)
    }

    /// Whether the source samples were floating point.
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::RgbaF32 | Self::RgbF32)
    }
}

/// Where a working image's primary storage lives.
#[repr(C)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MemoryLocation {
    /// Main memory, directly addressable by the CPU.
    CpuRam,
    /// Device-local memory behind a GPU API.
    GpuMemory,
}

impl std::fmt::Display for MemoryLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CpuRam => f.write_str("CPU RAM"),
            Self::GpuMemory => f.write_str("GPU memory"),
        }
    }
}

/// Concrete GPU target family a device context can be opened on.
///
/// The set is closed; the backend decider probes these in the fixed
/// [`GpuFamily::PRIORITY`] order and silently disqualifies any family
/// whose runtime is unavailable.
#[repr(C)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum GpuFamily {
    /// NVIDIA's proprietary compute stack.
    Cuda,
    /// Direct3D 12 compute (Windows).
    Dx12,
    /// Metal (Apple platforms).
    Metal,
    /// Vulkan compute (cross-platform).
    Vulkan,
    /// OpenCL, the legacy cross-vendor fallback.
    OpenCl,
}

impl GpuFamily {
    /// Probe order used by the backend decider: hardware-specific first,
    /// then OS-native, then cross-platform, then legacy.
    pub const PRIORITY: [Self; 5] = [
        Self::Cuda,
        Self::Dx12,
        Self::Metal,
        Self::Vulkan,
        Self::OpenCl,
    ];
}

impl std::fmt::Display for GpuFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cuda => f.write_str("CUDA"),
            Self::Dx12 => f.write_str("DirectX 12"),
            Self::Metal => f.write_str("Metal"),
            Self::Vulkan => f.write_str("Vulkan"),
            Self::OpenCl => f.write_str("OpenCL"),
        }
    }
}

bitflags::bitflags! {
    /// Set of GPU families, used to report which runtimes a build can
    /// reach before any device is opened.
    #[repr(transparent)]
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
    pub struct FamilySet: u32 {
        /// [`GpuFamily::Cuda`] is reachable.
        const CUDA = 1 << 0;
        /// [`GpuFamily::Dx12`] is reachable.
        const DX12 = 1 << 1;
        /// [`GpuFamily::Metal`] is reachable.
        const METAL = 1 << 2;
        /// [`GpuFamily::Vulkan`] is reachable.
        const VULKAN = 1 << 3;
        /// [`GpuFamily::OpenCl`] is reachable.
        const OPENCL = 1 << 4;
    }
}

impl From<GpuFamily> for FamilySet {
    fn from(family: GpuFamily) -> Self {
        match family {
            GpuFamily::Cuda => Self::CUDA,
            GpuFamily::Dx12 => Self::DX12,
            GpuFamily::Metal => Self::METAL,
            GpuFamily::Vulkan => Self::VULKAN,
            GpuFamily::OpenCl => Self::OPENCL,
        }
    }
}

/// A rectangular region of `f32` pixels in row-major layout.
///
/// This is the exchange currency between the source provider, the
/// working-image backends and the fallback execution path. The buffer is
/// only considered usable when [`PixelBuffer::is_valid`] holds: positive
/// extent and `data.len() == width · height · channel_count`.
///
/// For a 3×2 RGBA region the data reads
/// `[R₀ G₀ B₀ A₀ | R₁ G₁ B₁ A₁ | R₂ G₂ B₂ A₂]` for row 0 followed by the
/// same for row 1.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PixelBuffer {
    /// X position of the top-left corner relative to the full source.
    pub x: i32,
    /// Y position of the top-left corner relative to the full source.
    pub y: i32,
    /// Width of the region in pixels.
    pub width: u32,
    /// Height of the region in pixels.
    pub height: u32,
    /// Number of channels per pixel. Must agree with `data.len()`.
    pub channel_count: u32,
    /// Storage format the source delivered.
    pub layout: ChannelLayout,
    /// Row-major samples, `width · height · channel_count` of them.
    pub data: Vec<f32>,
}

impl PixelBuffer {
    /// Creates a zero-filled buffer of the given extent.
    #[must_use]
    pub fn new(width: u32, height: u32, layout: ChannelLayout) -> Self {
        let channel_count = layout.channel_count();
        Self {
            x: 0,
            y: 0,
            width,
            height,
            channel_count,
            layout,
            data: vec![0.0; width as usize * height as usize * channel_count as usize],
        }
    }

    /// Wraps an existing sample vector. The result may be invalid; callers
    /// that received the vector from outside must check [`Self::is_valid`].
    #[must_use]
    pub fn from_vec(width: u32, height: u32, layout: ChannelLayout, data: Vec<f32>) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
            channel_count: layout.channel_count(),
            layout,
            data,
        }
    }

    /// Whether the buffer's geometry and storage agree.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        if self.width == 0 || self.height == 0 || self.channel_count == 0 {
            return false;
        }
        self.data.len() == self.element_count()
    }

    /// `width · height`.
    #[must_use]
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// `width · height · channel_count`.
    #[must_use]
    pub fn element_count(&self) -> usize {
        self.pixel_count() * self.channel_count as usize
    }

    /// Size of the sample storage in bytes.
    #[must_use]
    pub fn size_in_bytes(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }

    /// Flat index of channel `c` of the pixel at `(x, y)`.
    ///
    /// No bounds checking; callers keep `x < width`, `y < height` and
    /// `c < channel_count`.
    #[inline]
    #[must_use]
    pub fn index(&self, x: u32, y: u32, c: u32) -> usize {
        ((y * self.width + x) * self.channel_count + c) as usize
    }

    /// Sample at `(x, y, c)`.
    #[inline]
    #[must_use]
    pub fn get(&self, x: u32, y: u32, c: u32) -> f32 {
        self.data[self.index(x, y, c)]
    }

    /// Writes the sample at `(x, y, c)`.
    #[inline]
    pub fn set(&mut self, x: u32, y: u32, c: u32, value: f32) {
        let index = self.index(x, y, c);
        self.data[index] = value;
    }

    /// The channels of the pixel at `(x, y)` as a slice.
    #[inline]
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> &[f32] {
        let start = self.index(x, y, 0);
        &self.data[start..start + self.channel_count as usize]
    }
}

/// A single parameter value attached to an [`OperationDescriptor`].
///
/// The map is stringly keyed so descriptors survive serialization and
/// future operations can add parameters without changing the data model;
/// readers go through the typed accessors, which fall back to a default
/// on missing keys and type mismatches instead of failing.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ParamValue {
    /// A 32-bit float, the type of every tonal `value` parameter.
    Float(f32),
    /// A signed integer.
    Int(i32),
    /// A flag.
    Bool(bool),
    /// Free-form text.
    Text(String),
}

impl From<f32> for ParamValue {
    fn from(value: f32) -> Self {
        Self::Float(value)
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// Identifies the kind of an image-adjustment operation.
///
/// This enum is the registry of every adjustment the core knows about;
/// the pipeline consults the fragment tables keyed by it to instantiate
/// the matching logic.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum OperationKind {
    /// Exposure adjustment, in EV stops: multiplies by `2^value`.
    Exposure,
    /// Additive brightness. Washes out blacks when overused.
    Brightness,
    /// Multiplicative contrast around the 0.5 midpoint.
    Contrast,
    /// Lifts or lowers the brightest tones, weighted by luma.
    Highlights,
    /// Lifts or lowers the darkest tones, weighted by luma.
    Shadows,
    /// Shifts the white point: only near-white pixels respond.
    Whites,
    /// Shifts the black point: only near-black pixels respond.
    Blacks,
    /// Color intensity without changing luminance.
    Saturation,
}

impl OperationKind {
    /// Every kind, in display order.
    pub const ALL: [Self; 8] = [
        Self::Exposure,
        Self::Brightness,
        Self::Contrast,
        Self::Highlights,
        Self::Shadows,
        Self::Whites,
        Self::Blacks,
        Self::Saturation,
    ];

    /// Human-readable name, also used as the default descriptor name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Exposure => "Exposure",
            Self::Brightness => "Brightness",
            Self::Contrast => "Contrast",
            Self::Highlights => "Highlights",
            Self::Shadows => "Shadows",
            Self::Whites => "Whites",
            Self::Blacks => "Blacks",
            Self::Saturation => "Saturation",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Key of the primary parameter every tonal operation reads.
pub const PARAM_VALUE: &str = "value";

/// A universal container for one operation's settings.
///
/// Everything the pipeline needs to execute a specific adjustment:
/// the kind, a display name, the enabled flag and a generic parameter
/// map. Descriptors are value types; the editable list in the state
/// manager owns plain clones of them.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct OperationDescriptor {
    /// Which adjustment this descriptor configures.
    pub kind: OperationKind,
    /// Display name, e.g. for an edit-history UI ("Brightness (+0.5)").
    pub name: String,
    /// Disabled descriptors stay in the list but are skipped by every
    /// executor.
    pub enabled: bool,
    /// Generic parameter storage keyed by parameter name.
    pub params: HashMap<String, ParamValue>,
}

impl OperationDescriptor {
    /// A descriptor of the given kind with no parameters set. Readers
    /// will observe every parameter at its default.
    #[must_use]
    pub fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            name: kind.name().to_string(),
            enabled: true,
            params: HashMap::new(),
        }
    }

    /// A descriptor with its primary `value` parameter set.
    #[must_use]
    pub fn with_value(kind: OperationKind, value: f32) -> Self {
        let mut descriptor = Self::new(kind);
        descriptor.set(PARAM_VALUE, value);
        descriptor
    }

    /// Stores a parameter, replacing any previous value under the key.
    pub fn set(&mut self, key: &str, value: impl Into<ParamValue>) {
        self.params.insert(key.to_string(), value.into());
    }

    /// Reads a float parameter, falling back to `default` when the key is
    /// missing or holds a different type.
    #[must_use]
    pub fn float(&self, key: &str, default: f32) -> f32 {
        match self.params.get(key) {
            Some(ParamValue::Float(v)) => *v,
            _ => default,
        }
    }

    /// Reads an integer parameter with a typed fallback.
    #[must_use]
    pub fn int(&self, key: &str, default: i32) -> i32 {
        match self.params.get(key) {
            Some(ParamValue::Int(v)) => *v,
            _ => default,
        }
    }

    /// Reads a flag parameter with a typed fallback.
    #[must_use]
    pub fn flag(&self, key: &str, default: bool) -> bool {
        match self.params.get(key) {
            Some(ParamValue::Bool(v)) => *v,
            _ => default,
        }
    }

    /// Reads a text parameter with a typed fallback.
    #[must_use]
    pub fn text<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        match self.params.get(key) {
            Some(ParamValue::Text(v)) => v.as_str(),
            _ => default,
        }
    }

    /// The primary `value` parameter, defaulting to the kind's declared
    /// default when unset.
    #[must_use]
    pub fn value(&self) -> f32 {
        self.float(PARAM_VALUE, OperationRange::of(self.kind).default)
    }
}

/// Valid input range and default value of one operation kind.
///
/// A descriptor whose `value` equals `default` is a no-op and is skipped
/// by the pipeline builder without observable effect.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct OperationRange {
    /// Smallest accepted value; smaller inputs are clamped up.
    pub min: f32,
    /// Largest accepted value; larger inputs are clamped down.
    pub max: f32,
    /// The identity value of the operation.
    pub default: f32,
}

impl OperationRange {
    /// The centralized range table. Contrast stores a `[0, 2]`-ranged
    /// value whose applied multiplier is `1 + value`.
    #[must_use]
    pub const fn of(kind: OperationKind) -> Self {
        match kind {
            OperationKind::Exposure => Self {
                min: -4.0,
                max: 4.0,
                default: 0.0,
            },
            OperationKind::Contrast => Self {
                min: 0.0,
                max: 2.0,
                default: 1.0,
            },
            OperationKind::Brightness
            | OperationKind::Highlights
            | OperationKind::Shadows
            | OperationKind::Whites
            | OperationKind::Blacks
            | OperationKind::Saturation => Self {
                min: -1.0,
                max: 1.0,
                default: 0.0,
            },
        }
    }

    /// Clamps `value` into the range.
    #[must_use]
    pub fn clamp(&self, value: f32) -> f32 {
        value.clamp(self.min, self.max)
    }

    /// Whether `value` is the operation's identity.
    #[must_use]
    pub fn is_default(&self, value: f32) -> bool {
        value == self.default
    }

    /// Whether `value` lies inside the accepted range.
    #[must_use]
    pub fn contains(&self, value: f32) -> bool {
        value >= self.min && value <= self.max
    }
}
