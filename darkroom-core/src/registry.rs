//! Operation and working-image registration.
//!
//! Both registries are populated once at startup from a single thread
//! and read-only afterwards; lookups take no lock. An operation counts
//! as defined when it appears in at least one of the two tables.

use std::sync::Arc;

use once_cell::sync::Lazy;

use drt::{MemoryLocation, OperationKind};

use crate::ops::{self, FallbackFn, FusionFn};
use crate::FastHashMap;

/// The parallel fusion/fallback fragment tables.
pub struct OperationRegistry {
    fusion: FastHashMap<OperationKind, FusionFn>,
    fallback: FastHashMap<OperationKind, FallbackFn>,
}

impl OperationRegistry {
    /// An empty registry. Useful for tests that exercise the missing-
    /// fragment paths.
    #[must_use]
    pub fn new() -> Self {
        Self {
            fusion: FastHashMap::default(),
            fallback: FastHashMap::default(),
        }
    }

    /// A registry holding every built-in tonal operation, both facets.
    #[must_use]
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();

        registry.register(ops::exposure::KIND, ops::exposure::fuse, ops::exposure::apply);
        registry.register(
            ops::brightness::KIND,
            ops::brightness::fuse,
            ops::brightness::apply,
        );
        registry.register(ops::contrast::KIND, ops::contrast::fuse, ops::contrast::apply);
        registry.register(
            ops::highlights::KIND,
            ops::highlights::fuse,
            ops::highlights::apply,
        );
        registry.register(ops::shadows::KIND, ops::shadows::fuse, ops::shadows::apply);
        registry.register(ops::whites::KIND, ops::whites::fuse, ops::whites::apply);
        registry.register(ops::blacks::KIND, ops::blacks::fuse, ops::blacks::apply);
        registry.register(
            ops::saturation::KIND,
            ops::saturation::fuse,
            ops::saturation::apply,
        );

        log::debug!("operation registry ready: {} kinds", registry.fusion.len());
        registry
    }

    /// Registers both facets of one operation.
    pub fn register(&mut self, kind: OperationKind, fusion: FusionFn, fallback: FallbackFn) {
        self.register_fusion(kind, fusion);
        self.register_fallback(kind, fallback);
    }

    /// Registers (or replaces) the fusion facet of `kind`.
    pub fn register_fusion(&mut self, kind: OperationKind, fragment: FusionFn) {
        self.fusion.insert(kind, fragment);
    }

    /// Registers (or replaces) the fallback facet of `kind`.
    pub fn register_fallback(&mut self, kind: OperationKind, fragment: FallbackFn) {
        self.fallback.insert(kind, fragment);
    }

    /// Fusion facet of `kind`, if registered.
    #[must_use]
    pub fn fusion(&self, kind: OperationKind) -> Option<FusionFn> {
        self.fusion.get(&kind).copied()
    }

    /// Fallback facet of `kind`, if registered.
    #[must_use]
    pub fn fallback(&self, kind: OperationKind) -> Option<FallbackFn> {
        self.fallback.get(&kind).copied()
    }

    /// Whether `kind` appears in at least one table.
    #[must_use]
    pub fn is_defined(&self, kind: OperationKind) -> bool {
        self.fusion.contains_key(&kind) || self.fallback.contains_key(&kind)
    }
}

impl Default for OperationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static BUILTIN: Lazy<Arc<OperationRegistry>> =
    Lazy::new(|| Arc::new(OperationRegistry::with_builtin()));

/// The shared built-in registry.
#[must_use]
pub fn builtin_registry() -> Arc<OperationRegistry> {
    BUILTIN.clone()
}

/// Registers the working-image creators matching `target` with the
/// hardware layer: CPU always, plus the GPU creator bound to the
/// target's device context.
pub fn register_working_images(target: &hal::Target) {
    hal::register_working_image(
        MemoryLocation::CpuRam,
        Box::new(|buffer| hal::CpuImage::new(buffer).map(hal::WorkingImage::Cpu)),
    );

    match target {
        hal::Target::Cpu => {}
        #[cfg(feature = "gpu")]
        hal::Target::Gpu(context) => {
            let context = context.clone();
            hal::register_working_image(
                MemoryLocation::GpuMemory,
                Box::new(move |buffer| {
                    hal::GpuImage::new(context.clone(), buffer).map(hal::WorkingImage::Gpu)
                }),
            );
        }
    }
}
