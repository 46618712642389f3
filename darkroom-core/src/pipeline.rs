//! Pipeline construction and execution.
//!
//! The builder turns an operation list into one of two executor shapes:
//!
//! - **fused**: every active operation contributes its fusion fragment
//!   to a single kernel graph that reads the source once and writes the
//!   destination once. Device compilation is lazy and happens exactly
//!   once per executor lifetime.
//! - **fallback**: a generic sequential pass over a CPU copy, used when
//!   some enabled operation lacks a fusion form.
//!
//! Executors are immutable once built; changing the list means building
//! a new executor. Callers must not rely on which shape they receive.

use std::sync::Arc;

use once_cell::sync::OnceCell;

use drt::OperationDescriptor;

use crate::error::PipelineError;
use crate::ops::{self, Rgba};
use crate::registry::OperationRegistry;

/// An executor built for one specific operation list.
pub enum PipelineExecutor {
    /// Single compiled kernel over the whole list.
    Fused(FusedExecutor),
    /// Sequential application on a CPU copy.
    Fallback(FallbackExecutor),
}

impl PipelineExecutor {
    /// Applies the configured operations to `image`, in place.
    pub fn execute(&self, image: &mut hal::WorkingImage) -> Result<(), PipelineError> {
        match self {
            Self::Fused(executor) => executor.execute(image),
            Self::Fallback(executor) => executor.execute(image),
        }
    }
}

/// Builds an executor for `operations`, or `None` for an empty list.
///
/// Disabled and no-op descriptors do not participate. The fused shape is
/// chosen when every remaining operation has a fusion fragment; the
/// fallback shape otherwise.
pub fn build_pipeline(
    operations: &[OperationDescriptor],
    registry: Arc<OperationRegistry>,
    target: &hal::Target,
) -> Result<Option<PipelineExecutor>, PipelineError> {
    if operations.is_empty() {
        log::debug!("empty operation list, no executor");
        return Ok(None);
    }

    let active: Vec<OperationDescriptor> = operations
        .iter()
        .filter(|descriptor| {
            if !descriptor.enabled {
                log::trace!("skipping disabled operation {}", descriptor.name);
                return false;
            }
            if ops::is_noop(descriptor) {
                log::trace!("skipping no-op operation {}", descriptor.name);
                return false;
            }
            true
        })
        .cloned()
        .collect();

    let fusable = active
        .iter()
        .all(|descriptor| registry.fusion(descriptor.kind).is_some());

    let executor = if fusable {
        log::debug!("building fused executor over {} operations", active.len());
        PipelineExecutor::Fused(FusedExecutor::new(active, registry, target.clone())?)
    } else {
        log::debug!(
            "building fallback executor over {} operations",
            operations.len()
        );
        // The sequential pass re-checks enabled/no-op itself, so it keeps
        // the full list.
        PipelineExecutor::Fallback(FallbackExecutor::new(operations.to_vec(), registry))
    };
    Ok(Some(executor))
}

/// Executes all operations as one compiled kernel.
pub struct FusedExecutor {
    operations: Vec<OperationDescriptor>,
    kernel: prism::Kernel,
    target: hal::Target,
    compiled: OnceCell<hal::CompiledKernel>,
}

impl FusedExecutor {
    fn new(
        operations: Vec<OperationDescriptor>,
        registry: Arc<OperationRegistry>,
        target: hal::Target,
    ) -> Result<Self, PipelineError> {
        let mut kernel = prism::Kernel::new(4);
        let mut roots: Rgba = std::array::from_fn(|c| kernel.output(c as u8));

        for descriptor in &operations {
            let fuse = registry
                .fusion(descriptor.kind)
                .ok_or(PipelineError::MissingFusionFragment(descriptor.kind))?;
            roots = fuse(&mut kernel, roots, descriptor);
        }
        for (c, &root) in roots.iter().enumerate() {
            kernel.set_output(c as u8, root);
        }

        log::debug!(
            "fused {} operations into {} expressions",
            operations.len(),
            kernel.expressions().len()
        );
        log::trace!("fused kernel:\n{kernel}");
        Ok(Self {
            operations,
            kernel,
            target,
            compiled: OnceCell::new(),
        })
    }

    /// The operation list this executor was built from.
    #[must_use]
    pub fn operations(&self) -> &[OperationDescriptor] {
        &self.operations
    }

    fn execute(&self, image: &mut hal::WorkingImage) -> Result<(), PipelineError> {
        profiling::scope!("FusedExecutor::execute");

        let expected = self.target.memory_location();
        let actual = image.memory_location();
        if expected != actual {
            return Err(PipelineError::BackendMismatch { expected, actual });
        }

        let compiled = self
            .compiled
            .get_or_try_init(|| hal::CompiledKernel::compile(&self.kernel, &self.target))?;
        image.run_kernel(compiled)?;
        Ok(())
    }
}

/// Applies operations one after another on a CPU copy.
pub struct FallbackExecutor {
    operations: Vec<OperationDescriptor>,
    registry: Arc<OperationRegistry>,
}

impl FallbackExecutor {
    fn new(operations: Vec<OperationDescriptor>, registry: Arc<OperationRegistry>) -> Self {
        Self {
            operations,
            registry,
        }
    }

    fn execute(&self, image: &mut hal::WorkingImage) -> Result<(), PipelineError> {
        profiling::scope!("FallbackExecutor::execute");

        let mut buffer = image.export_cpu_copy()?;

        for descriptor in &self.operations {
            if !descriptor.enabled {
                continue;
            }
            match self.registry.fallback(descriptor.kind) {
                Some(apply) => apply(&mut buffer, descriptor)?,
                None => {
                    // Soft failure: the pass continues with the
                    // remaining operations.
                    log::warn!(
                        "{}, skipping",
                        PipelineError::MissingFallbackFragment(descriptor.kind)
                    );
                }
            }
        }

        image.update_from_owned(buffer)?;
        Ok(())
    }
}
