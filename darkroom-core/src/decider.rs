//! Startup backend selection by micro-benchmark.
//!
//! A static capability table would misjudge real machines: kernel-launch
//! and transfer overhead frequently make the CPU faster on laptops and
//! virtualized environments even when a GPU is present. So the decider
//! runs one trivial kernel over a reference raster on every reachable
//! backend and compares wall time, demanding a 10% GPU advantage to
//! cover the per-frame host↔device transfers the micro-benchmark
//! under-counts.

use std::time::{Duration, Instant};

use drt::{ChannelLayout, FamilySet, MemoryLocation, PixelBuffer};
#[cfg(feature = "gpu")]
use drt::GpuFamily;

use crate::error::InitError;

/// Extent of the benchmark raster.
const BENCH_WIDTH: u32 = 1920;
/// Extent of the benchmark raster.
const BENCH_HEIGHT: u32 = 1080;

/// A GPU must beat this fraction of the CPU time to be selected.
const GPU_ADVANTAGE: f64 = 0.9;

/// Outcome of backend selection.
pub(crate) struct Decision {
    pub location: MemoryLocation,
    pub family: Option<drt::GpuFamily>,
    pub supported: FamilySet,
    #[cfg(feature = "gpu")]
    pub gpu: Option<std::sync::Arc<hal::GpuContext>>,
}

impl Decision {
    fn cpu(supported: FamilySet) -> Self {
        Self {
            location: MemoryLocation::CpuRam,
            family: None,
            supported,
            #[cfg(feature = "gpu")]
            gpu: None,
        }
    }
}

/// The trivial benchmark kernel: `out = in · 1.1 + 0.05`, all channels.
fn benchmark_kernel() -> prism::Kernel {
    let mut kernel = prism::Kernel::new(4);
    for c in 0..4 {
        let root = kernel.output(c);
        let scaled = kernel.mul_add_const(root, 1.1, 0.05);
        kernel.set_output(c, scaled);
    }
    kernel
}

/// Deterministic reference raster: `((x + y + c) % 256) / 255`.
pub(crate) fn reference_raster() -> PixelBuffer {
    let mut buffer = PixelBuffer::new(BENCH_WIDTH, BENCH_HEIGHT, ChannelLayout::RgbaF32);
    let mut index = 0;
    for y in 0..BENCH_HEIGHT {
        for x in 0..BENCH_WIDTH {
            for c in 0..4 {
                buffer.data[index] = ((x + y + c) % 256) as f32 / 255.0;
                index += 1;
            }
        }
    }
    buffer
}

fn benchmark_cpu(kernel: &prism::Kernel, reference: &PixelBuffer) -> Result<Duration, String> {
    let mut image = hal::CpuImage::new(reference.clone()).map_err(|e| e.to_string())?;
    let compiled = hal::CpuKernel::compile(kernel).map_err(|e| e.to_string())?;

    let start = Instant::now();
    image.run_kernel(&compiled).map_err(|e| e.to_string())?;
    Ok(start.elapsed())
}

#[cfg(feature = "gpu")]
fn benchmark_gpu(
    context: &std::sync::Arc<hal::GpuContext>,
    kernel: &prism::Kernel,
    reference: &PixelBuffer,
) -> Result<Duration, String> {
    // Upload before the clock starts, matching the CPU measurement; the
    // readback stays inside it so the device actually synchronizes.
    let mut image =
        hal::GpuImage::new(context.clone(), reference.clone()).map_err(|e| e.to_string())?;
    let compiled = context.compile_kernel(kernel).map_err(|e| e.to_string())?;

    let start = Instant::now();
    image.run_kernel(&compiled).map_err(|e| e.to_string())?;
    let _synced = image.export_cpu_copy().map_err(|e| e.to_string())?;
    Ok(start.elapsed())
}

/// Full benchmark pass over CPU and every reachable GPU family.
pub(crate) fn decide() -> Result<Decision, InitError> {
    profiling::scope!("decider::decide");

    let kernel = benchmark_kernel();
    let reference = reference_raster();

    let t_cpu = benchmark_cpu(&kernel, &reference).map_err(InitError::CpuBenchmarkFailed)?;
    log::info!("CPU benchmark: {} ms", t_cpu.as_millis());

    #[cfg_attr(not(feature = "gpu"), allow(unused_mut))]
    let mut supported = FamilySet::empty();

    #[cfg(feature = "gpu")]
    {
        let mut best: Option<(GpuFamily, Duration, std::sync::Arc<hal::GpuContext>)> = None;

        for family in GpuFamily::PRIORITY {
            let context = match hal::GpuContext::probe(family) {
                Ok(context) => context,
                Err(error) => {
                    log::debug!("skipping {family}: {error}");
                    continue;
                }
            };
            supported |= family.into();

            match benchmark_gpu(&context, &kernel, &reference) {
                Ok(elapsed) => {
                    log::info!(
                        "{family} benchmark: {} ms ({})",
                        elapsed.as_millis(),
                        context.adapter_name()
                    );
                    let improves = best
                        .as_ref()
                        .map_or(true, |&(_, best_time, _)| elapsed < best_time);
                    if improves {
                        best = Some((family, elapsed, context));
                    }
                }
                Err(error) => {
                    log::warn!("{family} benchmark failed: {error}");
                }
            }
        }

        log::info!("GPU families reachable: {supported:?}");

        if let Some((family, t_gpu, context)) = best {
            if t_gpu.as_secs_f64() < GPU_ADVANTAGE * t_cpu.as_secs_f64() {
                log::info!("{family} is faster, selecting the GPU backend");
                return Ok(Decision {
                    location: MemoryLocation::GpuMemory,
                    family: Some(family),
                    supported,
                    gpu: Some(context),
                });
            }
            log::info!("CPU is faster or comparable, selecting the CPU backend");
        } else {
            log::info!("no usable GPU backend, selecting the CPU backend");
        }
    }

    Ok(Decision::cpu(supported))
}

/// Selection pinned by the `DARKROOM_BACKEND` environment override,
/// skipping the benchmark.
pub(crate) fn decide_with_override(raw: &str) -> Result<Decision, InitError> {
    let trimmed = raw.trim().to_ascii_lowercase();

    if trimmed == "cpu" {
        log::info!("backend pinned to CPU by DARKROOM_BACKEND");
        return Ok(Decision::cpu(FamilySet::empty()));
    }

    let family_filter = match trimmed.as_str() {
        "gpu" => None,
        "gpu:cuda" => Some(drt::GpuFamily::Cuda),
        "gpu:dx12" | "gpu:d3d12" => Some(drt::GpuFamily::Dx12),
        "gpu:metal" => Some(drt::GpuFamily::Metal),
        "gpu:vulkan" => Some(drt::GpuFamily::Vulkan),
        "gpu:opencl" => Some(drt::GpuFamily::OpenCl),
        _ => return Err(InitError::BadOverride(raw.to_string())),
    };

    #[cfg(feature = "gpu")]
    {
        let candidates: Vec<GpuFamily> = match family_filter {
            Some(family) => vec![family],
            None => GpuFamily::PRIORITY.to_vec(),
        };
        for family in candidates {
            match hal::GpuContext::probe(family) {
                Ok(context) => {
                    log::info!("backend pinned to {family} by DARKROOM_BACKEND");
                    return Ok(Decision {
                        location: MemoryLocation::GpuMemory,
                        family: Some(family),
                        supported: family.into(),
                        gpu: Some(context),
                    });
                }
                Err(error) => log::warn!("{family} unavailable: {error}"),
            }
        }
        log::warn!("DARKROOM_BACKEND requested a GPU but none was usable, falling back to CPU");
    }
    #[cfg(not(feature = "gpu"))]
    {
        let _ = family_filter;
        log::warn!("DARKROOM_BACKEND requested a GPU but GPU support is not compiled in");
    }

    Ok(Decision::cpu(FamilySet::empty()))
}
