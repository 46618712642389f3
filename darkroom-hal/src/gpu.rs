/*!
# GPU working image over wgpu

One opened device context per process, shared by every image and kernel
through an `Arc`. The image keeps a host mirror of its last upload plus
one storage buffer on the device; kernels dispatch in place on the
storage buffer and mark the device copy authoritative, so exports first
synchronize device→host.

Family mapping: D3D12, Metal and Vulkan open through the corresponding
wgpu backend. CUDA and OpenCL have no compute runtime linked into this
build and report [`DeviceError::FamilyNotCompiled`], which the backend
decider treats as silent disqualification.
*/

use std::sync::Arc;

use drt::{GpuFamily, MemoryLocation, PixelBuffer};

use crate::cpu::Meta;
use crate::{validate_buffer, DeviceError, ImageError};

/// Size of the uniform extent block: `[width, height, pad, pad]`.
const PARAMS_BYTES: u64 = 16;

/// An opened compute device on one GPU family.
///
/// This is the opaque target handle the backend decider publishes; GPU
/// working images route transfers through it and the fused executor
/// schedules kernels on it.
pub struct GpuContext {
    family: GpuFamily,
    adapter_info: wgpu::AdapterInfo,
    device: wgpu::Device,
    queue: wgpu::Queue,
}

impl GpuContext {
    /// Opens a device on `family` and verifies it with a 1×1 upload
    /// probe. Every failure mode reports an error; the caller decides
    /// whether that disqualifies the family silently.
    pub fn probe(family: GpuFamily) -> Result<Arc<Self>, DeviceError> {
        let backends = match family {
            GpuFamily::Dx12 => wgpu::Backends::DX12,
            GpuFamily::Metal => wgpu::Backends::METAL,
            GpuFamily::Vulkan => wgpu::Backends::VULKAN,
            GpuFamily::Cuda | GpuFamily::OpenCl => {
                return Err(DeviceError::FamilyNotCompiled(family));
            }
        };

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            compatible_surface: None,
        }))
        .ok_or(DeviceError::AdapterUnavailable(family))?;

        let adapter_info = adapter.get_info();
        log::debug!(
            "{family}: found adapter {} ({:?})",
            adapter_info.name,
            adapter_info.device_type
        );

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("darkroom device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        ))
        .map_err(|error| DeviceError::DeviceRequest(error.to_string()))?;

        let context = Arc::new(Self {
            family,
            adapter_info,
            device,
            queue,
        });
        context.probe_upload()?;
        Ok(context)
    }

    /// The family this context was opened on.
    #[must_use]
    pub fn family(&self) -> GpuFamily {
        self.family
    }

    /// Name of the adapter backing the context.
    #[must_use]
    pub fn adapter_name(&self) -> &str {
        &self.adapter_info.name
    }

    /// Round-trips one RGBA pixel through device memory.
    fn probe_upload(&self) -> Result<(), DeviceError> {
        let samples = [0.25f32, 0.5, 0.75, 1.0];
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("darkroom probe"),
            size: (samples.len() * std::mem::size_of::<f32>()) as u64,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        self.queue
            .write_buffer(&buffer, 0, bytemuck::cast_slice(&samples));
        let read = self
            .read_back(&buffer, buffer.size())
            .map_err(|error| DeviceError::Probe(error.to_string()))?;
        if read == samples {
            Ok(())
        } else {
            Err(DeviceError::Probe(format!(
                "probe pixel came back altered: {read:?}"
            )))
        }
    }

    /// Lowers a kernel to a compute pipeline on this device.
    pub fn compile_kernel(&self, kernel: &prism::Kernel) -> Result<GpuKernel, DeviceError> {
        profiling::scope!("GpuContext::compile_kernel");

        let source = prism::wgsl::write_kernel(kernel)?;

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("darkroom kernel"),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });

        let bind_layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("darkroom kernel"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Storage { read_only: false },
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                ],
            });
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("darkroom kernel"),
                bind_group_layouts: &[&bind_layout],
                push_constant_ranges: &[],
            });
        let pipeline = self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("darkroom kernel"),
                layout: Some(&pipeline_layout),
                module: &module,
                entry_point: Some(prism::wgsl::ENTRY_POINT),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            });

        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(DeviceError::Shader(error.to_string()));
        }

        Ok(GpuKernel {
            pipeline,
            bind_layout,
        })
    }

    /// Copies `bytes` of `buffer` into host memory, synchronizing the
    /// queue.
    fn read_back(&self, buffer: &wgpu::Buffer, bytes: u64) -> Result<Vec<f32>, ImageError> {
        profiling::scope!("GpuContext::read_back");

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("darkroom readback"),
            size: bytes,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("darkroom readback"),
            });
        encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, bytes);
        self.queue.submit([encoder.finish()]);

        let (sender, receiver) = std::sync::mpsc::channel();
        let slice = staging.slice(..);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);

        receiver
            .recv()
            .map_err(|_| ImageError::DeviceTransferFailed("map callback dropped".to_string()))?
            .map_err(|error| ImageError::DeviceTransferFailed(error.to_string()))?;

        let view = slice.get_mapped_range();
        let data = bytemuck::cast_slice::<u8, f32>(&view).to_vec();
        drop(view);
        staging.unmap();
        Ok(data)
    }
}

/// A compute pipeline compiled from one kernel graph.
pub struct GpuKernel {
    pipeline: wgpu::ComputePipeline,
    bind_layout: wgpu::BindGroupLayout,
}

struct Storage {
    pixels: wgpu::Buffer,
    params: wgpu::Buffer,
    bytes: u64,
}

/// The GPU variant of a working image.
pub struct GpuImage {
    context: Arc<GpuContext>,
    meta: Meta,
    /// Host mirror of the last upload. Stale while `device_dirty`.
    host: Vec<f32>,
    storage: Option<Storage>,
    /// Set once a kernel has written the device copy; exports must then
    /// synchronize device→host.
    device_dirty: bool,
}

impl GpuImage {
    /// Builds an image on `context` owning the contents of `buffer`.
    pub fn new(context: Arc<GpuContext>, buffer: PixelBuffer) -> Result<Self, ImageError> {
        let mut image = Self {
            context,
            meta: Meta::default(),
            host: Vec::new(),
            storage: None,
            device_dirty: false,
        };
        image.update_from_owned(buffer)?;
        Ok(image)
    }

    /// Replaces the contents with a copy of `buffer` and refreshes the
    /// device copy.
    pub fn update_from(&mut self, buffer: &PixelBuffer) -> Result<(), ImageError> {
        validate_buffer(buffer)?;
        let mut host = Vec::new();
        host.try_reserve_exact(buffer.data.len())
            .map_err(|_| ImageError::AllocFailed {
                bytes: buffer.size_in_bytes(),
                location: MemoryLocation::CpuRam,
            })?;
        host.extend_from_slice(&buffer.data);
        self.install(Meta::of(buffer), host)
    }

    /// Replaces the contents, adopting the host allocation of `buffer`,
    /// and refreshes the device copy.
    pub fn update_from_owned(&mut self, buffer: PixelBuffer) -> Result<(), ImageError> {
        validate_buffer(&buffer)?;
        let meta = Meta::of(&buffer);
        self.install(meta, buffer.data)
    }

    fn install(&mut self, meta: Meta, host: Vec<f32>) -> Result<(), ImageError> {
        profiling::scope!("GpuImage::install");

        let bytes = (host.len() * std::mem::size_of::<f32>()) as u64;
        self.ensure_storage(bytes)?;
        let storage = self
            .storage
            .as_ref()
            .ok_or(ImageError::Unexpected("storage vanished after allocation"))?;

        self.context.device.push_error_scope(wgpu::ErrorFilter::Validation);
        self.context
            .queue
            .write_buffer(&storage.pixels, 0, bytemuck::cast_slice(&host));
        let params = [meta.width, meta.height, 0u32, 0u32];
        self.context
            .queue
            .write_buffer(&storage.params, 0, bytemuck::cast_slice(&params));
        // Flush the staged writes onto the queue.
        self.context.queue.submit(std::iter::empty());
        if let Some(error) = pollster::block_on(self.context.device.pop_error_scope()) {
            return Err(ImageError::DeviceTransferFailed(error.to_string()));
        }

        self.meta = meta;
        self.host = host;
        self.device_dirty = false;
        Ok(())
    }

    /// Allocates (or reuses) device storage for `bytes` of pixels.
    fn ensure_storage(&mut self, bytes: u64) -> Result<(), ImageError> {
        if self.storage.as_ref().is_some_and(|s| s.bytes == bytes) {
            return Ok(());
        }

        let limits = self.context.device.limits();
        if bytes > limits.max_buffer_size || bytes > u64::from(limits.max_storage_buffer_binding_size)
        {
            return Err(ImageError::AllocFailed {
                bytes: bytes as usize,
                location: MemoryLocation::GpuMemory,
            });
        }

        self.context
            .device
            .push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let pixels = self.context.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("darkroom working image"),
            size: bytes,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let params = self.context.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("darkroom working image params"),
            size: PARAMS_BYTES,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        if pollster::block_on(self.context.device.pop_error_scope()).is_some() {
            return Err(ImageError::AllocFailed {
                bytes: bytes as usize,
                location: MemoryLocation::GpuMemory,
            });
        }

        self.storage = Some(Storage {
            pixels,
            params,
            bytes,
        });
        Ok(())
    }

    /// Deep copy into a fresh CPU buffer, synchronizing device→host
    /// when a kernel has written the device copy.
    pub fn export_cpu_copy(&self) -> Result<PixelBuffer, ImageError> {
        profiling::scope!("GpuImage::export_cpu_copy");

        let storage = self.storage.as_ref().ok_or(ImageError::InvalidWorkingImage)?;
        let data = if self.device_dirty {
            self.context.read_back(&storage.pixels, storage.bytes)?
        } else {
            self.host.clone()
        };

        let mut buffer =
            PixelBuffer::from_vec(self.meta.width, self.meta.height, self.meta.layout, data);
        buffer.channel_count = self.meta.channels;
        if !buffer.is_valid() {
            return Err(ImageError::Unexpected("device returned a short readback"));
        }
        Ok(buffer)
    }

    /// `(width, height)` from cached metadata; never queries the device.
    #[must_use]
    pub fn size(&self) -> (u32, u32) {
        (self.meta.width, self.meta.height)
    }

    /// Channel count from cached metadata.
    #[must_use]
    pub fn channels(&self) -> u32 {
        self.meta.channels
    }

    /// Whether device storage is allocated and metadata cached.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.storage.is_some() && self.meta.width > 0 && self.meta.height > 0
    }

    /// Always [`MemoryLocation::GpuMemory`].
    #[must_use]
    pub fn memory_location(&self) -> MemoryLocation {
        MemoryLocation::GpuMemory
    }

    /// Dispatches `kernel` over the device copy, in place.
    pub fn run_kernel(&mut self, kernel: &GpuKernel) -> Result<(), ImageError> {
        profiling::scope!("GpuImage::run_kernel");

        let storage = self.storage.as_ref().ok_or(ImageError::InvalidWorkingImage)?;
        let device = &self.context.device;

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("darkroom kernel"),
            layout: &kernel.bind_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: storage.pixels.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: storage.params.as_entire_binding(),
                },
            ],
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("darkroom kernel"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("darkroom kernel"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&kernel.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(
                prism::wgsl::dispatch_extent(self.meta.width),
                prism::wgsl::dispatch_extent(self.meta.height),
                1,
            );
        }
        self.context.queue.submit([encoder.finish()]);

        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(ImageError::DeviceTransferFailed(error.to_string()));
        }
        self.device_dirty = true;
        Ok(())
    }
}
