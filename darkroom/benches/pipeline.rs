//! Fused vs sequential execution over a 1080p raster, plus the cost of
//! composing and compiling the kernel itself.

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};

use darkroom::{ChannelLayout, OperationDescriptor, OperationKind, PixelBuffer};
use drc::{build_pipeline, builtin_registry, OperationRegistry};

fn bench_raster() -> PixelBuffer {
    let mut buffer = PixelBuffer::new(1920, 1080, ChannelLayout::RgbaF32);
    for (index, sample) in buffer.data.iter_mut().enumerate() {
        *sample = (index % 256) as f32 / 255.0;
    }
    buffer
}

fn edit_list() -> Vec<OperationDescriptor> {
    vec![
        OperationDescriptor::with_value(OperationKind::Exposure, 0.3),
        OperationDescriptor::with_value(OperationKind::Contrast, 1.2),
        OperationDescriptor::with_value(OperationKind::Highlights, -0.25),
        OperationDescriptor::with_value(OperationKind::Shadows, 0.15),
        OperationDescriptor::with_value(OperationKind::Saturation, 0.1),
    ]
}

fn cpu_image(raster: &PixelBuffer) -> hal::WorkingImage {
    hal::WorkingImage::Cpu(hal::CpuImage::new(raster.clone()).unwrap())
}

fn fused_execution(c: &mut Criterion) {
    let raster = bench_raster();
    let executor = build_pipeline(&edit_list(), builtin_registry(), &hal::Target::Cpu)
        .unwrap()
        .unwrap();
    // Warm the compile cache so the measurement is pure execution.
    let mut warmup = cpu_image(&raster);
    executor.execute(&mut warmup).unwrap();

    c.bench_function("fused 1080p five ops", |b| {
        b.iter_batched(
            || cpu_image(&raster),
            |mut image| executor.execute(&mut image).unwrap(),
            BatchSize::LargeInput,
        );
    });
}

fn sequential_execution(c: &mut Criterion) {
    let raster = bench_raster();
    // A fusion-free registry forces the sequential shape.
    let mut registry = OperationRegistry::new();
    registry.register_fallback(OperationKind::Exposure, drc::ops::exposure::apply);
    registry.register_fallback(OperationKind::Contrast, drc::ops::contrast::apply);
    registry.register_fallback(OperationKind::Highlights, drc::ops::highlights::apply);
    registry.register_fallback(OperationKind::Shadows, drc::ops::shadows::apply);
    registry.register_fallback(OperationKind::Saturation, drc::ops::saturation::apply);
    let executor = build_pipeline(
        &edit_list(),
        std::sync::Arc::new(registry),
        &hal::Target::Cpu,
    )
    .unwrap()
    .unwrap();

    c.bench_function("sequential 1080p five ops", |b| {
        b.iter_batched(
            || cpu_image(&raster),
            |mut image| executor.execute(&mut image).unwrap(),
            BatchSize::LargeInput,
        );
    });
}

fn kernel_composition(c: &mut Criterion) {
    let list = edit_list();
    c.bench_function("compose executor", |b| {
        b.iter(|| {
            build_pipeline(&list, builtin_registry(), &hal::Target::Cpu)
                .unwrap()
                .unwrap()
        });
    });
}

criterion_group!(
    benches,
    fused_execution,
    sequential_execution,
    kernel_composition
);
criterion_main!(benches);
