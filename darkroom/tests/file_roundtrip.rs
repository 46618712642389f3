//! Disk round trips: PNG in, adjusted PNG out, sidecar save/load.

use std::path::PathBuf;
use std::sync::Arc;

use darkroom::{sidecar, Editor, FileSource, OperationDescriptor, OperationKind, SourceProvider};

fn setup() {
    std::env::set_var("DARKROOM_BACKEND", "cpu");
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Unique scratch path for one test.
fn scratch_path(name: &str, extension: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "darkroom-{}-{name}.{extension}",
        std::process::id()
    ))
}

/// A 2x1 PNG whose samples are all multiples of 51, so the 8-bit
/// round trip stays exact.
fn write_test_png(path: &PathBuf) {
    let pixels: [u8; 8] = [51, 102, 153, 255, 204, 25, 127, 255];
    let encoded = image::RgbaImage::from_raw(2, 1, pixels.to_vec()).unwrap();
    encoded.save(path).unwrap();
}

#[test]
fn png_loads_as_normalized_rgba_f32() {
    setup();
    let path = scratch_path("load", "png");
    write_test_png(&path);

    let editor = Editor::new(Arc::new(FileSource::new())).unwrap();
    editor.load_image(&path).unwrap();

    let buffer = editor.working_image().unwrap().export_cpu_copy().unwrap();
    assert_eq!(buffer.width, 2);
    assert_eq!(buffer.channel_count, 4);
    let expected = [
        51.0 / 255.0,
        102.0 / 255.0,
        153.0 / 255.0,
        1.0,
        204.0 / 255.0,
        25.0 / 255.0,
        127.0 / 255.0,
        1.0,
    ];
    for (a, b) in buffer.data.iter().zip(expected) {
        assert!((a - b).abs() < 1e-6, "{a} vs {b}");
    }

    let _ = std::fs::remove_file(&path);
}

#[test]
fn commit_rewrites_the_file_with_the_adjustment_applied() {
    setup();
    let path = scratch_path("commit", "png");
    write_test_png(&path);

    let editor = Editor::new(Arc::new(FileSource::new())).unwrap();
    editor.load_image(&path).unwrap();
    // +0.2 is +51 in 8-bit: every sample moves by exactly one step of
    // the test pattern, clamping at white.
    editor
        .add_operation(OperationDescriptor::with_value(
            OperationKind::Brightness,
            0.2,
        ))
        .wait()
        .unwrap();
    editor.commit_to_source().unwrap();

    let reloaded = image::open(&path).unwrap().to_rgba8();
    assert_eq!(
        reloaded.as_raw(),
        &vec![102, 153, 204, 255, 255, 76, 178, 255]
    );

    let _ = std::fs::remove_file(&path);
}

#[test]
fn source_metadata_reports_the_loaded_file() {
    setup();
    let path = scratch_path("metadata", "png");
    write_test_png(&path);

    let provider = Arc::new(FileSource::new());
    let editor = Editor::new(provider.clone()).unwrap();
    editor.load_image(&path).unwrap();

    assert_eq!(provider.metadata("width").as_deref(), Some("2"));
    assert_eq!(provider.metadata("height").as_deref(), Some("1"));
    assert_eq!(
        provider.metadata("path").as_deref(),
        Some(path.display().to_string().as_str())
    );
    assert_eq!(provider.metadata("iso"), None);

    let _ = std::fs::remove_file(&path);
}

#[test]
fn sidecar_round_trips_the_edit_list_through_the_editor() {
    setup();
    let image_path = scratch_path("sidecar", "png");
    let sidecar_path = scratch_path("sidecar", "ron");
    write_test_png(&image_path);

    let editor = Editor::new(Arc::new(FileSource::new())).unwrap();
    editor.load_image(&image_path).unwrap();
    editor
        .add_operation(OperationDescriptor::with_value(
            OperationKind::Highlights,
            -0.4,
        ))
        .wait()
        .unwrap();
    editor
        .add_operation(OperationDescriptor::with_value(OperationKind::Contrast, 1.3))
        .wait()
        .unwrap();
    let saved = editor.active_operations();
    editor.save_edits(&sidecar_path).unwrap();

    // A second editor session restores the same list and converges to
    // the same working image.
    let restored = Editor::new(Arc::new(FileSource::new())).unwrap();
    restored.load_image(&image_path).unwrap();
    restored.load_edits(&sidecar_path).unwrap().wait().unwrap();

    assert_eq!(restored.active_operations(), saved);
    let a = editor.working_image().unwrap().export_cpu_copy().unwrap();
    let b = restored.working_image().unwrap().export_cpu_copy().unwrap();
    for (x, y) in a.data.iter().zip(&b.data) {
        assert!((x - y).abs() <= 1e-5);
    }

    let _ = std::fs::remove_file(&image_path);
    let _ = std::fs::remove_file(&sidecar_path);
}

#[test]
fn loading_a_missing_file_is_an_io_error() {
    setup();
    let editor = Editor::new(Arc::new(FileSource::new())).unwrap();
    let missing = scratch_path("missing", "png");
    let outcome = editor.load_image(&missing);
    assert!(outcome.is_err());
    assert!(editor.working_image().is_none());
}

#[test]
fn sidecar_files_survive_a_raw_save_load_cycle() {
    setup();
    let path = scratch_path("rawsidecar", "ron");
    let list = vec![
        OperationDescriptor::with_value(OperationKind::Exposure, 0.5),
        OperationDescriptor::with_value(OperationKind::Blacks, 0.1),
    ];
    sidecar::save_edit_list(&path, &list).unwrap();
    let back = sidecar::load_edit_list(&path).unwrap();
    assert_eq!(back, list);
    let _ = std::fs::remove_file(&path);
}
