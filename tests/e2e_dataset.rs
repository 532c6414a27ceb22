//! End-to-end tests for the windowed sequence builder.
//!
//! Each test exercises: raster source -> list/sort -> window -> per-frame
//! preparation -> stacked sequence.

use firegraph::dataset::{build, make_windows, min_max_normalize, resize_bilinear, WindowSpec};
use firegraph::raster::{JsonDirSource, MemorySource};
use firegraph::{ChannelSelector, Error, SequenceDataset};
use ndarray::Array3;
use proptest::prelude::*;

// ============================================================================
// Helpers
// ============================================================================

fn ramp(c: usize, h: usize, w: usize, offset: f32) -> Array3<f32> {
    Array3::from_shape_fn((c, h, w), |(ci, y, x)| offset + (ci * 100 + y * w + x) as f32)
}

fn daily_source(days: usize) -> MemorySource {
    MemorySource::from_frames((0..days).map(|d| (format!("2021-09-{:02}", d + 4), ramp(2, 6, 5, d as f32))))
}

// ============================================================================
// 1. Window counts
// ============================================================================

proptest! {
    #[test]
    fn prop_window_count(files in 0usize..40, seq_len in 1usize..12) {
        let ids: Vec<String> = (0..files).map(|i| format!("{i:03}")).collect();
        let windows = make_windows(&ids, seq_len);
        prop_assert_eq!(windows.len(), (files + 1).saturating_sub(seq_len));
        for (i, w) in windows.iter().enumerate() {
            prop_assert_eq!(w.index, i);
            prop_assert_eq!(w.ids.len(), seq_len);
        }
    }

    #[test]
    fn prop_normalized_frame_spans_unit_interval(values in prop::collection::vec(-1e4f32..1e4, 12)) {
        let frame = Array3::from_shape_vec((1, 3, 4), values.clone()).unwrap();
        let out = min_max_normalize(frame.clone());
        let lo = values.iter().copied().fold(f32::INFINITY, f32::min);
        let hi = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        if lo == hi {
            prop_assert_eq!(out, frame);
        } else {
            prop_assert_eq!(out.iter().copied().fold(f32::INFINITY, f32::min), 0.0);
            prop_assert_eq!(out.iter().copied().fold(f32::NEG_INFINITY, f32::max), 1.0);
        }
    }

    #[test]
    fn prop_resize_hits_target(h in 1usize..20, w in 1usize..20, th in 1usize..20, tw in 1usize..20) {
        let out = resize_bilinear(&ramp(2, h, w, 0.0), th, tw).unwrap();
        prop_assert_eq!(out.dim(), (2, th, tw));
    }
}

// ============================================================================
// 2. Dataset over a memory source
// ============================================================================

#[test]
fn test_windows_follow_sorted_ids() {
    let source = MemorySource::from_frames([
        ("2021-09-06", ramp(1, 2, 2, 2.0)),
        ("2021-09-04", ramp(1, 2, 2, 0.0)),
        ("2021-09-05", ramp(1, 2, 2, 1.0)),
    ]);
    let spec = WindowSpec { seq_len: 2, resize_to: None, ..WindowSpec::default() };
    let dataset = SequenceDataset::new(source, spec).unwrap();
    assert_eq!(dataset.len(), 2);
    let first = dataset.window(0).unwrap();
    assert_eq!(first.ids, vec!["2021-09-04", "2021-09-05"]);
    assert_eq!(first.start_date.unwrap().to_string(), "2021-09-04");
}

#[test]
fn test_sequence_shape_after_select_and_resize() {
    let spec = WindowSpec {
        seq_len: 3,
        channels: ChannelSelector::Indices(vec![1]),
        resize_to: Some((8, 8)),
        normalize: true,
    };
    let dataset = SequenceDataset::new(daily_source(5), spec).unwrap();
    assert_eq!(dataset.len(), 3);
    let seq = dataset.get(2).unwrap();
    assert_eq!(seq.dim(), (3, 1, 8, 8));
    assert!(seq.iter().all(|&v| (0.0..=1.0).contains(&v)));
}

#[test]
fn test_parallel_materialization_matches_sequential() {
    let spec = WindowSpec { seq_len: 2, resize_to: Some((4, 4)), ..WindowSpec::default() };
    let dataset = SequenceDataset::new(daily_source(6), spec.clone()).unwrap();
    let parallel = dataset.materialize_parallel().unwrap();
    let sequential = build(daily_source(6), spec).unwrap();
    assert_eq!(parallel, sequential);
}

#[test]
fn test_batch_stacks_windows() {
    let spec = WindowSpec { seq_len: 2, resize_to: None, ..WindowSpec::default() };
    let dataset = SequenceDataset::new(daily_source(4), spec).unwrap();
    let batch = dataset.batch(&[0, 2]).unwrap();
    assert_eq!(batch.dim(), (2, 2, 2, 6, 5));
}

#[test]
fn test_too_few_files() {
    let spec = WindowSpec { seq_len: 4, ..WindowSpec::default() };
    let dataset = SequenceDataset::new(daily_source(3), spec.clone()).unwrap();
    assert!(dataset.is_empty());
    assert!(matches!(dataset.get(0), Err(Error::InsufficientData { files: 3, seq_len: 4 })));
    assert!(matches!(build(daily_source(3), spec), Err(Error::InsufficientData { .. })));
}

#[test]
fn test_unreadable_raster_propagates() {
    let source = daily_source(3);
    source.mark_unreadable("2021-09-05");
    let spec = WindowSpec { seq_len: 2, resize_to: None, ..WindowSpec::default() };
    let dataset = SequenceDataset::new(source, spec).unwrap();
    assert!(matches!(dataset.get(0), Err(Error::RasterUnreadable { .. })));
}

#[test]
fn test_mismatched_frame_sizes_rejected_without_resize() {
    let source = MemorySource::from_frames([("a", ramp(1, 4, 4, 0.0)), ("b", ramp(1, 5, 4, 0.0))]);
    let spec = WindowSpec { seq_len: 2, resize_to: None, ..WindowSpec::default() };
    let dataset = SequenceDataset::new(source, spec).unwrap();
    assert!(matches!(dataset.get(0), Err(Error::ShapeMismatch { .. })));
}

// ============================================================================
// 3. Dataset over a JSON directory
// ============================================================================

#[test]
fn test_json_directory_source() {
    let dir = tempfile::tempdir().unwrap();
    let source = JsonDirSource::new(dir.path()).unwrap();
    for d in 0..3 {
        let mut frame = ramp(2, 3, 3, d as f32);
        frame[[0, 0, 0]] = f32::NAN;
        source.write(&format!("2021-09-0{}", d + 4), &frame).unwrap();
    }
    std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

    let spec = WindowSpec { seq_len: 3, resize_to: Some((6, 6)), ..WindowSpec::default() };
    let dataset = SequenceDataset::new(source, spec).unwrap();
    assert_eq!(dataset.len(), 1);
    let seq = dataset.get(0).unwrap();
    assert_eq!(seq.dim(), (3, 2, 6, 6));
    assert!(seq.iter().all(|v| v.is_finite()));
}
